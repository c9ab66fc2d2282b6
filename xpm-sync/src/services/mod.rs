//! Business logic: allocation, status transitions, reconciliation passes and
//! bug tracker tasks

pub mod allocator;
pub mod bugs;
pub mod push_queue;
pub mod recipe;
pub mod reconciler;
pub mod tasks;
pub mod transitions;
