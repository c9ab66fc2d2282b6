//! Database access for xpm-sync
//!
//! Functions that must take part in a caller's transaction accept
//! `&mut SqliteConnection`; read helpers accept the pool.

pub mod buckets;
pub mod changelog;
pub mod experiments;
pub mod notifications;
pub mod users;
