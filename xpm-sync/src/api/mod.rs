//! HTTP API handlers for xpm-sync

pub mod experiments;
pub mod health;
pub mod notifications;
pub mod tasks;

pub use experiments::experiment_routes;
pub use health::health_routes;
pub use notifications::notification_routes;
pub use tasks::task_routes;
