//! Common error types for XPM

use thiserror::Error;

use crate::status::ExperimentStatus;

/// Common result type for XPM operations
pub type Result<T> = std::result::Result<T, Error>;

/// Common error types shared by the library and the sync service
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation error (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// I/O operation error (wraps std::io::Error)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration loading or validation error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid user input or request parameter
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Status change that is not in the transition table
    #[error("Invalid transition: {from} -> {to}")]
    InvalidTransition {
        from: ExperimentStatus,
        to: ExperimentStatus,
    },

    /// Stored status changed after the caller read it
    #[error("Status changed concurrently: expected {expected}, found {current}")]
    StaleStatus {
        expected: ExperimentStatus,
        current: ExperimentStatus,
    },

    /// Storage failure while allocating a bucket range
    #[error("Bucket allocation failed: {0}")]
    Allocation(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}
