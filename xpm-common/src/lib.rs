//! # XPM Common Library
//!
//! Shared code for the experiment manager:
//! - Experiment domain model (types, variants, bucket ranges, change log rows)
//! - Status enum and the fixed transition table
//! - Normandy slug generation
//! - Configuration loading
//! - Database initialization

pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod slug;
pub mod status;

pub use error::{Error, Result};
pub use models::{ExperimentType, RemoteSystem};
pub use status::ExperimentStatus;
