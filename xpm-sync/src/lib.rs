//! xpm-sync library interface
//!
//! Exposes the storage, remote clients, reconciliation passes and HTTP
//! router for the binary and for integration tests.

pub mod api;
pub mod db;
pub mod error;
pub mod remote;
pub mod scheduler;
pub mod services;

pub use crate::error::{ApiError, ApiResult, TaskError};

use axum::Router;
use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tower_http::trace::TraceLayer;
use xpm_common::config::TomlConfig;

use crate::remote::Remotes;
use crate::services::tasks::{self, SyncTask, TaskReport};

/// Application state shared across handlers and scheduled passes
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    pub config: Arc<TomlConfig>,
    pub remotes: Remotes,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
    /// Last failed pass, for diagnostics
    pub last_error: Arc<RwLock<Option<String>>>,
    /// Held while the push queue admits an experiment; the pending-review
    /// check and the review request must not interleave
    pub push_queue_lock: Arc<Mutex<()>>,
}

impl AppState {
    pub fn new(db: SqlitePool, config: TomlConfig, remotes: Remotes) -> Self {
        Self {
            db,
            config: Arc::new(config),
            remotes,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
            push_queue_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Run `task` against this state. Push queue runs from the scheduler and
    /// the HTTP endpoint are serialized.
    pub async fn run_task(&self, task: SyncTask) -> Result<TaskReport, TaskError> {
        let _guard = match task {
            SyncTask::CheckKintoPushQueue => Some(self.push_queue_lock.lock().await),
            _ => None,
        };
        tasks::run_task(task, &self.db, &self.remotes, &self.config).await
    }

    pub async fn record_error(&self, message: String) {
        *self.last_error.write().await = Some(message);
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::experiment_routes())
        .merge(api::task_routes())
        .merge(api::notification_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
