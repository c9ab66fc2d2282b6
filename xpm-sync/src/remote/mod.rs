//! Clients for the external systems an experiment is synchronized with
//!
//! Each system sits behind a trait so reconciliation passes can run against
//! in-memory fakes in tests:
//! - [`BugTracker`]: Bugzilla ticket creation and comments
//! - [`RecipeSource`]: Normandy recipe approval/enabled state
//! - [`RecordStore`]: Kinto record push, review status and published records

pub mod bugzilla;
pub mod kinto;
pub mod normandy;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use xpm_common::config::TomlConfig;

pub use bugzilla::{BugzillaClient, BugzillaResponse, NewBug};
pub use kinto::{KintoClient, RecordSummary};
pub use normandy::{ApprovedRevision, NormandyClient};

/// Remote system errors
#[derive(Debug, Error)]
pub enum RemoteError {
    /// Network failure or non-success HTTP status
    #[error("{service} call failed: {message}")]
    Call {
        service: &'static str,
        message: String,
    },

    /// Response body was not what the service documents
    #[error("{service} response could not be decoded: {message}")]
    Decode {
        service: &'static str,
        message: String,
    },

    /// Service reported an application-level error in its body
    #[error("{service} error {code:?}: {message}")]
    Api {
        service: &'static str,
        code: Option<i64>,
        message: String,
    },
}

/// Bug tracker operations
#[async_trait]
pub trait BugTracker: Send + Sync {
    /// Create a bug; the raw response is returned so callers can inspect
    /// error codes
    async fn create_bug(&self, bug: &NewBug) -> Result<BugzillaResponse, RemoteError>;

    /// Add a comment to an existing bug
    async fn add_comment(&self, bug_id: i64, comment: &str) -> Result<BugzillaResponse, RemoteError>;
}

/// Remote-config recipe lookups
#[async_trait]
pub trait RecipeSource: Send + Sync {
    /// Approved revision of the recipe with `recipe_id`
    async fn get_recipe(&self, recipe_id: i64) -> Result<ApprovedRevision, RemoteError>;
}

/// Record-push service operations
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Create a record in the workspace collection unless one with the same
    /// id already exists
    async fn create_record(&self, record: &serde_json::Value) -> Result<(), RemoteError>;

    /// Mark the workspace collection as waiting for review
    async fn request_review(&self) -> Result<(), RemoteError>;

    /// Whether a pushed change is currently waiting for review
    async fn has_pending_review(&self) -> Result<bool, RemoteError>;

    /// Records pushed to the workspace collection, reviewed or not
    async fn get_workspace_records(&self) -> Result<Vec<RecordSummary>, RemoteError>;

    /// Records currently published to clients
    async fn get_main_records(&self) -> Result<Vec<RecordSummary>, RemoteError>;
}

/// The three remote systems, shared across handlers and scheduled passes
#[derive(Clone)]
pub struct Remotes {
    pub bugs: Arc<dyn BugTracker>,
    pub recipes: Arc<dyn RecipeSource>,
    pub records: Arc<dyn RecordStore>,
}

impl Remotes {
    /// Build HTTP clients for all three systems from configuration
    pub fn from_config(config: &TomlConfig) -> Result<Self, RemoteError> {
        let http = build_http_client(Duration::from_secs(config.http_timeout_secs))?;

        Ok(Self {
            bugs: Arc::new(BugzillaClient::new(http.clone(), config.bugzilla.clone())),
            recipes: Arc::new(NormandyClient::new(http.clone(), config.normandy.clone())),
            records: Arc::new(KintoClient::new(http, config.kinto.clone())),
        })
    }
}

const USER_AGENT: &str = concat!("xpm-sync/", env!("CARGO_PKG_VERSION"));

pub fn build_http_client(timeout: Duration) -> Result<reqwest::Client, RemoteError> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .timeout(timeout)
        .build()
        .map_err(|e| RemoteError::Call {
            service: "http",
            message: e.to_string(),
        })
}

/// Fail on non-success status, then decode the JSON body
pub(crate) async fn read_json<T: DeserializeOwned>(
    service: &'static str,
    response: reqwest::Response,
) -> Result<T, RemoteError> {
    let status = response.status();
    let body = response.text().await.map_err(|e| RemoteError::Call {
        service,
        message: e.to_string(),
    })?;

    if !status.is_success() {
        return Err(RemoteError::Call {
            service,
            message: format!("HTTP {}: {}", status.as_u16(), body),
        });
    }

    decode_body(service, &body)
}

pub(crate) fn decode_body<T: DeserializeOwned>(service: &'static str, body: &str) -> Result<T, RemoteError> {
    serde_json::from_str(body).map_err(|e| RemoteError::Decode {
        service,
        message: e.to_string(),
    })
}

pub(crate) fn call_error(service: &'static str) -> impl Fn(reqwest::Error) -> RemoteError {
    move |e| RemoteError::Call {
        service,
        message: e.to_string(),
    }
}
