//! Bugzilla REST client
//!
//! Bugzilla reports application errors as `{"error": true, "code": N,
//! "message": "..."}` with a non-2xx status, so the body is decoded
//! regardless of the HTTP status and the caller decides what to do with
//! the error code.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};
use xpm_common::config::BugzillaConfig;

use super::{call_error, decode_body, BugTracker, RemoteError};

const SERVICE: &str = "bugzilla";

/// Payload for `POST /rest/bug`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewBug {
    pub product: String,
    pub component: String,
    pub version: String,
    pub summary: String,
    pub description: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub assigned_to: Option<String>,
    pub cc: Vec<String>,
    #[serde(rename = "type")]
    pub bug_type: String,
    pub priority: String,
    pub see_also: Vec<i64>,
    pub blocks: Vec<i64>,
    pub url: String,
    pub whiteboard: String,
}

/// Response body of bug and comment creation
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct BugzillaResponse {
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
}

impl BugzillaResponse {
    /// Created object id; Bugzilla returns it as a number, some proxies as
    /// a string
    pub fn created_id(&self) -> Option<i64> {
        match self.id.as_ref()? {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.parse().ok(),
            _ => None,
        }
    }

    /// Created id, or the error the body describes
    pub fn into_id(self) -> Result<i64, RemoteError> {
        match self.created_id() {
            Some(id) => Ok(id),
            None => Err(RemoteError::Api {
                service: SERVICE,
                code: self.code,
                message: self
                    .message
                    .unwrap_or_else(|| "response carried no id".to_string()),
            }),
        }
    }
}

pub struct BugzillaClient {
    http: reqwest::Client,
    config: BugzillaConfig,
}

impl BugzillaClient {
    pub fn new(http: reqwest::Client, config: BugzillaConfig) -> Self {
        Self { http, config }
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> Result<BugzillaResponse, RemoteError> {
        let mut request = self.http.post(url).json(body);
        if let Some(key) = &self.config.api_key {
            request = request.query(&[("api_key", key)]);
        } else {
            warn!("Bugzilla API key is not configured");
        }

        let response = request.send().await.map_err(call_error(SERVICE))?;
        let status = response.status();
        let text = response.text().await.map_err(call_error(SERVICE))?;
        debug!(status = status.as_u16(), url, "Bugzilla response");

        decode_body(SERVICE, &text)
    }
}

#[async_trait]
impl BugTracker for BugzillaClient {
    async fn create_bug(&self, bug: &NewBug) -> Result<BugzillaResponse, RemoteError> {
        self.post(&self.config.create_url(), bug).await
    }

    async fn add_comment(&self, bug_id: i64, comment: &str) -> Result<BugzillaResponse, RemoteError> {
        let body = serde_json::json!({ "comment": comment });
        self.post(&self.config.comment_url(bug_id), &body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_id_accepts_number_or_string() {
        let numeric: BugzillaResponse = serde_json::from_str(r#"{"id": 123}"#).unwrap();
        assert_eq!(numeric.created_id(), Some(123));

        let text: BugzillaResponse = serde_json::from_str(r#"{"id": "456"}"#).unwrap();
        assert_eq!(text.created_id(), Some(456));
    }

    #[test]
    fn test_error_body_becomes_api_error() {
        let body: BugzillaResponse =
            serde_json::from_str(r#"{"error": true, "code": 51, "message": "bad user"}"#).unwrap();
        match body.into_id() {
            Err(RemoteError::Api { code, message, .. }) => {
                assert_eq!(code, Some(51));
                assert_eq!(message, "bad user");
            }
            other => panic!("expected Api error, got {:?}", other),
        }
    }

    #[test]
    fn test_assignee_omitted_when_none() {
        let bug = NewBug {
            product: "Shield".to_string(),
            component: "Shield Study".to_string(),
            version: "unspecified".to_string(),
            summary: "s".to_string(),
            description: "d".to_string(),
            assigned_to: None,
            cc: vec![],
            bug_type: "task".to_string(),
            priority: "P3".to_string(),
            see_also: vec![],
            blocks: vec![],
            url: "u".to_string(),
            whiteboard: "w".to_string(),
        };
        let json = serde_json::to_value(&bug).unwrap();
        assert!(json.get("assigned_to").is_none());
        assert_eq!(json["type"], "task");
    }
}
