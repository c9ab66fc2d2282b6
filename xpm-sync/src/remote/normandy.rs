//! Normandy recipe client

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;
use xpm_common::config::NormandyConfig;

use super::{call_error, read_json, RecipeSource, RemoteError};

const SERVICE: &str = "normandy";

/// The approved revision of a recipe
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApprovedRevision {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub approval_request: Option<ApprovalRequest>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ApprovalRequest {
    #[serde(default)]
    pub approver: Option<Approver>,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Approver {
    #[serde(default)]
    pub email: Option<String>,
}

impl ApprovedRevision {
    pub fn approver_email(&self) -> Option<&str> {
        self.approval_request
            .as_ref()?
            .approver
            .as_ref()?
            .email
            .as_deref()
            .filter(|e| !e.trim().is_empty())
    }
}

/// Pull `approved_revision` out of a recipe document
pub fn parse_recipe(body: Value) -> Result<ApprovedRevision, RemoteError> {
    let revision = match body.get("approved_revision") {
        Some(Value::Null) | None => {
            return Err(RemoteError::Decode {
                service: SERVICE,
                message: "recipe has no approved_revision".to_string(),
            })
        }
        Some(revision) => revision.clone(),
    };

    serde_json::from_value(revision).map_err(|e| RemoteError::Decode {
        service: SERVICE,
        message: e.to_string(),
    })
}

pub struct NormandyClient {
    http: reqwest::Client,
    config: NormandyConfig,
}

impl NormandyClient {
    pub fn new(http: reqwest::Client, config: NormandyConfig) -> Self {
        Self { http, config }
    }
}

#[async_trait]
impl RecipeSource for NormandyClient {
    async fn get_recipe(&self, recipe_id: i64) -> Result<ApprovedRevision, RemoteError> {
        let url = self.config.recipe_url_for(recipe_id);
        debug!(recipe_id, url = %url, "Fetching Normandy recipe");

        let response = self.http.get(&url).send().await.map_err(call_error(SERVICE))?;
        let body: Value = read_json(SERVICE, response).await?;
        parse_recipe(body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_enabled_with_approver() {
        let revision = parse_recipe(json!({
            "id": 7,
            "approved_revision": {
                "enabled": true,
                "approval_request": {"approver": {"email": "approver@example.com"}}
            }
        }))
        .unwrap();

        assert!(revision.enabled);
        assert_eq!(revision.approver_email(), Some("approver@example.com"));
    }

    #[test]
    fn test_parse_without_approver() {
        let revision = parse_recipe(json!({"approved_revision": {"enabled": false}})).unwrap();
        assert!(!revision.enabled);
        assert_eq!(revision.approver_email(), None);
    }

    #[test]
    fn test_missing_revision_is_decode_error() {
        assert!(matches!(
            parse_recipe(json!({"approved_revision": null})),
            Err(RemoteError::Decode { .. })
        ));
        assert!(matches!(parse_recipe(json!({})), Err(RemoteError::Decode { .. })));
    }
}
