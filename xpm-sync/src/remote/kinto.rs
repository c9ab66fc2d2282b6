//! Kinto v1 REST client
//!
//! Records are pushed into the workspace bucket and published to the main
//! bucket once a reviewer signs off. Only the handful of calls the
//! reconciliation passes need are implemented.

use async_trait::async_trait;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};
use xpm_common::config::KintoConfig;

use super::{call_error, read_json, RecordStore, RemoteError};

const SERVICE: &str = "kinto";

/// Record listing entry; only the id matters for reconciliation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RecordSummary {
    pub id: String,
}

#[derive(Debug, Deserialize)]
struct RecordList {
    data: Vec<Value>,
}

#[derive(Debug, Deserialize)]
struct CollectionBody {
    #[serde(default)]
    data: CollectionData,
}

#[derive(Debug, Default, Deserialize)]
struct CollectionData {
    #[serde(default)]
    status: Option<String>,
}

pub struct KintoClient {
    http: reqwest::Client,
    config: KintoConfig,
}

impl KintoClient {
    pub fn new(http: reqwest::Client, config: KintoConfig) -> Self {
        Self { http, config }
    }

    fn collection_url(&self, bucket: &str) -> String {
        format!(
            "{}/buckets/{}/collections/{}",
            self.config.host.trim_end_matches('/'),
            bucket,
            self.config.collection
        )
    }

    fn request(&self, method: Method, url: &str) -> RequestBuilder {
        self.http
            .request(method, url)
            .basic_auth(&self.config.user, self.config.password.as_ref())
    }

    async fn list_records(&self, bucket: &str) -> Result<Vec<RecordSummary>, RemoteError> {
        let url = format!("{}/records", self.collection_url(bucket));
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(call_error(SERVICE))?;
        let list: RecordList = read_json(SERVICE, response).await?;
        Ok(parse_records(list))
    }

    async fn expect_success(response: reqwest::Response) -> Result<(), RemoteError> {
        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        let body = response.text().await.unwrap_or_default();
        Err(RemoteError::Call {
            service: SERVICE,
            message: format!("HTTP {}: {}", status.as_u16(), body),
        })
    }
}

/// Ids of the records in a `{"data": [...]}` listing; entries without a
/// string id are ignored
fn parse_records(list: RecordList) -> Vec<RecordSummary> {
    list.data
        .into_iter()
        .filter_map(|record| serde_json::from_value(record).ok())
        .collect()
}

#[async_trait]
impl RecordStore for KintoClient {
    async fn create_record(&self, record: &Value) -> Result<(), RemoteError> {
        let id = record
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| RemoteError::Decode {
                service: SERVICE,
                message: "record has no string id".to_string(),
            })?;
        let url = format!("{}/records/{}", self.collection_url(&self.config.bucket), id);

        let response = self
            .request(Method::PUT, &url)
            .header("If-None-Match", "*")
            .json(&json!({ "data": record }))
            .send()
            .await
            .map_err(call_error(SERVICE))?;

        if response.status() == StatusCode::PRECONDITION_FAILED {
            info!(record = id, "Record already exists in workspace");
            return Ok(());
        }
        Self::expect_success(response).await
    }

    async fn request_review(&self) -> Result<(), RemoteError> {
        let url = self.collection_url(&self.config.bucket);
        let response = self
            .request(Method::PATCH, &url)
            .json(&json!({ "data": { "status": self.config.review_status } }))
            .send()
            .await
            .map_err(call_error(SERVICE))?;
        Self::expect_success(response).await
    }

    async fn has_pending_review(&self) -> Result<bool, RemoteError> {
        let url = self.collection_url(&self.config.bucket);
        let response = self
            .request(Method::GET, &url)
            .send()
            .await
            .map_err(call_error(SERVICE))?;
        let body: CollectionBody = read_json(SERVICE, response).await?;

        let pending = body.data.status.as_deref() == Some(self.config.review_status.as_str());
        debug!(pending, "Checked workspace collection status");
        Ok(pending)
    }

    async fn get_workspace_records(&self) -> Result<Vec<RecordSummary>, RemoteError> {
        self.list_records(&self.config.bucket).await
    }

    async fn get_main_records(&self) -> Result<Vec<RecordSummary>, RemoteError> {
        self.list_records(&self.config.bucket_main).await
    }
}
