//! Error types for xpm-sync

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use xpm_common::Error as CommonError;

use crate::remote::RemoteError;

/// Failure of a sync task or reconciliation pass
#[derive(Debug, Error)]
pub enum TaskError {
    #[error(transparent)]
    Common(#[from] CommonError),

    #[error(transparent)]
    Remote(#[from] RemoteError),

    #[error("Unknown task: {0}")]
    UnknownTask(String),
}

impl From<sqlx::Error> for TaskError {
    fn from(err: sqlx::Error) -> Self {
        TaskError::Common(CommonError::Database(err))
    }
}

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Resource not found (404)
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Invalid request (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Conflict (409), e.g. a transition the state machine forbids
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Remote system failed (502)
    #[error("Bad gateway: {0}")]
    BadGateway(String),

    /// Internal server error (500)
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<CommonError> for ApiError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::NotFound(msg) => ApiError::NotFound(msg),
            CommonError::InvalidInput(msg) => ApiError::BadRequest(msg),
            err @ (CommonError::InvalidTransition { .. } | CommonError::StaleStatus { .. }) => {
                ApiError::Conflict(err.to_string())
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl From<RemoteError> for ApiError {
    fn from(err: RemoteError) -> Self {
        ApiError::BadGateway(err.to_string())
    }
}

impl From<TaskError> for ApiError {
    fn from(err: TaskError) -> Self {
        match err {
            TaskError::Common(e) => e.into(),
            TaskError::Remote(e) => e.into(),
            TaskError::UnknownTask(name) => ApiError::NotFound(format!("task '{}'", name)),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "REMOTE_ERROR", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR", msg),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use xpm_common::ExperimentStatus;

    #[test]
    fn test_common_error_mapping() {
        let conflict: ApiError = CommonError::InvalidTransition {
            from: ExperimentStatus::Live,
            to: ExperimentStatus::Draft,
        }
        .into();
        assert!(matches!(conflict, ApiError::Conflict(_)));

        let stale: ApiError = CommonError::StaleStatus {
            expected: ExperimentStatus::Draft,
            current: ExperimentStatus::Review,
        }
        .into();
        assert!(matches!(stale, ApiError::Conflict(_)));

        let missing: ApiError = CommonError::NotFound("x".to_string()).into();
        assert!(matches!(missing, ApiError::NotFound(_)));

        let bad: ApiError = CommonError::InvalidInput("x".to_string()).into();
        assert!(matches!(bad, ApiError::BadRequest(_)));

        let alloc: ApiError = CommonError::Allocation("x".to_string()).into();
        assert!(matches!(alloc, ApiError::Internal(_)));
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(
            ApiError::BadGateway("down".to_string()).into_response().status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            ApiError::Conflict("no".to_string()).into_response().status(),
            StatusCode::CONFLICT
        );
    }
}
