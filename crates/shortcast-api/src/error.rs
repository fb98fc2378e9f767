//! API error mapping

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use shortcast_core::error::JobStoreError;

/// Typed failures surfaced to HTTP clients as `{ "error": ... }` JSON
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Conflict(String),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl From<JobStoreError> for ApiError {
    fn from(err: JobStoreError) -> Self {
        match err {
            JobStoreError::NotFound(_) => Self::NotFound(err.to_string()),
            JobStoreError::Conflict { .. } => Self::Conflict(err.to_string()),
            other => Self::Internal(other.into()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::Internal(err) => {
                tracing::error!(error = %err, "request failed");
                StatusCode::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_errors_map_to_status() {
        let not_found: ApiError = JobStoreError::NotFound("job-1".into()).into();
        assert!(matches!(not_found, ApiError::NotFound(_)));

        let conflict: ApiError = JobStoreError::Conflict {
            job_id: "job-1".into(),
            status: "queued".into(),
            expected: "waiting_review".into(),
        }
        .into();
        assert!(matches!(conflict, ApiError::Conflict(_)));
    }
}
