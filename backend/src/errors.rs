use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use merkle_groups::tree::TreeError;
use serde::Serialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("conflict: {0}")]
    Conflict(String),

    /// A backing read (participant source or archive) failed. Retryable;
    /// no state was mutated.
    #[error("participant source unavailable: {0}")]
    SourceUnavailable(String),

    /// A reload trigger gave up waiting. The reload itself keeps running to
    /// completion in the background, so state may still change shortly after.
    #[error("timed out waiting for reload")]
    ReloadTimeout,

    /// Group membership outgrew the fixed tree depth. Requires operator
    /// intervention; never handled silently.
    #[error("group capacity exceeded: capacity {capacity}, got {got} members")]
    CapacityExceeded { capacity: usize, got: usize },

    /// A historic snapshot could not be persisted. The reload publishes
    /// nothing, so no root ever becomes current without an archived snapshot.
    #[error("history archive write failed: {0}")]
    ArchiveWriteFailure(String),

    #[error("internal error")]
    Internal,
}

impl From<TreeError> for ApiError {
    fn from(e: TreeError) -> Self {
        match e {
            TreeError::CapacityExceeded { capacity, got } => {
                ApiError::CapacityExceeded { capacity, got }
            }
        }
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Conflict(m) => (StatusCode::CONFLICT, m.clone()),
            ApiError::SourceUnavailable(m) => (StatusCode::SERVICE_UNAVAILABLE, m.clone()),
            ApiError::ReloadTimeout => (StatusCode::SERVICE_UNAVAILABLE, self.to_string()),
            ApiError::CapacityExceeded { .. } => {
                (StatusCode::INTERNAL_SERVER_ERROR, self.to_string())
            }
            ApiError::ArchiveWriteFailure(m) => {
                (StatusCode::INTERNAL_SERVER_ERROR, format!("archive write failed: {m}"))
            }
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}
