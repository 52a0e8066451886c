//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// API error type.
///
/// A tagged taxonomy at the handler boundary: each class carries its HTTP
/// status, so no string sniffing happens on the way out. The response body
/// is the `{"error": "<message>"}` envelope.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("metadata error: {0}")]
    Metadata(#[from] depot_metadata::MetadataError),

    #[error("storage error: {0}")]
    Storage(#[from] depot_storage::StorageError),

    #[error("upstream error: {0}")]
    Upstream(#[from] depot_upstream::UpstreamError),
}

impl ApiError {
    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Metadata(e) => match e {
                depot_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Storage(e) => match e {
                depot_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                depot_storage::StorageError::InvalidRange(_) => StatusCode::RANGE_NOT_SATISFIABLE,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Upstream(e) => match e {
                depot_upstream::UpstreamError::Forbidden(_) => StatusCode::FORBIDDEN,
                depot_upstream::UpstreamError::Parse { .. } => StatusCode::BAD_REQUEST,
                depot_upstream::UpstreamError::Http(e) if e.is_timeout() => {
                    StatusCode::REQUEST_TIMEOUT
                }
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
