//! Upstream client error types.

use thiserror::Error;

/// Errors from the upstream content-listing API.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("access is forbidden url={0}")]
    Forbidden(String),

    #[error("failed to parse status={status} url={url}: {source}")]
    Parse {
        status: u16,
        url: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("upstream error: {0}")]
    Api(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("token signing error: {0}")]
    Token(#[from] jsonwebtoken::errors::Error),

    #[error("invalid url: {0}")]
    InvalidUrl(String),
}

/// Result type for upstream operations.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;
