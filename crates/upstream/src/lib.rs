//! Client for the upstream content-listing API.
//!
//! The upstream expands a resource id into its file listing, hands out
//! signed per-item download URLs, and serves the bytes with range support.
//! Requests are authenticated with a short-lived HS256 token (`X-Token`)
//! plus an API key (`X-Api-Key`).

pub mod client;
pub mod error;
pub mod types;

pub use client::{ByteStream, UpstreamClient};
pub use error::{UpstreamError, UpstreamResult};
pub use types::{ByteRange, ExportItem, ExportResponse, ItemKind, ListItem, ListResponse};
