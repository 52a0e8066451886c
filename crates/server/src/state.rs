//! Application state shared across handlers, dispatcher, and workers.

use depot_core::config::AppConfig;
use depot_metadata::MetadataStore;
use depot_storage::BlobStore;
use depot_upstream::UpstreamClient;
use std::sync::Arc;

/// Shared application state.
///
/// Constructed once at startup and captured by value in the dispatcher and
/// each worker; released on shutdown in reverse construction order.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration.
    pub config: Arc<AppConfig>,
    /// Metadata store.
    pub metadata: Arc<dyn MetadataStore>,
    /// Blob store.
    pub blobs: Arc<dyn BlobStore>,
    /// Upstream content-listing client.
    pub upstream: UpstreamClient,
}

impl AppState {
    /// Create a new application state.
    pub fn new(
        config: AppConfig,
        metadata: Arc<dyn MetadataStore>,
        blobs: Arc<dyn BlobStore>,
        upstream: UpstreamClient,
    ) -> Self {
        Self {
            config: Arc::new(config),
            metadata,
            blobs,
            upstream,
        }
    }
}
