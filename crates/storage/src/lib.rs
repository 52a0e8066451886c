//! Blob store abstraction and backends for the depot gateway.
//!
//! This crate provides:
//! - Content-addressed blob storage keyed by file fingerprint
//! - Streaming uploads that never need the length in advance
//! - Range-aware reads for the web-seed proxy
//! - Backends: S3-compatible object stores and the local filesystem

pub mod backends;
pub mod error;
pub mod traits;

pub use backends::{filesystem::FilesystemBackend, s3::S3Backend};
pub use error::{StorageError, StorageResult};
pub use traits::{BlobMeta, BlobObject, BlobStore, ByteStream, ResolvedRange};

use depot_core::config::StorageConfig;
use std::sync::Arc;

/// Create a blob store from configuration.
pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn BlobStore>> {
    config.validate().map_err(StorageError::Config)?;

    match config {
        StorageConfig::Filesystem { path } => {
            let backend = FilesystemBackend::new(path).await?;
            Ok(Arc::new(backend))
        }
        StorageConfig::S3 {
            bucket,
            endpoint,
            region,
            access_key_id,
            secret_access_key,
            force_path_style,
        } => {
            let backend = S3Backend::new(
                bucket,
                endpoint.clone(),
                region.clone(),
                access_key_id.clone(),
                secret_access_key.clone(),
                *force_path_style,
            )
            .await?;
            Ok(Arc::new(backend))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use futures::stream;

    #[tokio::test]
    async fn from_config_filesystem_ok() {
        let temp = tempfile::tempdir().unwrap();
        let config = StorageConfig::Filesystem {
            path: temp.path().join("blobs"),
        };

        let store = from_config(&config).await.unwrap();
        let body: ByteStream = Box::pin(stream::iter(vec![Ok(Bytes::from_static(b"hi"))]));
        store.put("aabb", body).await.unwrap();
        assert!(store.head("aabb", None).await.is_ok());
    }

    #[tokio::test]
    async fn from_config_rejects_partial_credentials() {
        let config = StorageConfig::S3 {
            bucket: "bucket".to_string(),
            endpoint: None,
            region: None,
            access_key_id: Some("access".to_string()),
            secret_access_key: None,
            force_path_style: false,
        };

        match from_config(&config).await {
            Err(StorageError::Config(_)) => {}
            other => panic!("unexpected: {:?}", other.map(|_| ())),
        }
    }
}
