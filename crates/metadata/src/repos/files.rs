//! File repository.

use crate::error::MetadataResult;
use crate::models::FileRow;
use async_trait::async_trait;

/// Repository for content-addressed file rows.
#[async_trait]
pub trait FileRepo: Send + Sync {
    /// Load a file by fingerprint.
    async fn get_file(&self, hash: &str) -> MetadataResult<Option<FileRow>>;

    /// Insert or update a file entering the Storing state. Duplicate-key
    /// races between workers collapse into the update arm.
    async fn upsert_storing(&self, hash: &str, total_size: i64, path: &str)
        -> MetadataResult<()>;

    /// Flush upload progress.
    async fn set_file_stored_size(&self, hash: &str, stored_size: i64) -> MetadataResult<()>;

    /// Finalize a completed upload: Stored with `stored_size = total_size`.
    async fn mark_file_stored(&self, hash: &str) -> MetadataResult<()>;

    /// Record a failed blob deletion.
    async fn mark_file_delete_error(&self, hash: &str) -> MetadataResult<()>;

    /// Remove the file row. Remaining link rows cascade.
    async fn delete_file(&self, hash: &str) -> MetadataResult<()>;
}
