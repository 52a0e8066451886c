//! Resource/file link repository.

use crate::error::MetadataResult;
use crate::models::ResourceFileRow;
use async_trait::async_trait;

/// Repository for resource/file link rows and reference counting.
#[async_trait]
pub trait LinkRepo: Send + Sync {
    /// Link a file into a resource at the given path.
    ///
    /// Returns `false` when the link already exists; duplicate-key races are
    /// treated as "already linked", never as errors.
    async fn link_file(&self, resource_id: &str, file_hash: &str, path: &str)
        -> MetadataResult<bool>;

    /// All links belonging to a resource.
    async fn links_for_resource(&self, resource_id: &str)
        -> MetadataResult<Vec<ResourceFileRow>>;

    /// Resolve the file hash serving `path` inside a resource.
    async fn find_file_hash(&self, resource_id: &str, path: &str)
        -> MetadataResult<Option<String>>;

    /// Decide whether `resource_id` is the last referrer of `file_hash` and,
    /// if so, mark the file Deleting with `stored_size = 0`.
    ///
    /// The reference count and the status flip run in one transaction that
    /// locks the matching link rows, so a concurrent delete of another
    /// resource cannot double-release the file. Returns `true` when the
    /// caller now owns the blob deletion.
    async fn release_file(&self, resource_id: &str, file_hash: &str) -> MetadataResult<bool>;
}
