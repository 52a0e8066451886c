//! Resource repository.

use crate::error::MetadataResult;
use crate::models::ResourceRow;
use async_trait::async_trait;
use depot_core::ResourceStatus;
use time::OffsetDateTime;

/// Result of a claim attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The row was transitioned to the in-flight status; the caller owns the
    /// job.
    Claimed,
    /// The row is gone or was mutated since it was listed; skip it.
    NotClaimed,
}

/// Repository for resource rows and the claim protocol.
#[async_trait]
pub trait ResourceRepo: Send + Sync {
    /// Queue a resource for storing.
    ///
    /// Inserts a new row in QueuedForStoring, no-ops when the current status
    /// is already QueuedForStoring, Storing, or Stored, and re-arms any
    /// other status (error states, queued deletion) back to QueuedForStoring.
    async fn queue_for_storing(&self, id: &str) -> MetadataResult<ResourceRow>;

    /// Queue a resource for deletion.
    ///
    /// Absent rows return `None`. QueuedForDeletion/Deleting rows no-op. A
    /// row still in QueuedForStoring is removed outright (the store never
    /// started) and `None` is returned. Anything else transitions to
    /// QueuedForDeletion.
    async fn queue_for_deletion(&self, id: &str) -> MetadataResult<Option<ResourceRow>>;

    /// Load a resource by id.
    async fn get_resource(&self, id: &str) -> MetadataResult<Option<ResourceRow>>;

    /// Transactionally claim a due resource for processing.
    ///
    /// Locks the row by primary key guarded by `updated_at =
    /// seen_updated_at`; a failed guard means another dispatcher claimed it
    /// or a caller mutated it since listing, and the row is left untouched.
    async fn claim_for_processing(
        &self,
        id: &str,
        seen_updated_at: OffsetDateTime,
        target: ResourceStatus,
    ) -> MetadataResult<ClaimOutcome>;

    /// List rows that are due for dispatch: status is not Stored and the row
    /// has not been touched since `cutoff`.
    async fn list_due(&self, cutoff: OffsetDateTime) -> MetadataResult<Vec<ResourceRow>>;

    /// Reset byte counters and clear the error before (re)storing.
    async fn reset_progress(&self, id: &str) -> MetadataResult<()>;

    /// Persist the accumulated total size.
    async fn set_total_size(&self, id: &str, total_size: i64) -> MetadataResult<()>;

    /// Persist the accumulated stored size and clear the error.
    async fn set_stored_size(&self, id: &str, stored_size: i64) -> MetadataResult<()>;

    /// Decrement the stored size, clamped at zero, in a single update.
    async fn decrement_stored_size(&self, id: &str, by: i64) -> MetadataResult<()>;

    /// Set the resource status.
    async fn set_resource_status(&self, id: &str, status: ResourceStatus) -> MetadataResult<()>;

    /// Set a terminal error status together with its message.
    async fn set_resource_error(
        &self,
        id: &str,
        status: ResourceStatus,
        message: &str,
    ) -> MetadataResult<()>;

    /// Remove the resource row. Link rows cascade.
    async fn delete_resource(&self, id: &str) -> MetadataResult<()>;
}
