//! Operation log repository.

use crate::error::MetadataResult;
use crate::models::OperationLogRow;
use async_trait::async_trait;
use depot_core::OperationType;
use uuid::Uuid;

/// Repository for the operation audit log.
#[async_trait]
pub trait OperationLogRepo: Send + Sync {
    /// Open a log row for an operation that is starting now.
    async fn log_operation_start(
        &self,
        resource_id: &str,
        operation: OperationType,
    ) -> MetadataResult<Uuid>;

    /// Close a log row: sets `finished_at`, Success/Fail, and the error text
    /// when the operation failed.
    async fn log_operation_finish(
        &self,
        log_id: Uuid,
        error: Option<&str>,
    ) -> MetadataResult<()>;

    /// Load a log row by id.
    async fn get_operation_log(&self, log_id: Uuid) -> MetadataResult<Option<OperationLogRow>>;
}
