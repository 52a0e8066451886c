//! Database models mapping to the metadata schema.

use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

/// Resource record: one logical unit the gateway stores, identified by a
/// client-supplied id (typically a content infohash).
#[derive(Debug, Clone, FromRow)]
pub struct ResourceRow {
    pub resource_id: String,
    /// Snake_case form of [`depot_core::ResourceStatus`].
    pub status: String,
    pub total_size: i64,
    pub stored_size: i64,
    pub error: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Content-addressed file record, shared by every resource that contains a
/// file with the same fingerprint.
#[derive(Debug, Clone, FromRow)]
pub struct FileRow {
    /// Hex fingerprint; also the blob-store key.
    pub hash: String,
    /// Snake_case form of [`depot_core::FileStatus`].
    pub status: String,
    pub total_size: i64,
    pub stored_size: i64,
    /// Last-known path inside some resource. Informational only.
    pub path: Option<String>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

/// Link record: file with `file_hash` appears at `path` inside
/// `resource_id`. The same file may appear at several paths and in many
/// resources.
#[derive(Debug, Clone, FromRow)]
pub struct ResourceFileRow {
    pub resource_id: String,
    pub file_hash: String,
    pub path: String,
}

/// Audit record for one executed store or delete operation.
///
/// `resource_id` is a plain column, not a foreign key, so log rows survive
/// the resource's deletion. `finished_at`, `status`, and `error_text` stay
/// null while the operation is in flight.
#[derive(Debug, Clone, FromRow)]
pub struct OperationLogRow {
    pub log_id: Uuid,
    pub operation_type: String,
    pub started_at: OffsetDateTime,
    pub finished_at: Option<OffsetDateTime>,
    pub resource_id: String,
    pub status: Option<String>,
    pub error_text: Option<String>,
}
