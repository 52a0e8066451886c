//! Metadata store trait and the SQLite implementation.

use crate::error::MetadataResult;
use crate::models::{FileRow, OperationLogRow, ResourceFileRow, ResourceRow};
use crate::repos::{ClaimOutcome, FileRepo, LinkRepo, OperationLogRepo, ResourceRepo};
use async_trait::async_trait;
use depot_core::{FileStatus, OperationStatus, OperationType, ResourceStatus};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use time::OffsetDateTime;
use uuid::Uuid;

/// SQLite schema (embedded).
const SQLITE_SCHEMA: &str = include_str!("sqlite_schema.sql");

/// Combined metadata store trait.
#[async_trait]
pub trait MetadataStore:
    ResourceRepo + FileRepo + LinkRepo + OperationLogRepo + Send + Sync
{
    /// Apply the schema and any pending migrations.
    async fn migrate(&self) -> MetadataResult<()>;

    /// Check database connectivity and health.
    async fn health_check(&self) -> MetadataResult<()>;
}

/// SQLite-based metadata store.
///
/// Suitable for tests and single-node deployments. Unlike PostgreSQL there
/// is no trigger bumping `updated_at`; every UPDATE statement here sets it
/// explicitly from the application clock so the stored text form always
/// matches what sqlx binds, which the claim guard's equality compare relies
/// on.
pub struct SqliteStore {
    pool: Pool<Sqlite>,
}

impl SqliteStore {
    /// Create a new SQLite store.
    pub async fn new(path: impl AsRef<Path>) -> MetadataResult<Self> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                crate::error::MetadataError::Config(format!(
                    "failed to create database directory: {e}"
                ))
            })?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{}?mode=rwc", path.display()))?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .foreign_keys(true)
            // Prevent transient "database is locked" errors under concurrent access.
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            // SQLite permits limited write concurrency; a single connection
            // avoids persistent "database is locked" failures under worker
            // and axum concurrency.
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for SqliteStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(SQLITE_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceRepo for SqliteStore {
    async fn queue_for_storing(&self, id: &str) -> MetadataResult<ResourceRow> {
        let existing =
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE resource_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let now = OffsetDateTime::now_utc();
        match existing {
            None => {
                let row = sqlx::query_as::<_, ResourceRow>(
                    "INSERT INTO resource (resource_id, status, created_at, updated_at) \
                     VALUES (?, ?, ?, ?) RETURNING *",
                )
                .bind(id)
                .bind(ResourceStatus::QueuedForStoring.as_str())
                .bind(now)
                .bind(now)
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }
            Some(row)
                if row.status == ResourceStatus::QueuedForStoring.as_str()
                    || row.status == ResourceStatus::Storing.as_str()
                    || row.status == ResourceStatus::Stored.as_str() =>
            {
                Ok(row)
            }
            Some(_) => {
                let row = sqlx::query_as::<_, ResourceRow>(
                    "UPDATE resource SET status = ?, updated_at = ? \
                     WHERE resource_id = ? RETURNING *",
                )
                .bind(ResourceStatus::QueuedForStoring.as_str())
                .bind(now)
                .bind(id)
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }
        }
    }

    async fn queue_for_deletion(&self, id: &str) -> MetadataResult<Option<ResourceRow>> {
        let existing =
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE resource_id = ?")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        let Some(row) = existing else {
            return Ok(None);
        };

        if row.status == ResourceStatus::QueuedForDeletion.as_str()
            || row.status == ResourceStatus::Deleting.as_str()
        {
            return Ok(Some(row));
        }

        // A store that never started is cancelled outright.
        if row.status == ResourceStatus::QueuedForStoring.as_str() {
            sqlx::query("DELETE FROM resource WHERE resource_id = ?")
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, ResourceRow>(
            "UPDATE resource SET status = ?, updated_at = ? WHERE resource_id = ? RETURNING *",
        )
        .bind(ResourceStatus::QueuedForDeletion.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(row))
    }

    async fn get_resource(&self, id: &str) -> MetadataResult<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE resource_id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn claim_for_processing(
        &self,
        id: &str,
        seen_updated_at: OffsetDateTime,
        target: ResourceStatus,
    ) -> MetadataResult<ClaimOutcome> {
        // SQLite writes are serialized on the single pooled connection, so a
        // guarded UPDATE is equivalent to the SELECT FOR UPDATE dance the
        // PostgreSQL store performs.
        let result = sqlx::query(
            "UPDATE resource SET status = ?, updated_at = ? \
             WHERE resource_id = ? AND updated_at = ?",
        )
        .bind(target.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .bind(seen_updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(ClaimOutcome::Claimed)
        } else {
            Ok(ClaimOutcome::NotClaimed)
        }
    }

    async fn list_due(&self, cutoff: OffsetDateTime) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resource WHERE status <> ? AND updated_at < ? ORDER BY updated_at",
        )
        .bind(ResourceStatus::Stored.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reset_progress(&self, id: &str) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE resource SET total_size = 0, stored_size = 0, error = NULL, updated_at = ? \
             WHERE resource_id = ?",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_total_size(&self, id: &str, total_size: i64) -> MetadataResult<()> {
        sqlx::query("UPDATE resource SET total_size = ?, updated_at = ? WHERE resource_id = ?")
            .bind(total_size)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_stored_size(&self, id: &str, stored_size: i64) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE resource SET stored_size = ?, error = NULL, updated_at = ? \
             WHERE resource_id = ?",
        )
        .bind(stored_size)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn decrement_stored_size(&self, id: &str, by: i64) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE resource SET stored_size = MAX(stored_size - ?, 0), updated_at = ? \
             WHERE resource_id = ?",
        )
        .bind(by)
        .bind(OffsetDateTime::now_utc())
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_resource_status(&self, id: &str, status: ResourceStatus) -> MetadataResult<()> {
        sqlx::query("UPDATE resource SET status = ?, updated_at = ? WHERE resource_id = ?")
            .bind(status.as_str())
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_resource_error(
        &self,
        id: &str,
        status: ResourceStatus,
        message: &str,
    ) -> MetadataResult<()> {
        sqlx::query("UPDATE resource SET status = ?, error = ?, updated_at = ? WHERE resource_id = ?")
            .bind(status.as_str())
            .bind(message)
            .bind(OffsetDateTime::now_utc())
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, id: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM resource WHERE resource_id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for SqliteStore {
    async fn get_file(&self, hash: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM file WHERE hash = ?")
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }

    async fn upsert_storing(
        &self,
        hash: &str,
        total_size: i64,
        path: &str,
    ) -> MetadataResult<()> {
        let now = OffsetDateTime::now_utc();
        sqlx::query(
            "INSERT INTO file (hash, status, total_size, stored_size, path, created_at, updated_at) \
             VALUES (?, ?, ?, 0, ?, ?, ?) \
             ON CONFLICT (hash) DO UPDATE SET \
                 status = excluded.status, \
                 total_size = excluded.total_size, \
                 path = excluded.path, \
                 updated_at = excluded.updated_at",
        )
        .bind(hash)
        .bind(FileStatus::Storing.as_str())
        .bind(total_size)
        .bind(path)
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_file_stored_size(&self, hash: &str, stored_size: i64) -> MetadataResult<()> {
        sqlx::query("UPDATE file SET stored_size = ?, updated_at = ? WHERE hash = ?")
            .bind(stored_size)
            .bind(OffsetDateTime::now_utc())
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_file_stored(&self, hash: &str) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE file SET status = ?, stored_size = total_size, updated_at = ? WHERE hash = ?",
        )
        .bind(FileStatus::Stored.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_file_delete_error(&self, hash: &str) -> MetadataResult<()> {
        sqlx::query("UPDATE file SET status = ?, updated_at = ? WHERE hash = ?")
            .bind(FileStatus::DeleteError.as_str())
            .bind(OffsetDateTime::now_utc())
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, hash: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM file WHERE hash = ?")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LinkRepo for SqliteStore {
    async fn link_file(
        &self,
        resource_id: &str,
        file_hash: &str,
        path: &str,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "INSERT INTO resource_file (resource_id, file_hash, path) VALUES (?, ?, ?) \
             ON CONFLICT DO NOTHING",
        )
        .bind(resource_id)
        .bind(file_hash)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn links_for_resource(
        &self,
        resource_id: &str,
    ) -> MetadataResult<Vec<ResourceFileRow>> {
        let rows = sqlx::query_as::<_, ResourceFileRow>(
            "SELECT * FROM resource_file WHERE resource_id = ? ORDER BY path",
        )
        .bind(resource_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn find_file_hash(
        &self,
        resource_id: &str,
        path: &str,
    ) -> MetadataResult<Option<String>> {
        let hash: Option<String> = sqlx::query_scalar(
            "SELECT file_hash FROM resource_file WHERE resource_id = ? AND path = ?",
        )
        .bind(resource_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn release_file(&self, resource_id: &str, file_hash: &str) -> MetadataResult<bool> {
        // The single pooled connection serializes this transaction against
        // every other write, standing in for PostgreSQL's FOR UPDATE locks.
        let mut tx = self.pool.begin().await?;

        let others: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM resource_file WHERE file_hash = ? AND resource_id <> ?",
        )
        .bind(file_hash)
        .bind(resource_id)
        .fetch_one(&mut *tx)
        .await?;

        if others > 0 {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE file SET status = ?, stored_size = 0, updated_at = ? WHERE hash = ?")
            .bind(FileStatus::Deleting.as_str())
            .bind(OffsetDateTime::now_utc())
            .bind(file_hash)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl OperationLogRepo for SqliteStore {
    async fn log_operation_start(
        &self,
        resource_id: &str,
        operation: OperationType,
    ) -> MetadataResult<Uuid> {
        let log_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO log (log_id, operation_type, started_at, resource_id) \
             VALUES (?, ?, ?, ?)",
        )
        .bind(log_id)
        .bind(operation.as_str())
        .bind(OffsetDateTime::now_utc())
        .bind(resource_id)
        .execute(&self.pool)
        .await?;
        Ok(log_id)
    }

    async fn log_operation_finish(
        &self,
        log_id: Uuid,
        error: Option<&str>,
    ) -> MetadataResult<()> {
        let status = if error.is_some() {
            OperationStatus::Fail
        } else {
            OperationStatus::Success
        };
        sqlx::query(
            "UPDATE log SET finished_at = ?, status = ?, error_text = ? WHERE log_id = ?",
        )
        .bind(OffsetDateTime::now_utc())
        .bind(status.as_str())
        .bind(error)
        .bind(log_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_operation_log(&self, log_id: Uuid) -> MetadataResult<Option<OperationLogRow>> {
        let row = sqlx::query_as::<_, OperationLogRow>("SELECT * FROM log WHERE log_id = ?")
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
