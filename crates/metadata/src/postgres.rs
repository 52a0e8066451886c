//! PostgreSQL-based metadata store implementation.

use crate::error::MetadataResult;
use crate::models::{FileRow, OperationLogRow, ResourceFileRow, ResourceRow};
use crate::repos::{ClaimOutcome, FileRepo, LinkRepo, OperationLogRepo, ResourceRepo};
use crate::store::MetadataStore;
use async_trait::async_trait;
use depot_core::{FileStatus, OperationStatus, OperationType, ResourceStatus};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{Pool, Postgres};
use time::OffsetDateTime;
use uuid::Uuid;

/// PostgreSQL schema (embedded).
///
/// Applied with `raw_sql` because the `touch_updated_at` trigger function
/// body contains semicolons and cannot survive statement splitting.
const POSTGRES_SCHEMA: &str = include_str!("postgres_schema.sql");

/// PostgreSQL-based metadata store.
///
/// `updated_at` on `resource` and `file` is bumped by a database trigger on
/// every update, so the statements here never set it themselves.
pub struct PostgresStore {
    pool: Pool<Postgres>,
}

impl PostgresStore {
    /// Create a new PostgreSQL store from individual connection parameters.
    pub async fn from_params(
        host: &str,
        port: u16,
        username: Option<&str>,
        password: Option<&str>,
        database: &str,
        max_connections: u32,
        statement_timeout_ms: Option<u64>,
    ) -> MetadataResult<Self> {
        let mut opts = PgConnectOptions::new()
            .host(host)
            .port(port)
            .database(database);

        if let Some(user) = username {
            opts = opts.username(user);
        }

        if let Some(pass) = password {
            opts = opts.password(pass);
        }

        // Bound query runtime so a hung claim or flush cannot wedge a worker.
        if let Some(timeout_ms) = statement_timeout_ms {
            opts = opts.options([("statement_timeout", format!("{timeout_ms}ms"))]);
        }

        tracing::info!(
            host = host,
            port = port,
            database = database,
            username = username.unwrap_or("<none>"),
            "Connecting to PostgreSQL"
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.migrate().await?;

        Ok(store)
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &Pool<Postgres> {
        &self.pool
    }
}

#[async_trait]
impl MetadataStore for PostgresStore {
    async fn migrate(&self) -> MetadataResult<()> {
        sqlx::raw_sql(POSTGRES_SCHEMA).execute(&self.pool).await?;
        Ok(())
    }

    async fn health_check(&self) -> MetadataResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl ResourceRepo for PostgresStore {
    async fn queue_for_storing(&self, id: &str) -> MetadataResult<ResourceRow> {
        let existing =
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE resource_id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;

        match existing {
            None => {
                let row = sqlx::query_as::<_, ResourceRow>(
                    "INSERT INTO resource (resource_id, status) VALUES ($1, $2) RETURNING *",
                )
                .bind(id)
                .bind(ResourceStatus::QueuedForStoring.as_str())
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
                    "UPDATE resource SET status = $2 WHERE resource_id = $1 RETURNING *",
                )
                .bind(id)
                .bind(ResourceStatus::QueuedForStoring.as_str())
                .fetch_one(&self.pool)
                .await?;
                Ok(row)
            }
        }
    }

    async fn queue_for_deletion(&self, id: &str) -> MetadataResult<Option<ResourceRow>> {
        let existing =
            sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE resource_id = $1")
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
            sqlx::query("DELETE FROM resource WHERE resource_id = $1")
                .bind(id)
                .execute(&self.pool)
                .await?;
            return Ok(None);
        }

        let row = sqlx::query_as::<_, ResourceRow>(
            "UPDATE resource SET status = $2 WHERE resource_id = $1 RETURNING *",
        )
        .bind(id)
        .bind(ResourceStatus::QueuedForDeletion.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(Some(row))
    }

    async fn get_resource(&self, id: &str) -> MetadataResult<Option<ResourceRow>> {
        let row = sqlx::query_as::<_, ResourceRow>("SELECT * FROM resource WHERE resource_id = $1")
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
        let mut tx = self.pool.begin().await?;

        // Lock the row only if nothing touched it since the listing; a
        // guard miss means another dispatcher claimed it or a caller
        // mutated it.
        let locked = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resource WHERE resource_id = $1 AND updated_at = $2 FOR UPDATE",
        )
        .bind(id)
        .bind(seen_updated_at)
        .fetch_optional(&mut *tx)
        .await?;

        if locked.is_none() {
            tx.rollback().await?;
            return Ok(ClaimOutcome::NotClaimed);
        }

        sqlx::query("UPDATE resource SET status = $2 WHERE resource_id = $1")
            .bind(id)
            .bind(target.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed)
    }

    async fn list_due(&self, cutoff: OffsetDateTime) -> MetadataResult<Vec<ResourceRow>> {
        let rows = sqlx::query_as::<_, ResourceRow>(
            "SELECT * FROM resource WHERE status <> $1 AND updated_at < $2 ORDER BY updated_at",
        )
        .bind(ResourceStatus::Stored.as_str())
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn reset_progress(&self, id: &str) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE resource SET total_size = 0, stored_size = 0, error = NULL \
             WHERE resource_id = $1",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_total_size(&self, id: &str, total_size: i64) -> MetadataResult<()> {
        sqlx::query("UPDATE resource SET total_size = $2 WHERE resource_id = $1")
            .bind(id)
            .bind(total_size)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn set_stored_size(&self, id: &str, stored_size: i64) -> MetadataResult<()> {
        sqlx::query("UPDATE resource SET stored_size = $2, error = NULL WHERE resource_id = $1")
            .bind(id)
            .bind(stored_size)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn decrement_stored_size(&self, id: &str, by: i64) -> MetadataResult<()> {
        sqlx::query(
            "UPDATE resource SET stored_size = GREATEST(stored_size - $2, 0) \
             WHERE resource_id = $1",
        )
        .bind(id)
        .bind(by)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_resource_status(&self, id: &str, status: ResourceStatus) -> MetadataResult<()> {
        sqlx::query("UPDATE resource SET status = $2 WHERE resource_id = $1")
            .bind(id)
            .bind(status.as_str())
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
        sqlx::query("UPDATE resource SET status = $2, error = $3 WHERE resource_id = $1")
            .bind(id)
            .bind(status.as_str())
            .bind(message)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_resource(&self, id: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM resource WHERE resource_id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl FileRepo for PostgresStore {
    async fn get_file(&self, hash: &str) -> MetadataResult<Option<FileRow>> {
        let row = sqlx::query_as::<_, FileRow>("SELECT * FROM file WHERE hash = $1")
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
        sqlx::query(
            "INSERT INTO file (hash, status, total_size, stored_size, path) \
             VALUES ($1, $2, $3, 0, $4) \
             ON CONFLICT (hash) DO UPDATE SET \
                 status = EXCLUDED.status, \
                 total_size = EXCLUDED.total_size, \
                 path = EXCLUDED.path",
        )
        .bind(hash)
        .bind(FileStatus::Storing.as_str())
        .bind(total_size)
        .bind(path)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn set_file_stored_size(&self, hash: &str, stored_size: i64) -> MetadataResult<()> {
        sqlx::query("UPDATE file SET stored_size = $2 WHERE hash = $1")
            .bind(hash)
            .bind(stored_size)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_file_stored(&self, hash: &str) -> MetadataResult<()> {
        sqlx::query("UPDATE file SET status = $2, stored_size = total_size WHERE hash = $1")
            .bind(hash)
            .bind(FileStatus::Stored.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn mark_file_delete_error(&self, hash: &str) -> MetadataResult<()> {
        sqlx::query("UPDATE file SET status = $2 WHERE hash = $1")
            .bind(hash)
            .bind(FileStatus::DeleteError.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn delete_file(&self, hash: &str) -> MetadataResult<()> {
        sqlx::query("DELETE FROM file WHERE hash = $1")
            .bind(hash)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl LinkRepo for PostgresStore {
    async fn link_file(
        &self,
        resource_id: &str,
        file_hash: &str,
        path: &str,
    ) -> MetadataResult<bool> {
        let result = sqlx::query(
            "INSERT INTO resource_file (resource_id, file_hash, path) VALUES ($1, $2, $3) \
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
            "SELECT * FROM resource_file WHERE resource_id = $1 ORDER BY path",
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
            "SELECT file_hash FROM resource_file WHERE resource_id = $1 AND path = $2",
        )
        .bind(resource_id)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(hash)
    }

    async fn release_file(&self, resource_id: &str, file_hash: &str) -> MetadataResult<bool> {
        let mut tx = self.pool.begin().await?;

        // Lock every link row of this hash so a concurrent delete of another
        // resource cannot race the count below.
        sqlx::query("SELECT 1 FROM resource_file WHERE file_hash = $1 FOR UPDATE")
            .bind(file_hash)
            .fetch_all(&mut *tx)
            .await?;

        let others: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM resource_file WHERE file_hash = $1 AND resource_id <> $2",
        )
        .bind(file_hash)
        .bind(resource_id)
        .fetch_one(&mut *tx)
        .await?;

        if others > 0 {
            tx.commit().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE file SET status = $2, stored_size = 0 WHERE hash = $1")
            .bind(file_hash)
            .bind(FileStatus::Deleting.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(true)
    }
}

#[async_trait]
impl OperationLogRepo for PostgresStore {
    async fn log_operation_start(
        &self,
        resource_id: &str,
        operation: OperationType,
    ) -> MetadataResult<Uuid> {
        let log_id = Uuid::new_v4();
        sqlx::query("INSERT INTO log (log_id, operation_type, resource_id) VALUES ($1, $2, $3)")
            .bind(log_id)
            .bind(operation.as_str())
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
            "UPDATE log SET finished_at = now(), status = $2, error_text = $3 WHERE log_id = $1",
        )
        .bind(log_id)
        .bind(status.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_operation_log(&self, log_id: Uuid) -> MetadataResult<Option<OperationLogRow>> {
        let row = sqlx::query_as::<_, OperationLogRow>("SELECT * FROM log WHERE log_id = $1")
            .bind(log_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row)
    }
}
