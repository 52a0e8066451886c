//! Worker pool: drains the job queue and runs the store/delete pipelines.
//!
//! Each job runs with two companion tasks: a watchdog that re-reads the
//! resource row and cancels the job when a competing operation flips its
//! status, and (per file upload) a progress flusher that makes live byte
//! counters observable to clients. Every database, upstream, and blob call
//! is a suspension point where cancellation is honoured.

use crate::state::AppState;
use depot_core::fingerprint::{FingerprintBuilder, SamplePlan};
use depot_core::{FileStatus, OperationType, ResourceStatus, CLAIM_SKEW_SECS, LIST_PAGE_SIZE};
use depot_metadata::{
    FileRepo, LinkRepo, MetadataError, MetadataStore, OperationLogRepo, ResourceRepo,
};
use depot_storage::{BlobStore, StorageError};
use depot_upstream::{ByteRange, ItemKind, ListItem, UpstreamError};
use futures::TryStreamExt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Seconds between watchdog status checks.
const WATCHDOG_INTERVAL: Duration = Duration::from_secs(5);

/// Seconds between progress flushes during an upload.
const PROGRESS_FLUSH_INTERVAL: Duration = Duration::from_secs(5);

/// Job descriptor emitted by the dispatcher.
#[derive(Clone, Debug)]
pub struct Job {
    pub resource_id: String,
    /// The in-flight status the dispatcher claimed the row into: Storing or
    /// Deleting.
    pub target: ResourceStatus,
}

/// Errors from a running job.
#[derive(Debug, Error)]
pub enum JobError {
    /// The watchdog tripped or the process is shutting down. The row state
    /// belongs to the competing operation; the job must not touch it.
    #[error("job cancelled")]
    Cancelled,

    #[error(transparent)]
    Metadata(#[from] MetadataError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Upstream(#[from] UpstreamError),

    #[error("{0}")]
    Invalid(String),
}

/// Cancellation scope of one job. Wraps every awaited call so the job
/// aborts at the next suspension point once the token fires.
struct JobContext {
    token: CancellationToken,
}

impl JobContext {
    async fn run<T, E>(&self, fut: impl Future<Output = Result<T, E>>) -> Result<T, JobError>
    where
        JobError: From<E>,
    {
        match self.token.run_until_cancelled(fut).await {
            None => Err(JobError::Cancelled),
            Some(result) => result.map_err(JobError::from),
        }
    }
}

/// Spawn `count` workers draining `receiver` until shutdown.
pub fn spawn_workers(
    state: AppState,
    receiver: mpsc::Receiver<Job>,
    count: usize,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let receiver = Arc::new(Mutex::new(receiver));
    (0..count)
        .map(|index| {
            let worker = Worker::new(state.clone(), shutdown.clone());
            let receiver = receiver.clone();
            tokio::spawn(async move { worker.run(index, receiver).await })
        })
        .collect()
}

/// One cooperative worker.
pub struct Worker {
    state: AppState,
    shutdown: CancellationToken,
}

impl Worker {
    /// Create a worker bound to the given shutdown signal.
    pub fn new(state: AppState, shutdown: CancellationToken) -> Self {
        Self { state, shutdown }
    }

    async fn run(self, index: usize, receiver: Arc<Mutex<mpsc::Receiver<Job>>>) {
        tracing::debug!(worker = index, "worker started");
        loop {
            let job = {
                let mut receiver = receiver.lock().await;
                tokio::select! {
                    _ = self.shutdown.cancelled() => return,
                    job = receiver.recv() => job,
                }
            };
            let Some(job) = job else { return };
            if let Err(err) = self.process_job(&job).await {
                tracing::error!(resource_id = %job.resource_id, error = %err, "process job failed");
            }
        }
    }

    /// Run one job end-to-end: open the operation log, start the watchdog,
    /// run the pipeline, finalize the resource state, close the log.
    pub async fn process_job(&self, job: &Job) -> Result<(), JobError> {
        let operation = OperationType::for_status(job.target);

        // A failed log open is logged but never aborts the job.
        let log_id = match self
            .state
            .metadata
            .log_operation_start(&job.resource_id, operation)
            .await
        {
            Ok(id) => Some(id),
            Err(err) => {
                tracing::warn!(resource_id = %job.resource_id, error = %err, "failed to open operation log");
                None
            }
        };

        let token = self.shutdown.child_token();
        let watchdog = spawn_watchdog(self.state.metadata.clone(), job.clone(), token.clone());
        let ctx = JobContext {
            token: token.clone(),
        };

        tracing::info!(resource_id = %job.resource_id, operation = %operation, "job started");
        let result = match job.target {
            ResourceStatus::Storing => self.handle_store(&ctx, &job.resource_id).await,
            ResourceStatus::Deleting => self.handle_delete(&ctx, &job.resource_id).await,
            other => Err(JobError::Invalid(format!(
                "job claimed into non-in-flight status {other}"
            ))),
        };

        token.cancel();
        let _ = watchdog.await;

        match &result {
            Ok(()) => {
                tracing::info!(resource_id = %job.resource_id, operation = %operation, "job finished");
            }
            Err(JobError::Cancelled) => {
                // The competing operation owns the row now; leave its status
                // alone.
                tracing::info!(resource_id = %job.resource_id, operation = %operation, "job cancelled");
            }
            Err(err) => {
                tracing::error!(resource_id = %job.resource_id, operation = %operation, error = %err, "job failed");
                self.handle_error(&job.resource_id, job.target, err).await;
            }
        }

        if let Some(log_id) = log_id {
            let error_text = result.as_ref().err().map(|err| err.to_string());
            if let Err(err) = self
                .state
                .metadata
                .log_operation_finish(log_id, error_text.as_deref())
                .await
            {
                tracing::warn!(log_id = %log_id, error = %err, "failed to finish operation log");
            }
        }

        result
    }

    /// Mark the resource with the terminal error status and message.
    async fn handle_error(&self, id: &str, target: ResourceStatus, err: &JobError) {
        let status = match target {
            ResourceStatus::Storing => ResourceStatus::StoreError,
            ResourceStatus::Deleting => ResourceStatus::DeleteError,
            _ => return,
        };
        if let Err(update_err) = self
            .state
            .metadata
            .set_resource_error(id, status, &err.to_string())
            .await
        {
            tracing::error!(resource_id = %id, error = %update_err, "update error status failed");
        }
    }

    /// Store pipeline: walk the upstream listing, fingerprint and upload
    /// each file, link it, then mark the resource Stored.
    async fn handle_store(&self, ctx: &JobContext, id: &str) -> Result<(), JobError> {
        let metadata = &self.state.metadata;

        // Counters restart from zero on every (re)store attempt.
        ctx.run(metadata.reset_progress(id)).await?;

        let mut offset: u64 = 0;
        let mut total_size: i64 = 0;
        let mut total_stored: i64 = 0;

        loop {
            let page = ctx
                .run(self
                    .state
                    .upstream
                    .list_resource_content(id, LIST_PAGE_SIZE, offset))
                .await?;

            for item in &page.items {
                if item.kind != ItemKind::File {
                    continue;
                }

                total_size += item.size;
                ctx.run(metadata.set_total_size(id, total_size)).await?;

                let hash = self.store_file(ctx, id, item, total_stored).await?;
                total_stored += item.size;
                ctx.run(metadata.set_stored_size(id, total_stored)).await?;

                let path = crate::normalize_path(&item.path);
                let linked = ctx.run(metadata.link_file(id, &hash, &path)).await?;
                if !linked {
                    tracing::debug!(resource_id = %id, hash = %hash, path = %path, "file already linked");
                }
            }

            // Last page: everything beyond the current offset was returned.
            if page.count.saturating_sub(offset) == page.items.len() as u64 {
                break;
            }
            offset += LIST_PAGE_SIZE;
        }

        ctx.run(metadata.set_resource_status(id, ResourceStatus::Stored))
            .await?;
        Ok(())
    }

    /// Store one file: fingerprint it, dedup against existing file rows,
    /// and stream it into the blob store with progress accounting.
    ///
    /// Returns the file's fingerprint for linking.
    async fn store_file(
        &self,
        ctx: &JobContext,
        id: &str,
        item: &ListItem,
        total_stored: i64,
    ) -> Result<String, JobError> {
        let metadata = &self.state.metadata;

        let export = ctx
            .run(self.state.upstream.export_resource_content(id, &item.id))
            .await?;
        let url = export
            .download_url()
            .ok_or_else(|| {
                JobError::Invalid(format!("upstream export for {} has no download url", item.path))
            })?
            .to_string();
        tracing::debug!(url = %url, "export url");

        let hash = self.fingerprint_file(ctx, &url, item.size).await?;
        tracing::debug!(hash = %hash, "generated fingerprint");

        // Short-circuit: the blob is already stored, or another worker
        // touched the row within the skew window and is actively storing it.
        if let Some(file) = ctx.run(metadata.get_file(&hash)).await? {
            let active_cutoff =
                OffsetDateTime::now_utc() - time::Duration::seconds(CLAIM_SKEW_SECS as i64);
            if file.status == FileStatus::Stored.as_str() || file.updated_at > active_cutoff {
                return Ok(hash);
            }
        }

        let path = crate::normalize_path(&item.path);
        ctx.run(metadata.upsert_storing(&hash, item.size, &path))
            .await?;

        // Progress counter owned by this worker, read by the flusher task.
        let counter = Arc::new(AtomicU64::new(0));
        let flusher_token = ctx.token.child_token();
        let flusher = spawn_progress_flusher(
            metadata.clone(),
            id.to_string(),
            hash.clone(),
            total_stored,
            counter.clone(),
            flusher_token.clone(),
        );

        let upload_result = async {
            let download = ctx.run(self.state.upstream.download(&url, None)).await?;
            let counting = {
                let counter = counter.clone();
                download.inspect_ok(move |chunk| {
                    counter.fetch_add(chunk.len() as u64, Ordering::Relaxed);
                })
            };
            let body: depot_storage::ByteStream =
                Box::pin(counting.map_err(|err| StorageError::Io(std::io::Error::other(err))));
            ctx.run(self.state.blobs.put(&hash, body)).await
        }
        .await;

        // The terminal status write below subsumes the flusher's final
        // flush.
        flusher_token.cancel();
        let _ = flusher.await;
        upload_result?;

        ctx.run(metadata.mark_file_stored(&hash)).await?;
        tracing::info!(
            resource_id = %id,
            path = %item.path,
            key = %hash,
            size = item.size,
            "stored blob"
        );
        Ok(hash)
    }

    /// Compute the size-qualified fingerprint by streaming the sampled
    /// ranges of the download URL.
    async fn fingerprint_file(
        &self,
        ctx: &JobContext,
        url: &str,
        size: i64,
    ) -> Result<String, JobError> {
        let size = u64::try_from(size).unwrap_or(0);
        let mut builder = FingerprintBuilder::new(size);

        match SamplePlan::for_size(size) {
            SamplePlan::Whole => {
                let stream = ctx.run(self.state.upstream.download(url, None)).await?;
                hash_stream(ctx, stream, &mut builder).await?;
            }
            SamplePlan::HeadTail {
                head_end,
                tail_start,
            } => {
                let head = ctx
                    .run(self
                        .state
                        .upstream
                        .download(url, Some(ByteRange::to_exclusive(0, head_end))))
                    .await?;
                hash_stream(ctx, head, &mut builder).await?;

                let tail = ctx
                    .run(self
                        .state
                        .upstream
                        .download(url, Some(ByteRange::from_offset(tail_start))))
                    .await?;
                hash_stream(ctx, tail, &mut builder).await?;
            }
        }

        Ok(builder.finish().to_hex())
    }

    /// Delete pipeline: unlink every file, delete blobs that lost their
    /// last referrer, then remove the resource row.
    async fn handle_delete(&self, ctx: &JobContext, id: &str) -> Result<(), JobError> {
        let metadata = &self.state.metadata;
        let links = ctx.run(metadata.links_for_resource(id)).await?;

        for link in &links {
            // Give back the bytes this file contributed to the resource's
            // progress. Clamped at zero inside a single update.
            if let Some(file) = ctx.run(metadata.get_file(&link.file_hash)).await? {
                ctx.run(metadata.decrement_stored_size(id, file.stored_size))
                    .await?;
            }

            let released = ctx.run(metadata.release_file(id, &link.file_hash)).await?;
            if !released {
                // Still referenced by another resource; the blob stays.
                continue;
            }

            if let Err(err) = ctx.run(self.state.blobs.delete(&link.file_hash)).await {
                if !matches!(err, JobError::Cancelled) {
                    if let Err(mark_err) =
                        metadata.mark_file_delete_error(&link.file_hash).await
                    {
                        tracing::error!(
                            hash = %link.file_hash,
                            error = %mark_err,
                            "failed to record blob delete failure"
                        );
                    }
                }
                return Err(err);
            }
            tracing::info!(resource_id = %id, key = %link.file_hash, path = %link.path, "deleted blob");

            ctx.run(metadata.delete_file(&link.file_hash)).await?;
        }

        // Cascade removes any remaining link rows.
        ctx.run(metadata.delete_resource(id)).await?;
        Ok(())
    }
}

/// Feed a download stream into the fingerprint builder, honouring
/// cancellation between reads.
async fn hash_stream(
    ctx: &JobContext,
    mut stream: depot_upstream::ByteStream,
    builder: &mut FingerprintBuilder,
) -> Result<(), JobError> {
    loop {
        let chunk = ctx.run(stream.try_next()).await?;
        match chunk {
            Some(bytes) => builder.update(&bytes),
            None => return Ok(()),
        }
    }
}

/// Companion task: every tick, confirm the resource row still carries the
/// job's claimed status; cancel the job token exactly once when it diverges
/// or the row is gone.
fn spawn_watchdog(
    metadata: Arc<dyn MetadataStore>,
    job: Job,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(WATCHDOG_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {
                    match metadata.get_resource(&job.resource_id).await {
                        Ok(Some(row)) if row.status == job.target.as_str() => {}
                        Ok(_) => {
                            tracing::info!(
                                resource_id = %job.resource_id,
                                status = %job.target,
                                "status changed, job cancelled"
                            );
                            token.cancel();
                            return;
                        }
                        Err(err) => {
                            tracing::error!(resource_id = %job.resource_id, error = %err, "watchdog status check failed");
                        }
                    }
                }
            }
        }
    })
}

/// Companion task: every tick, flush the upload's byte counter into the
/// file row and the resource row so progress is observable while the
/// upload runs.
fn spawn_progress_flusher(
    metadata: Arc<dyn MetadataStore>,
    resource_id: String,
    hash: String,
    base_stored: i64,
    counter: Arc<AtomicU64>,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PROGRESS_FLUSH_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = token.cancelled() => return,
                _ = interval.tick() => {
                    let stored = counter.load(Ordering::Relaxed) as i64;
                    if let Err(err) = metadata.set_file_stored_size(&hash, stored).await {
                        tracing::error!(hash = %hash, error = %err, "flush file progress failed");
                    }
                    if let Err(err) = metadata
                        .set_stored_size(&resource_id, base_stored + stored)
                        .await
                    {
                        tracing::error!(resource_id = %resource_id, error = %err, "flush resource progress failed");
                    }
                }
            }
        }
    })
}
