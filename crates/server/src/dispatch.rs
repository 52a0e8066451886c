//! Dispatcher: the periodic scanner that claims due resources and emits
//! jobs onto the in-process queue.
//!
//! The dispatcher only moves state; it never talks to the blob store or the
//! upstream API. At most one claim attempt happens per row per tick, and a
//! successful claim is what establishes exclusive ownership of the job.

use crate::worker::Job;
use depot_core::{ResourceStatus, CLAIM_SKEW_SECS};
use depot_metadata::models::ResourceRow;
use depot_metadata::{ClaimOutcome, MetadataResult, MetadataStore, ResourceRepo};
use std::sync::Arc;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Capacity of the in-process job queue. Only the dispatcher writes; only
/// workers read.
pub const JOB_QUEUE_CAPACITY: usize = 1024;

/// Seconds between dispatcher scans.
const DISPATCH_INTERVAL: Duration = Duration::from_secs(5);

/// Periodic claim-and-enqueue loop.
pub struct Dispatcher {
    metadata: Arc<dyn MetadataStore>,
    jobs: mpsc::Sender<Job>,
    shutdown: CancellationToken,
}

impl Dispatcher {
    /// Create a new dispatcher.
    pub fn new(
        metadata: Arc<dyn MetadataStore>,
        jobs: mpsc::Sender<Job>,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            metadata,
            jobs,
            shutdown,
        }
    }

    /// Run until shutdown, scanning every tick.
    pub async fn run(self) {
        tracing::info!("dispatcher started");
        let mut interval = tokio::time::interval(DISPATCH_INTERVAL);
        interval.tick().await;
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("dispatcher stopped");
                    return;
                }
                _ = interval.tick() => {
                    if let Err(err) = self.tick().await {
                        tracing::error!(error = %err, "dispatcher tick failed");
                    }
                }
            }
        }
    }

    /// One scan: claim every due row and enqueue its job.
    pub async fn tick(&self) -> MetadataResult<()> {
        let cutoff =
            OffsetDateTime::now_utc() - time::Duration::seconds(CLAIM_SKEW_SECS as i64);
        let due = self.metadata.list_due(cutoff).await?;
        for row in due {
            if let Err(err) = self.dispatch_row(&row).await {
                tracing::error!(resource_id = %row.resource_id, error = %err, "dispatch failed");
            }
        }
        Ok(())
    }

    async fn dispatch_row(&self, row: &ResourceRow) -> MetadataResult<()> {
        let Ok(status) = ResourceStatus::parse(&row.status) else {
            tracing::warn!(resource_id = %row.resource_id, status = %row.status, "unknown status, skipping");
            return Ok(());
        };

        // Error states wait for the caller to re-arm them; in-flight states
        // belong to a worker (or a dead process, in which case the claim
        // below re-takes them once the skew elapses).
        let Some(target) = status.claim_target() else {
            return Ok(());
        };

        match self
            .metadata
            .claim_for_processing(&row.resource_id, row.updated_at, target)
            .await?
        {
            ClaimOutcome::NotClaimed => {}
            ClaimOutcome::Claimed => {
                let job = Job {
                    resource_id: row.resource_id.clone(),
                    target,
                };
                // The queue is bounded: wait for capacity, never drop.
                tokio::select! {
                    _ = self.shutdown.cancelled() => {}
                    sent = self.jobs.send(job) => {
                        if sent.is_err() {
                            tracing::error!("job queue closed");
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
