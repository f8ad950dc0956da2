#[cfg(feature = "memory")]
pub mod memory;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures_core::Stream;
use std::pin::Pin;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::{
    ConversionOutcome, FailureReason, JobEvent, JobId, JobRecord, Progress, QueueResult,
    QueueStats, WorkerId,
};

/// Type alias for boxed streams (stable Rust compatible)
pub type BoxStream<T> = Pin<Box<dyn Stream<Item = T> + Send + 'static>>;

/// Result of `enqueue`: the stored job and whether it was created by this call
#[derive(Debug, Clone)]
pub struct EnqueueOutcome {
    pub record: JobRecord,
    /// `false` when an existing non-terminal job with the same ID was returned
    pub created: bool,
}

/// Retry-vs-terminal decision taken by `fail` and by lock reclamation
#[derive(Debug, Clone)]
pub enum FailOutcome {
    /// Back in the waiting pool until `retry_at`
    Retrying {
        record: JobRecord,
        delay: Duration,
        retry_at: DateTime<Utc>,
    },
    /// Attempts exhausted; terminal
    Failed { record: JobRecord },
}

impl FailOutcome {
    pub fn record(&self) -> &JobRecord {
        match self {
            Self::Retrying { record, .. } | Self::Failed { record } => record,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }
}

/// A job whose lock expired and that was taken away from its worker
#[derive(Debug, Clone)]
pub struct ReclaimedJob {
    pub job_id: JobId,
    pub previous_owner: Option<WorkerId>,
    pub outcome: FailOutcome,
}

/// Storage primitives for the conversion queue.
///
/// Implementations must make `dequeue_next` (select-and-lock) and the
/// retry-vs-terminal decision in `fail`/`reclaim_expired_locks` atomic per
/// job. Every state transition is published on the event bus.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a job; returns the existing one unchanged while it is non-terminal
    async fn enqueue(&self, job: JobRecord) -> QueueResult<EnqueueOutcome>;

    /// Claim the best eligible job: lowest priority value, then FIFO
    async fn dequeue_next(&self, worker_id: &WorkerId) -> QueueResult<Option<JobRecord>>;

    /// Extend the caller's lock; returns the new expiry
    async fn renew_lock(&self, job_id: &JobId, worker_id: &WorkerId) -> QueueResult<DateTime<Utc>>;

    /// Update progress without touching state; only the current lock holder may
    async fn report_progress(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        progress: Progress,
    ) -> QueueResult<()>;

    /// Mark an active job completed
    async fn complete(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        outcome: ConversionOutcome,
    ) -> QueueResult<JobRecord>;

    /// Record a failed attempt and decide between retry and terminal failure
    async fn fail(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        reason: FailureReason,
    ) -> QueueResult<FailOutcome>;

    /// Return every active job with an expired lock to the retry path
    async fn reclaim_expired_locks(&self) -> QueueResult<Vec<ReclaimedJob>>;

    /// Get full job record
    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>>;

    /// Job counts by state
    async fn stats(&self) -> QueueResult<QueueStats>;

    /// Completed and failed jobs the store still holds
    async fn finished_jobs(&self) -> QueueResult<Vec<JobRecord>>;

    /// Administrative removal, independent of the lifecycle
    async fn remove_job(&self, job_id: &JobId) -> QueueResult<bool>;

    /// Subscribe to lifecycle events
    fn subscribe(&self) -> broadcast::Receiver<JobEvent>;

    /// Event stream for observability; lagged events are skipped
    fn event_stream(&self) -> BoxStream<JobEvent> {
        use tokio_stream::{wrappers::BroadcastStream, StreamExt};
        let stream = BroadcastStream::new(self.subscribe()).filter_map(|result| result.ok());

        Box::pin(stream)
    }

    /// Release underlying resources; later calls fail with `QueueUnavailable`
    async fn close(&self);
}
