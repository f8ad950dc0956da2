use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::{store::QueueStore, JobId, Progress, QueueResult, WorkerId};

/// Execution context handed to the conversion routine for one attempt
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: JobId,

    /// 1-based attempt number
    pub attempt: u32,

    pub worker_id: WorkerId,

    /// Progress sink for this job
    pub progress: ProgressReporter,

    /// Cancelled when the worker lost its lock or is abandoning the job on
    /// shutdown. Long conversions may check it to stop early.
    pub cancellation: CancellationToken,
}

impl JobContext {
    /// Shorthand for `self.progress.report(..)`
    pub async fn report_progress(&self, percent: u8, stage: &str) -> QueueResult<()> {
        self.progress.report(percent, stage).await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Writes progress for a single job to the queue store
#[derive(Clone)]
pub struct ProgressReporter {
    store: Arc<dyn QueueStore>,
    job_id: JobId,
    worker_id: WorkerId,
}

impl ProgressReporter {
    pub fn new(store: Arc<dyn QueueStore>, job_id: JobId, worker_id: WorkerId) -> Self {
        Self {
            store,
            job_id,
            worker_id,
        }
    }

    /// Fails with `LockNotOwned` once this worker no longer holds the job
    pub async fn report(&self, percent: u8, stage: &str) -> QueueResult<()> {
        self.store
            .report_progress(&self.job_id, &self.worker_id, Progress::new(percent, stage))
            .await
    }
}

impl std::fmt::Debug for ProgressReporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressReporter")
            .field("job_id", &self.job_id)
            .field("worker_id", &self.worker_id)
            .finish_non_exhaustive()
    }
}
