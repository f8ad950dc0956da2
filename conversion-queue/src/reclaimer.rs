use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    observability::LiveMetrics,
    store::{FailOutcome, QueueStore},
    QueueResult,
};

/// Periodically returns jobs whose worker stopped renewing its lock to the
/// retry path. A reclaimed job consumes an attempt like any other failure.
pub struct StalledJobReclaimer {
    store: Arc<dyn QueueStore>,
    interval: Duration,
    metrics: Arc<LiveMetrics>,
}

impl StalledJobReclaimer {
    /// Create a new reclaimer
    pub fn new(store: Arc<dyn QueueStore>, metrics: Arc<LiveMetrics>) -> Self {
        Self {
            store,
            interval: Duration::from_secs(30), // Run every 30 seconds
            metrics,
        }
    }

    /// Create reclaimer with custom interval
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Start the reclaimer background task
    pub fn spawn(self, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(shutdown))
    }

    /// Tick until `shutdown` is cancelled
    pub async fn run(self, shutdown: CancellationToken) {
        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("Starting stalled job reclaimer with interval: {:?}", self.interval);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.run_once().await {
                Ok(count) if count > 0 => info!("Reclaimed {} stalled jobs", count),
                Ok(_) => debug!("No stalled jobs found"),
                Err(e) => warn!("Error during stalled job reclamation: {}", e),
            }
        }

        debug!("Stalled job reclaimer stopped");
    }

    /// Run one reclamation cycle
    pub async fn run_once(&self) -> QueueResult<usize> {
        let reclaimed = self.store.reclaim_expired_locks().await?;

        for job in &reclaimed {
            match &job.outcome {
                FailOutcome::Retrying { record, delay, .. } => {
                    self.metrics.increment_jobs_retried();
                    warn!(
                        job_id = %job.job_id,
                        previous_owner = ?job.previous_owner,
                        attempts_made = record.attempts_made,
                        "Job stalled, retrying in {:?}",
                        delay
                    );
                }
                FailOutcome::Failed { record } => {
                    self.metrics.increment_jobs_failed();
                    warn!(
                        job_id = %job.job_id,
                        previous_owner = ?job.previous_owner,
                        attempts_made = record.attempts_made,
                        "Job stalled on its last attempt, marked failed"
                    );
                }
            }
        }

        self.metrics.add_jobs_stalled(reclaimed.len() as u64);
        Ok(reclaimed.len())
    }
}
