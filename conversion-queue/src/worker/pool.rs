use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use futures::FutureExt;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use super::{JobContext, ProgressReporter};
use crate::{
    collaborators::ConversionExecutor,
    config::{SchedulerConfig, ShutdownPolicy},
    observability::LiveMetrics,
    store::{FailOutcome, QueueStore},
    ConversionError, ConversionOutcome, FailureReason, JobId, JobRecord, Progress, QueueError,
    QueueResult, WorkerId,
};

/// How an attempt ended from the worker's side
enum AttemptEnd {
    Finished(Result<ConversionOutcome, ConversionError>),
    LockLost,
    Abandoned,
}

/// Fixed-size pool of workers pulling conversion jobs from the store.
///
/// Each worker runs at most one job at a time, so `concurrency` bounds the
/// number of conversions in flight.
pub struct WorkerPool {
    store: Arc<dyn QueueStore>,
    executor: Arc<dyn ConversionExecutor>,
    metrics: Arc<LiveMetrics>,
    config: SchedulerConfig,

    /// Stops workers from taking new jobs
    stop: CancellationToken,
    /// Interrupts in-flight jobs
    abort: CancellationToken,

    handles: Vec<JoinHandle<()>>,
    worker_ids: Vec<WorkerId>,
}

impl WorkerPool {
    pub fn new(
        store: Arc<dyn QueueStore>,
        executor: Arc<dyn ConversionExecutor>,
        metrics: Arc<LiveMetrics>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            store,
            executor,
            metrics,
            config,
            stop: CancellationToken::new(),
            abort: CancellationToken::new(),
            handles: Vec::new(),
            worker_ids: Vec::new(),
        }
    }

    /// Spawn `concurrency` workers, each with its own worker ID
    pub fn start(&mut self) -> QueueResult<()> {
        if self.stop.is_cancelled() {
            return Err(QueueError::WorkerShutdown);
        }
        if !self.handles.is_empty() {
            return Err(QueueError::Internal("worker pool already started".to_string()));
        }
        self.config.validate()?;

        for slot in 0..self.config.concurrency {
            let worker = Worker {
                id: WorkerId::new(&self.config.pool_name, slot),
                store: self.store.clone(),
                executor: self.executor.clone(),
                metrics: self.metrics.clone(),
                renew_interval: self.config.lock_renew_interval,
                poll_interval: self.config.poll_interval,
            };
            self.worker_ids.push(worker.id.clone());
            self.handles
                .push(tokio::spawn(worker.run(self.stop.clone(), self.abort.clone())));
        }

        info!(
            "Started {} workers for pool {}",
            self.config.concurrency, self.config.pool_name
        );
        Ok(())
    }

    pub fn worker_ids(&self) -> &[WorkerId] {
        &self.worker_ids
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && !self.stop.is_cancelled()
    }

    /// Stop taking jobs and wait for every worker to exit.
    ///
    /// With [`ShutdownPolicy::Drain`] in-flight jobs finish normally. With
    /// [`ShutdownPolicy::Abandon`] they are dropped where they stand and come
    /// back through lock reclamation once their lock expires.
    pub async fn shutdown(&mut self, policy: ShutdownPolicy) {
        info!(?policy, "Shutting down worker pool {}", self.config.pool_name);

        self.stop.cancel();
        if policy == ShutdownPolicy::Abandon {
            self.abort.cancel();
        }

        let handles = std::mem::take(&mut self.handles);
        for result in join_all(handles).await {
            if let Err(e) = result {
                error!("Worker task ended abnormally: {}", e);
            }
        }
        debug!("Worker pool {} stopped", self.config.pool_name);
    }
}

struct Worker {
    id: WorkerId,
    store: Arc<dyn QueueStore>,
    executor: Arc<dyn ConversionExecutor>,
    metrics: Arc<LiveMetrics>,
    renew_interval: Duration,
    poll_interval: Duration,
}

impl Worker {
    async fn run(self, stop: CancellationToken, abort: CancellationToken) {
        debug!(worker_id = %self.id, "Worker started");

        while !stop.is_cancelled() {
            match self.store.dequeue_next(&self.id).await {
                Ok(Some(record)) => {
                    self.process(record, &abort).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => warn!(worker_id = %self.id, "Dequeue failed: {}", e),
            }

            tokio::select! {
                _ = stop.cancelled() => break,
                _ = sleep(self.poll_interval) => {}
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }

    #[instrument(
        skip_all,
        fields(job_id = %record.job_id, worker_id = %self.id, attempt = record.attempts_made + 1)
    )]
    async fn process(&self, record: JobRecord, abort: &CancellationToken) {
        let job_id = record.job_id.clone();
        let ctx = JobContext {
            job_id: job_id.clone(),
            attempt: record.attempts_made + 1,
            worker_id: self.id.clone(),
            progress: ProgressReporter::new(self.store.clone(), job_id.clone(), self.id.clone()),
            cancellation: abort.child_token(),
        };

        if let Err(e) = self.store.report_progress(&job_id, &self.id, Progress::initializing()).await {
            debug!("Could not report initial progress: {}", e);
        }

        let started = Instant::now();
        match self.execute_with_renewal(&record, &ctx, abort).await {
            AttemptEnd::Finished(result) => self.finish(&job_id, result, started.elapsed()).await,
            AttemptEnd::LockLost => {
                ctx.cancellation.cancel();
                self.metrics.increment_jobs_abandoned();
                debug!("Lock lost, abandoning job");
            }
            AttemptEnd::Abandoned => {
                ctx.cancellation.cancel();
                self.metrics.increment_jobs_abandoned();
                info!("Abandoning in-flight job on shutdown");
            }
        }
    }

    /// Run the conversion while renewing the lock every `renew_interval`
    async fn execute_with_renewal(
        &self,
        record: &JobRecord,
        ctx: &JobContext,
        abort: &CancellationToken,
    ) -> AttemptEnd {
        let execution = AssertUnwindSafe(self.executor.execute(&record.payload, ctx)).catch_unwind();
        tokio::pin!(execution);

        let mut renewal = interval_at(Instant::now() + self.renew_interval, self.renew_interval);
        renewal.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                result = &mut execution => {
                    return AttemptEnd::Finished(result.unwrap_or_else(|panic| {
                        Err(ConversionError::failed(panic_message(panic.as_ref())))
                    }));
                }
                _ = renewal.tick() => {
                    match self.store.renew_lock(&record.job_id, &self.id).await {
                        Ok(expires_at) => debug!(%expires_at, "Lock renewed"),
                        Err(e) if e.is_lock_lost() => return AttemptEnd::LockLost,
                        Err(e) => warn!("Lock renewal failed, will retry: {}", e),
                    }
                }
                _ = abort.cancelled() => return AttemptEnd::Abandoned,
            }
        }
    }

    async fn finish(
        &self,
        job_id: &JobId,
        result: Result<ConversionOutcome, ConversionError>,
        elapsed: Duration,
    ) {
        let reason = match result {
            Ok(outcome) if outcome.success => {
                let outcome = match outcome.conversion_time {
                    Some(_) => outcome,
                    None => outcome.with_conversion_time(elapsed),
                };
                match self.store.complete(job_id, &self.id, outcome).await {
                    Ok(_) => {
                        self.metrics.increment_jobs_completed();
                        info!("Job completed in {:?}", elapsed);
                    }
                    Err(e) => self.on_store_error(e),
                }
                return;
            }
            Ok(outcome) => FailureReason::execution(
                outcome
                    .error
                    .unwrap_or_else(|| "conversion reported failure".to_string()),
            ),
            Err(e) => FailureReason::execution(e.to_string()),
        };

        match self.store.fail(job_id, &self.id, reason).await {
            Ok(FailOutcome::Retrying { record, delay, .. }) => {
                self.metrics.increment_jobs_retried();
                warn!(
                    attempts_made = record.attempts_made,
                    max_attempts = record.max_attempts,
                    "Job failed, retrying in {:?}: {}",
                    delay,
                    record.last_error.as_deref().unwrap_or_default()
                );
            }
            Ok(FailOutcome::Failed { record }) => {
                self.metrics.increment_jobs_failed();
                error!(
                    attempts_made = record.attempts_made,
                    "Job failed permanently: {}",
                    record.last_error.as_deref().unwrap_or_default()
                );
            }
            Err(e) => self.on_store_error(e),
        }
    }

    /// The job was taken away while we were finishing it; nothing to report
    fn on_store_error(&self, e: QueueError) {
        match e {
            QueueError::LockNotOwned(_) | QueueError::JobNotFound(_) | QueueError::JobAlreadyTerminal => {
                self.metrics.increment_jobs_abandoned();
                debug!("Job no longer owned by this worker, dropping result: {}", e);
            }
            e => error!("Could not record job result: {}", e),
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&str>() {
        format!("conversion panicked: {}", msg)
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        format!("conversion panicked: {}", msg)
    } else {
        "conversion panicked".to_string()
    }
}
