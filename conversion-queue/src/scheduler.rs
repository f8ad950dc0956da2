use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::{
    collaborators::{ConversionExecutor, ConversionRecordStore, NotificationChannel},
    config::{SchedulerConfig, ShutdownPolicy},
    observability::{LiveMetrics, MetricsSnapshot},
    projector::StatusProjector,
    reclaimer::StalledJobReclaimer,
    store::QueueStore,
    submitter::{JobHandle, JobSubmitter},
    worker::WorkerPool,
    ConversionPayload, JobEvent, JobId, JobSnapshot, QueueError, QueueResult, QueueStats, UserTier,
};

/// Background parts that only exist between `start` and `shutdown`
struct Running {
    pool: WorkerPool,
    background: CancellationToken,
    reclaimer: JoinHandle<()>,
    projector: JoinHandle<()>,
}

/// The conversion scheduler: submitter, worker pool, status projector and
/// stalled-job reclaimer wired around one queue store.
///
/// Constructed explicitly by whatever process hosts it; nothing runs until
/// [`start`](Self::start) and everything stops on [`shutdown`](Self::shutdown).
pub struct ConversionScheduler {
    config: SchedulerConfig,
    store: Arc<dyn QueueStore>,
    metrics: Arc<LiveMetrics>,
    submitter: JobSubmitter,
    executor: Arc<dyn ConversionExecutor>,
    records: Arc<dyn ConversionRecordStore>,
    notifier: Arc<dyn NotificationChannel>,
    running: Mutex<Option<Running>>,
}

impl ConversionScheduler {
    pub fn new(
        config: SchedulerConfig,
        store: Arc<dyn QueueStore>,
        executor: Arc<dyn ConversionExecutor>,
        records: Arc<dyn ConversionRecordStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> QueueResult<Self> {
        config.validate()?;
        let metrics = Arc::new(LiveMetrics::new());

        Ok(Self {
            submitter: JobSubmitter::new(store.clone(), metrics.clone()),
            config,
            store,
            metrics,
            executor,
            records,
            notifier,
            running: Mutex::new(None),
        })
    }

    /// Scheduler backed by a fresh [`MemoryStore`](crate::MemoryStore)
    #[cfg(feature = "memory")]
    pub fn in_memory(
        config: SchedulerConfig,
        executor: Arc<dyn ConversionExecutor>,
        records: Arc<dyn ConversionRecordStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> QueueResult<Self> {
        let store = Arc::new(crate::MemoryStore::with_config(config.store_config()));
        Self::new(config, store, executor, records, notifier)
    }

    /// Start the projector, the reclaimer and the worker pool
    pub async fn start(&self) -> QueueResult<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Err(QueueError::Internal("scheduler already started".to_string()));
        }

        let background = CancellationToken::new();

        // Subscribe before any worker can publish
        let projector = StatusProjector::new(self.store.clone(), self.records.clone(), self.notifier.clone())
            .spawn(self.store.subscribe(), background.clone());

        let reclaimer = StalledJobReclaimer::new(self.store.clone(), self.metrics.clone())
            .with_interval(self.config.reclaim_interval)
            .spawn(background.clone());

        let mut pool = WorkerPool::new(
            self.store.clone(),
            self.executor.clone(),
            self.metrics.clone(),
            self.config.clone(),
        );
        if let Err(e) = pool.start() {
            background.cancel();
            return Err(e);
        }

        *running = Some(Running {
            pool,
            background,
            reclaimer,
            projector,
        });
        info!(
            pool = %self.config.pool_name,
            concurrency = self.config.concurrency,
            "Conversion scheduler started"
        );
        Ok(())
    }

    /// Queue a conversion; see [`JobSubmitter::submit`]
    pub async fn submit(&self, payload: ConversionPayload, tier: UserTier) -> QueueResult<JobHandle> {
        self.submitter.submit(payload, tier).await
    }

    /// Current view of a job, or `None` once it is gone (removed or past retention)
    pub async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobSnapshot>> {
        Ok(self.store.get_job(job_id).await?.map(|record| record.snapshot()))
    }

    pub async fn get_queue_stats(&self) -> QueueResult<QueueStats> {
        self.store.stats().await
    }

    /// Administrative removal; `false` if the job does not exist
    pub async fn remove_job(&self, job_id: &JobId) -> QueueResult<bool> {
        self.store.remove_job(job_id).await
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Raw lifecycle events, for callers that want more than the projector does
    pub fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.store.subscribe()
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    /// Shut down using the configured [`ShutdownPolicy`]
    pub async fn shutdown(&self) {
        self.shutdown_with(self.config.shutdown_policy).await;
    }

    /// Stop the workers, then the projector (after it has projected what the
    /// workers published) and the reclaimer, then close the store
    pub async fn shutdown_with(&self, policy: ShutdownPolicy) {
        let running = self.running.lock().await.take();
        if let Some(mut running) = running {
            running.pool.shutdown(policy).await;
            running.background.cancel();

            for (name, handle) in [("reclaimer", running.reclaimer), ("projector", running.projector)] {
                if let Err(e) = handle.await {
                    error!("Scheduler {} task ended abnormally: {}", name, e);
                }
            }
        }

        self.store.close().await;
        info!("Conversion scheduler stopped");
    }
}
