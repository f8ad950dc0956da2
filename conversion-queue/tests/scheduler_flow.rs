use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;

use conversion_queue::{
    collaborators::{ConversionStatus, InMemoryConversionRecords, NotificationKind, RecordingNotifier},
    ConversionError, ConversionExecutor, ConversionOutcome, ConversionPayload, ConversionScheduler,
    ConversionType, JobContext, JobId, JobState, MemoryStore, MetricsSnapshot, QueueError,
    QueueStats, SchedulerConfig, ShutdownPolicy, UserTier,
};

/// Converter that records the order it sees conversions in and fails the
/// ones it is told to
struct ScriptedConverter {
    delay: Duration,
    failing: HashSet<String>,
    seen: Mutex<Vec<String>>,
}

impl ScriptedConverter {
    fn new(delay: Duration) -> Self {
        Self {
            delay,
            failing: HashSet::new(),
            seen: Mutex::new(Vec::new()),
        }
    }

    fn failing(mut self, conversion_id: &str) -> Self {
        self.failing.insert(conversion_id.to_string());
        self
    }

    fn seen(&self) -> Vec<String> {
        self.seen.lock().clone()
    }
}

#[async_trait]
impl ConversionExecutor for ScriptedConverter {
    async fn execute(
        &self,
        payload: &ConversionPayload,
        ctx: &JobContext,
    ) -> Result<ConversionOutcome, ConversionError> {
        self.seen.lock().push(payload.conversion_id.clone());
        ctx.report_progress(30, "parsing").await.ok();
        tokio::time::sleep(self.delay).await;

        if self.failing.contains(&payload.conversion_id) {
            return Err(ConversionError::failed("unsupported font encoding"));
        }
        Ok(ConversionOutcome::succeeded()
            .with_page_count(10)
            .with_result_file_id(format!("result-{}", payload.conversion_id)))
    }
}

struct Harness {
    store: Arc<MemoryStore>,
    records: Arc<InMemoryConversionRecords>,
    notifier: Arc<RecordingNotifier>,
    converter: Arc<ScriptedConverter>,
    scheduler: ConversionScheduler,
}

const WAIT_STEPS: usize = 500;

impl Harness {
    async fn wait_for_stats(&self, check: impl Fn(&QueueStats) -> bool) {
        for _ in 0..WAIT_STEPS {
            if check(&self.scheduler.get_queue_stats().await.unwrap()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("queue stats never matched");
    }

    async fn wait_for_metrics(&self, check: impl Fn(&MetricsSnapshot) -> bool) {
        for _ in 0..WAIT_STEPS {
            if check(&self.scheduler.metrics()) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("metrics never matched");
    }

    async fn wait_for_status(&self, conversion_id: &str, status: ConversionStatus) {
        for _ in 0..WAIT_STEPS {
            if self.records.get(conversion_id).map(|r| r.status) == Some(status) {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("conversion {} never reached {:?}", conversion_id, status);
    }
}

fn test_config() -> SchedulerConfig {
    SchedulerConfig {
        concurrency: 1,
        poll_interval: Duration::from_millis(10),
        reclaim_interval: Duration::from_millis(50),
        ..SchedulerConfig::default()
    }
}

fn harness(converter: ScriptedConverter, config: SchedulerConfig) -> Harness {
    let store = Arc::new(MemoryStore::with_config(config.store_config()));
    let records = Arc::new(InMemoryConversionRecords::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let converter = Arc::new(converter);

    let scheduler = ConversionScheduler::new(
        config,
        store.clone(),
        converter.clone(),
        records.clone(),
        notifier.clone(),
    )
    .unwrap();

    Harness {
        store,
        records,
        notifier,
        converter,
        scheduler,
    }
}

fn payload(conversion_id: &str) -> ConversionPayload {
    ConversionPayload::new(conversion_id, "user-42", ConversionType::DocxToPdf)
        .with_files("/uploads/report.docx", "/converted/report.pdf", "report.docx")
}

#[tokio::test]
async fn test_enterprise_job_overtakes_earlier_free_job() {
    let h = harness(ScriptedConverter::new(Duration::from_millis(10)), test_config());

    h.records.insert_pending("job-a");
    h.records.insert_pending("job-b");
    h.scheduler.submit(payload("job-a"), UserTier::Free).await.unwrap();
    h.scheduler.submit(payload("job-b"), UserTier::Enterprise).await.unwrap();

    h.scheduler.start().await.unwrap();
    h.wait_for_stats(|stats| stats.completed == 2).await;
    h.scheduler.shutdown().await;

    assert_eq!(h.converter.seen(), vec!["job-b", "job-a"]);
}

#[tokio::test]
async fn test_completed_conversion_is_projected() {
    let h = harness(ScriptedConverter::new(Duration::from_millis(20)), test_config());
    h.records.insert_pending("conv-1");

    h.scheduler.start().await.unwrap();
    let handle = h.scheduler.submit(payload("conv-1"), UserTier::Premium).await.unwrap();

    h.wait_for_status("conv-1", ConversionStatus::Completed).await;

    let record = h.records.get("conv-1").unwrap();
    assert_eq!(record.page_count, Some(10));
    assert_eq!(record.result_file_id.as_deref(), Some("result-conv-1"));
    assert!(record.conversion_time.is_some());
    assert!(record.processing_started_at.is_some());
    assert!(record.processing_ended_at.is_some());

    let snapshot = h.scheduler.get_job(&handle.job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.state, JobState::Completed);
    assert_eq!(snapshot.progress.percent, 100);
    assert_eq!(snapshot.attempts_made, 0);

    h.scheduler.shutdown().await;

    assert!(h.notifier.count(NotificationKind::Progress) >= 1);
    assert_eq!(h.notifier.count(NotificationKind::Completed), 1);
    assert_eq!(h.scheduler.metrics().jobs_completed, 1);
}

#[tokio::test]
async fn test_failure_inside_lock_window_is_not_a_stall() {
    let h = harness(
        ScriptedConverter::new(Duration::from_millis(150)).failing("conv-1"),
        test_config(),
    );
    h.records.insert_pending("conv-1");

    h.scheduler.start().await.unwrap();
    let handle = h.scheduler.submit(payload("conv-1"), UserTier::Basic).await.unwrap();

    h.wait_for_metrics(|m| m.jobs_retried == 1).await;

    let snapshot = h.scheduler.get_job(&handle.job_id).await.unwrap().unwrap();
    assert_eq!(snapshot.state, JobState::Waiting);
    assert_eq!(snapshot.attempts_made, 1);
    assert_eq!(
        snapshot.last_error.as_deref(),
        Some("Conversion failed: unsupported font encoding")
    );
    assert_eq!(h.scheduler.metrics().jobs_stalled, 0);

    h.scheduler.shutdown().await;

    // Retries are invisible to the user
    let record = h.records.get("conv-1").unwrap();
    assert_eq!(record.status, ConversionStatus::Processing);
    assert_eq!(h.notifier.count(NotificationKind::Error), 0);
}

#[tokio::test]
async fn test_terminal_failure_reaches_record_and_user() {
    let h = harness(
        ScriptedConverter::new(Duration::from_millis(5)).failing("conv-1"),
        test_config(),
    );
    h.records.insert_pending("conv-1");

    h.scheduler.start().await.unwrap();
    let handle = h.scheduler.submit(payload("conv-1"), UserTier::Free).await.unwrap();

    // Free tier: two attempts
    h.wait_for_metrics(|m| m.jobs_retried == 1).await;
    h.store.force_retry_due(&handle.job_id);

    h.wait_for_status("conv-1", ConversionStatus::Failed).await;
    h.scheduler.shutdown().await;

    assert_eq!(h.converter.seen().len(), 2);
    let record = h.records.get("conv-1").unwrap();
    assert_eq!(record.error.as_deref(), Some("Conversion failed: unsupported font encoding"));

    let errors: Vec<_> = h
        .notifier
        .notifications()
        .into_iter()
        .filter(|n| n.kind == NotificationKind::Error)
        .collect();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].user_id, "user-42");
    assert_eq!(errors[0].status, ConversionStatus::Failed);
    assert_eq!(h.scheduler.metrics().jobs_failed, 1);
}

#[tokio::test]
async fn test_duplicate_submission_while_queued() {
    let h = harness(ScriptedConverter::new(Duration::from_millis(5)), test_config());

    let first = h.scheduler.submit(payload("conv-1"), UserTier::Basic).await.unwrap();
    let second = h.scheduler.submit(payload("conv-1"), UserTier::Basic).await.unwrap();

    assert_eq!(first.job_id, second.job_id);
    assert!(first.created);
    assert!(!second.created);
    assert_eq!(h.scheduler.get_queue_stats().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_drain_shutdown_finishes_in_flight_work() {
    let h = harness(ScriptedConverter::new(Duration::from_millis(200)), test_config());
    h.records.insert_pending("conv-1");

    h.scheduler.start().await.unwrap();
    h.scheduler.submit(payload("conv-1"), UserTier::Basic).await.unwrap();
    h.wait_for_stats(|stats| stats.active == 1).await;

    h.scheduler.shutdown_with(ShutdownPolicy::Drain).await;

    assert_eq!(h.scheduler.metrics().jobs_completed, 1);
    assert_eq!(h.records.get("conv-1").unwrap().status, ConversionStatus::Completed);

    // The store is closed after shutdown
    let late = h.scheduler.submit(payload("conv-2"), UserTier::Basic).await;
    assert!(matches!(late, Err(QueueError::QueueUnavailable(_))));
}

#[tokio::test]
async fn test_remove_job_and_stats() {
    let h = harness(ScriptedConverter::new(Duration::from_millis(5)), test_config());

    h.scheduler.submit(payload("conv-1"), UserTier::Basic).await.unwrap();
    h.scheduler.submit(payload("conv-2"), UserTier::Premium).await.unwrap();
    assert_eq!(h.scheduler.get_queue_stats().await.unwrap().waiting, 2);

    assert!(h.scheduler.remove_job(&JobId::for_conversion("conv-1")).await.unwrap());
    assert!(!h.scheduler.remove_job(&JobId::for_conversion("missing")).await.unwrap());
    assert!(h.scheduler.get_job(&JobId::for_conversion("conv-1")).await.unwrap().is_none());
    assert_eq!(h.scheduler.get_queue_stats().await.unwrap().waiting, 1);
}

#[tokio::test]
async fn test_start_twice_is_rejected() {
    let h = harness(ScriptedConverter::new(Duration::from_millis(5)), test_config());

    h.scheduler.start().await.unwrap();
    assert!(h.scheduler.start().await.is_err());
    h.scheduler.shutdown().await;
}

#[test]
fn test_invalid_config_is_rejected() {
    let config = SchedulerConfig {
        lock_renew_interval: Duration::from_secs(200),
        ..SchedulerConfig::default()
    };
    let result = ConversionScheduler::new(
        config,
        Arc::new(MemoryStore::new()),
        Arc::new(ScriptedConverter::new(Duration::ZERO)),
        Arc::new(InMemoryConversionRecords::new()),
        Arc::new(RecordingNotifier::new()),
    );
    assert!(matches!(result, Err(QueueError::InvalidConfig(_))));
}
