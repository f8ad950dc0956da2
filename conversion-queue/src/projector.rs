use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    collaborators::{
        ConversionRecordStore, ConversionStatus, ConversionUpdate, Notification, NotificationChannel,
        NotificationKind,
    },
    store::QueueStore,
    ConversionOutcome, JobEvent, JobId, JobOwner, JobRecord, JobState,
};

/// How many recent terminal projections are remembered to suppress repeats
const RECENT_TERMINAL_CAPACITY: usize = 1024;

/// Bookkeeping for reconciling after the projector falls behind the event bus
struct Watermark {
    /// Timestamp of the newest event projected so far
    seen_until: DateTime<Utc>,
    recent: VecDeque<JobId>,
    recent_ids: HashSet<JobId>,
}

impl Watermark {
    fn new(start: DateTime<Utc>) -> Self {
        Self {
            seen_until: start,
            recent: VecDeque::new(),
            recent_ids: HashSet::new(),
        }
    }

    /// Remember a terminal projection; `false` if it was already projected
    fn settle(&mut self, job_id: &JobId) -> bool {
        if !self.recent_ids.insert(job_id.clone()) {
            return false;
        }
        self.recent.push_back(job_id.clone());
        if self.recent.len() > RECENT_TERMINAL_CAPACITY {
            if let Some(oldest) = self.recent.pop_front() {
                self.recent_ids.remove(&oldest);
            }
        }
        true
    }

    /// A resubmitted job may finish again
    fn reopen(&mut self, job_id: &JobId) {
        if self.recent_ids.remove(job_id) {
            self.recent.retain(|id| id != job_id);
        }
    }
}

/// Mirrors job lifecycle events onto the user-facing conversion record and
/// forwards notifications.
///
/// Runs on its own task behind the event bus, so a slow or failing
/// collaborator never holds up a worker. Collaborator errors are logged and
/// dropped. When the bus overruns the projector, jobs that finished in the
/// skipped window are read back from the store so their terminal state is
/// still projected.
pub struct StatusProjector {
    store: Arc<dyn QueueStore>,
    records: Arc<dyn ConversionRecordStore>,
    notifier: Arc<dyn NotificationChannel>,
    watermark: Mutex<Watermark>,
}

impl StatusProjector {
    pub fn new(
        store: Arc<dyn QueueStore>,
        records: Arc<dyn ConversionRecordStore>,
        notifier: Arc<dyn NotificationChannel>,
    ) -> Self {
        Self {
            store,
            records,
            notifier,
            watermark: Mutex::new(Watermark::new(Utc::now())),
        }
    }

    /// Start consuming `events` on a background task
    pub fn spawn(self, events: broadcast::Receiver<JobEvent>, shutdown: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(self.run(events, shutdown))
    }

    /// Consume events until `shutdown` is cancelled, then project whatever is
    /// still buffered and return
    pub async fn run(self, mut events: broadcast::Receiver<JobEvent>, shutdown: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                received = events.recv() => match received {
                    Ok(event) => self.handle(&event).await,
                    Err(RecvError::Lagged(skipped)) => self.catch_up(skipped).await,
                    Err(RecvError::Closed) => return,
                },
                _ = shutdown.cancelled() => break,
            }
        }

        loop {
            match events.try_recv() {
                Ok(event) => self.handle(&event).await,
                Err(TryRecvError::Lagged(skipped)) => self.catch_up(skipped).await,
                Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
            }
        }
        debug!("Status projector stopped");
    }

    /// Project terminal states that finished after the last projected event.
    ///
    /// Returns how many jobs were projected from the store.
    pub async fn reconcile(&self) -> usize {
        let finished = match self.store.finished_jobs().await {
            Ok(finished) => finished,
            Err(e) => {
                warn!("Status projector could not read finished jobs: {}", e);
                return 0;
            }
        };

        let seen_until = self.watermark.lock().seen_until;
        let mut projected = 0;
        for record in finished {
            if record.finished_at.map_or(true, |at| at < seen_until) {
                continue;
            }
            if let Some(event) = terminal_event(&record) {
                if self.project_terminal(&event).await {
                    projected += 1;
                }
            }
        }
        projected
    }

    async fn catch_up(&self, skipped: u64) {
        warn!("Status projector lagged, skipped {} events", skipped);
        let projected = self.reconcile().await;
        if projected > 0 {
            info!("Projected {} finished jobs from the store after lag", projected);
        }
    }

    /// Project a single event
    pub async fn handle(&self, event: &JobEvent) {
        {
            let mut watermark = self.watermark.lock();
            watermark.seen_until = watermark.seen_until.max(*event.timestamp());
            if let JobEvent::Enqueued { job_id, .. } | JobEvent::Removed { job_id, .. } = event {
                watermark.reopen(job_id);
            }
        }

        if event.is_terminal() {
            self.project_terminal(event).await;
            return;
        }

        match event {
            JobEvent::Active { owner, attempt, at, .. } => {
                // Retries stay "processing" for the user; only the first start is recorded
                let update = if *attempt <= 1 {
                    ConversionUpdate::processing(*at)
                } else {
                    ConversionUpdate {
                        status: Some(ConversionStatus::Processing),
                        ..ConversionUpdate::default()
                    }
                };
                self.update(&owner.conversion_id, update).await;
            }
            JobEvent::Progress { owner, progress, .. } => {
                self.notify(Notification {
                    kind: NotificationKind::Progress,
                    user_id: owner.user_id.clone(),
                    conversion_id: owner.conversion_id.clone(),
                    status: ConversionStatus::Processing,
                    progress: Some(progress.clone()),
                    message: None,
                })
                .await;
            }
            JobEvent::Retrying { owner, error, .. } => {
                self.update(&owner.conversion_id, ConversionUpdate::attempt_error(error.clone()))
                    .await;
            }
            JobEvent::Completed { .. }
            | JobEvent::Failed { .. }
            | JobEvent::Enqueued { .. }
            | JobEvent::Removed { .. } => {}
        }
    }

    /// Project a completion or terminal failure once; `false` if already projected
    async fn project_terminal(&self, event: &JobEvent) -> bool {
        if !self.watermark.lock().settle(event.job_id()) {
            debug!(job_id = %event.job_id(), "Terminal state already projected");
            return false;
        }

        match event {
            JobEvent::Completed { owner, outcome, at, .. } => {
                self.update(&owner.conversion_id, ConversionUpdate::completed(outcome, *at)).await;
                self.notify(notification(owner, NotificationKind::Completed, ConversionStatus::Completed, None))
                    .await;
            }
            JobEvent::Failed { owner, error, at, .. } => {
                self.update(&owner.conversion_id, ConversionUpdate::failed(error.clone(), *at))
                    .await;
                self.notify(notification(
                    owner,
                    NotificationKind::Error,
                    ConversionStatus::Failed,
                    Some(error.clone()),
                ))
                .await;
            }
            _ => {}
        }
        true
    }

    async fn update(&self, conversion_id: &str, update: ConversionUpdate) {
        if let Err(e) = self.records.update_status(conversion_id, update).await {
            warn!(conversion_id, "Failed to update conversion record: {}", e);
        }
    }

    async fn notify(&self, notification: Notification) {
        let conversion_id = notification.conversion_id.clone();
        if let Err(e) = self.notifier.notify(notification).await {
            warn!(%conversion_id, "Failed to send notification: {}", e);
        }
    }
}

/// The event a finished job would have published
fn terminal_event(record: &JobRecord) -> Option<JobEvent> {
    let at = record.finished_at.unwrap_or(record.updated_at);
    match record.state {
        JobState::Completed => Some(JobEvent::Completed {
            job_id: record.job_id.clone(),
            owner: record.owner(),
            outcome: record.result.clone().unwrap_or_else(ConversionOutcome::succeeded),
            started_at: record.started_at,
            at,
        }),
        JobState::Failed => Some(JobEvent::Failed {
            job_id: record.job_id.clone(),
            owner: record.owner(),
            attempts_made: record.attempts_made,
            max_attempts: record.max_attempts,
            error: record.last_error.clone().unwrap_or_default(),
            at,
        }),
        JobState::Waiting | JobState::Active => None,
    }
}

fn notification(
    owner: &JobOwner,
    kind: NotificationKind,
    status: ConversionStatus,
    message: Option<String>,
) -> Notification {
    Notification {
        kind,
        user_id: owner.user_id.clone(),
        conversion_id: owner.conversion_id.clone(),
        status,
        progress: None,
        message,
    }
}
