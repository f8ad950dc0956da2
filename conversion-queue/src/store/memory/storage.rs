use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::debug;

use crate::{
    config::StoreConfig,
    store::{EnqueueOutcome, FailOutcome, QueueStore, ReclaimedJob},
    ConversionOutcome, FailureReason, JobEvent, JobId, JobRecord, JobState, Progress, QueueError,
    QueueResult, QueueStats, WorkerId,
};

/// Position in the waiting pool: priority band, then arrival sequence
type WaitingKey = (u8, u64);

/// Everything the store guards with a single lock, so that select-and-lock
/// and fail-or-retry are atomic per job
#[derive(Default)]
pub(crate) struct StoreState {
    /// Job records indexed by job_id
    pub(crate) jobs: HashMap<JobId, JobRecord>,

    /// Waiting pool ordered by (priority, arrival)
    waiting: BTreeMap<WaitingKey, JobId>,
    waiting_keys: HashMap<JobId, WaitingKey>,

    /// Completed jobs in completion order, for retention
    completed: VecDeque<JobId>,

    next_sequence: u64,
    closed: bool,
}

impl StoreState {
    fn ensure_open(&self) -> QueueResult<()> {
        if self.closed {
            return Err(QueueError::QueueUnavailable("memory store is closed".to_string()));
        }
        Ok(())
    }

    /// Jobs entering (or re-entering) the pool queue behind everything already in their band
    fn push_waiting(&mut self, job_id: &JobId, priority: u8) {
        let key = (priority, self.next_sequence);
        self.next_sequence += 1;
        self.waiting.insert(key, job_id.clone());
        self.waiting_keys.insert(job_id.clone(), key);
    }

    fn take_waiting(&mut self, job_id: &JobId) {
        if let Some(key) = self.waiting_keys.remove(job_id) {
            self.waiting.remove(&key);
        }
    }

    /// Shared by `fail` and lock reclamation.
    fn record_failure(
        &mut self,
        job_id: &JobId,
        reason: &FailureReason,
        now: DateTime<Utc>,
    ) -> QueueResult<FailOutcome> {
        let record = self
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;

        record.attempts_made = record.attempts_made.saturating_add(1);

        if record.attempts_made < record.max_attempts {
            let delay = record.backoff.delay_for(record.attempts_made);
            let retry_at = after(now, delay);
            record.schedule_retry(retry_at, reason.to_string());

            let snapshot = record.clone();
            self.push_waiting(job_id, snapshot.priority);

            Ok(FailOutcome::Retrying { record: snapshot, delay, retry_at })
        } else {
            record.fail(reason.to_string());
            Ok(FailOutcome::Failed { record: record.clone() })
        }
    }
}

/// In-memory queue store for single-process deployments and tests
#[derive(Clone)]
pub struct MemoryStore {
    pub(crate) state: Arc<RwLock<StoreState>>,

    /// Event broadcaster for lifecycle subscribers
    pub(crate) event_broadcaster: broadcast::Sender<JobEvent>,

    config: StoreConfig,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_config(StoreConfig::default())
    }

    pub fn with_config(config: StoreConfig) -> Self {
        let (event_broadcaster, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            state: Arc::new(RwLock::new(StoreState::default())),
            event_broadcaster,
            config,
        }
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    fn publish(&self, event: JobEvent) {
        // No subscribers is fine
        let _ = self.event_broadcaster.send(event);
    }

    fn publish_failure(&self, outcome: &FailOutcome, now: DateTime<Utc>) {
        let event = match outcome {
            FailOutcome::Retrying { record, delay, retry_at } => JobEvent::Retrying {
                job_id: record.job_id.clone(),
                owner: record.owner(),
                attempts_made: record.attempts_made,
                max_attempts: record.max_attempts,
                delay: *delay,
                retry_at: *retry_at,
                error: record.last_error.clone().unwrap_or_default(),
                at: now,
            },
            FailOutcome::Failed { record } => JobEvent::Failed {
                job_id: record.job_id.clone(),
                owner: record.owner(),
                attempts_made: record.attempts_made,
                max_attempts: record.max_attempts,
                error: record.last_error.clone().unwrap_or_default(),
                at: now,
            },
        };
        self.publish(event);
    }

    /// Purge completed jobs beyond the retention count or age.
    /// Failed jobs are never touched here.
    fn apply_retention(&self, state: &mut StoreState, now: DateTime<Utc>) {
        let retention = self.config.retention;
        let cutoff = before(now, retention.completed_max_age);

        while let Some(front) = state.completed.front().cloned() {
            let expired = match state.jobs.get(&front) {
                Some(record) if record.state == JobState::Completed => {
                    state.completed.len() > retention.completed_max_count
                        || record.finished_at.map_or(false, |finished| finished < cutoff)
                }
                _ => true,
            };
            if !expired {
                break;
            }

            state.completed.pop_front();
            if matches!(state.jobs.get(&front), Some(record) if record.state == JobState::Completed) {
                state.jobs.remove(&front);
                debug!("Purged completed job {} past retention", front);
            }
        }
    }

    /// Checks shared by every worker-side transition
    fn owned_record<'a>(
        state: &'a mut StoreState,
        job_id: &JobId,
        worker_id: &WorkerId,
        now: DateTime<Utc>,
    ) -> QueueResult<&'a mut JobRecord> {
        let record = state
            .jobs
            .get_mut(job_id)
            .ok_or_else(|| QueueError::JobNotFound(job_id.clone()))?;

        if record.state.is_terminal() {
            return Err(QueueError::JobAlreadyTerminal);
        }
        if !record.is_locked_by(worker_id, now) {
            return Err(QueueError::LockNotOwned(job_id.clone()));
        }
        Ok(record)
    }
}

#[async_trait]
impl QueueStore for MemoryStore {
    async fn enqueue(&self, job: JobRecord) -> QueueResult<EnqueueOutcome> {
        let mut state = self.state.write();
        state.ensure_open()?;

        if let Some(existing) = state.jobs.get(&job.job_id) {
            if !existing.state.is_terminal() {
                debug!("Job {} already queued ({}), returning existing", job.job_id, existing.state);
                return Ok(EnqueueOutcome {
                    record: existing.clone(),
                    created: false,
                });
            }
        }

        // A terminal job with this ID is replaced by the new submission
        let job_id = job.job_id.clone();
        state.completed.retain(|id| id != &job_id);
        state.take_waiting(&job_id);

        self.publish(JobEvent::Enqueued {
            job_id: job_id.clone(),
            owner: job.owner(),
            priority: job.priority,
            at: job.enqueued_at,
        });

        let priority = job.priority;
        state.jobs.insert(job_id.clone(), job.clone());
        state.push_waiting(&job_id, priority);

        Ok(EnqueueOutcome { record: job, created: true })
    }

    async fn dequeue_next(&self, worker_id: &WorkerId) -> QueueResult<Option<JobRecord>> {
        let now = Utc::now();
        let mut state = self.state.write();
        state.ensure_open()?;

        let candidate = state
            .waiting
            .iter()
            .find(|(_, job_id)| state.jobs.get(*job_id).map_or(false, |record| record.is_eligible(now)))
            .map(|(key, job_id)| (*key, job_id.clone()));

        let Some((key, job_id)) = candidate else {
            return Ok(None);
        };

        state.waiting.remove(&key);
        state.waiting_keys.remove(&job_id);

        let lock_expires_at = after(now, self.config.lock_duration);
        let record = state
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| QueueError::Internal(format!("waiting index points at missing job {}", job_id)))?;
        record.start_processing(worker_id.clone(), lock_expires_at);
        let snapshot = record.clone();

        self.publish(JobEvent::Active {
            job_id,
            owner: snapshot.owner(),
            worker_id: worker_id.clone(),
            attempt: snapshot.attempts_made + 1,
            lock_expires_at,
            at: now,
        });

        Ok(Some(snapshot))
    }

    async fn renew_lock(&self, job_id: &JobId, worker_id: &WorkerId) -> QueueResult<DateTime<Utc>> {
        let now = Utc::now();
        let mut state = self.state.write();
        state.ensure_open()?;

        let record = Self::owned_record(&mut state, job_id, worker_id, now)
            .map_err(|_| QueueError::LockNotOwned(job_id.clone()))?;

        let lock_expires_at = after(now, self.config.lock_duration);
        record.lock_expires_at = Some(lock_expires_at);
        record.updated_at = now;

        Ok(lock_expires_at)
    }

    async fn report_progress(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        progress: Progress,
    ) -> QueueResult<()> {
        let now = Utc::now();
        let mut state = self.state.write();
        state.ensure_open()?;

        let record = Self::owned_record(&mut state, job_id, worker_id, now)?;
        record.progress = progress.clone();
        record.updated_at = now;
        let owner = record.owner();

        self.publish(JobEvent::Progress {
            job_id: job_id.clone(),
            owner,
            progress,
            at: now,
        });
        Ok(())
    }

    async fn complete(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        outcome: ConversionOutcome,
    ) -> QueueResult<JobRecord> {
        let now = Utc::now();
        let mut state = self.state.write();
        state.ensure_open()?;

        let record = Self::owned_record(&mut state, job_id, worker_id, now)?;
        record.complete(outcome.clone());
        let snapshot = record.clone();

        self.publish(JobEvent::Completed {
            job_id: job_id.clone(),
            owner: snapshot.owner(),
            outcome,
            started_at: snapshot.started_at,
            at: now,
        });

        state.completed.push_back(job_id.clone());
        self.apply_retention(&mut state, now);

        Ok(snapshot)
    }

    async fn fail(
        &self,
        job_id: &JobId,
        worker_id: &WorkerId,
        reason: FailureReason,
    ) -> QueueResult<FailOutcome> {
        let now = Utc::now();
        let mut state = self.state.write();
        state.ensure_open()?;

        Self::owned_record(&mut state, job_id, worker_id, now)?;
        let outcome = state.record_failure(job_id, &reason, now)?;
        self.publish_failure(&outcome, now);

        Ok(outcome)
    }

    async fn reclaim_expired_locks(&self) -> QueueResult<Vec<ReclaimedJob>> {
        let now = Utc::now();
        let mut state = self.state.write();
        state.ensure_open()?;

        let expired: Vec<(JobId, Option<WorkerId>)> = state
            .jobs
            .values()
            .filter(|record| record.lock_expired(now))
            .map(|record| (record.job_id.clone(), record.lock_owner.clone()))
            .collect();

        let mut reclaimed = Vec::with_capacity(expired.len());
        for (job_id, previous_owner) in expired {
            debug!("Reclaiming expired lock for job: {}", job_id);
            let outcome = state.record_failure(&job_id, &FailureReason::Stalled, now)?;
            self.publish_failure(&outcome, now);
            reclaimed.push(ReclaimedJob {
                job_id,
                previous_owner,
                outcome,
            });
        }

        self.apply_retention(&mut state, now);
        Ok(reclaimed)
    }

    async fn get_job(&self, job_id: &JobId) -> QueueResult<Option<JobRecord>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state.jobs.get(job_id).cloned())
    }

    async fn stats(&self) -> QueueResult<QueueStats> {
        let now = Utc::now();
        let state = self.state.read();
        state.ensure_open()?;

        let mut stats = QueueStats::default();
        for record in state.jobs.values() {
            match record.state {
                JobState::Waiting if record.is_delayed(now) => stats.delayed += 1,
                JobState::Waiting => stats.waiting += 1,
                JobState::Active => stats.active += 1,
                JobState::Completed => stats.completed += 1,
                JobState::Failed => stats.failed += 1,
            }
        }
        Ok(stats)
    }

    async fn finished_jobs(&self) -> QueueResult<Vec<JobRecord>> {
        let state = self.state.read();
        state.ensure_open()?;
        Ok(state
            .jobs
            .values()
            .filter(|record| record.state.is_terminal())
            .cloned()
            .collect())
    }

    async fn remove_job(&self, job_id: &JobId) -> QueueResult<bool> {
        let mut state = self.state.write();
        state.ensure_open()?;

        if state.jobs.remove(job_id).is_none() {
            return Ok(false);
        }
        state.take_waiting(job_id);
        state.completed.retain(|id| id != job_id);

        self.publish(JobEvent::Removed {
            job_id: job_id.clone(),
            at: Utc::now(),
        });
        Ok(true)
    }

    fn subscribe(&self) -> broadcast::Receiver<JobEvent> {
        self.event_broadcaster.subscribe()
    }

    async fn close(&self) {
        self.state.write().closed = true;
        debug!("Memory store closed");
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Test helpers for deterministic testing
impl MemoryStore {
    /// Force a lock to expire
    pub fn force_lock_expiry(&self, job_id: &JobId) {
        let mut state = self.state.write();
        if let Some(record) = state.jobs.get_mut(job_id) {
            if record.state == JobState::Active {
                record.lock_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
                record.updated_at = Utc::now();
            }
        }
    }

    /// Make a job waiting on a retry delay eligible right away
    pub fn force_retry_due(&self, job_id: &JobId) {
        let mut state = self.state.write();
        if let Some(record) = state.jobs.get_mut(job_id) {
            if record.run_at.is_some() {
                record.run_at = Some(Utc::now() - chrono::Duration::milliseconds(1));
            }
        }
    }
}

fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delta| now.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

fn before(now: DateTime<Utc>, age: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(age)
        .ok()
        .and_then(|delta| now.checked_sub_signed(delta))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}
