use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ConversionOutcome, ConversionPayload, JobId, JobOwner, UserTier, WorkerId};
use crate::policy::{Backoff, JobPolicy};

/// Job state lifecycle: `Waiting -> Active -> {Completed | Failed}`,
/// with `Active -> Waiting` on retry or stall
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Waiting,
    Active,
    Completed,
    Failed,
}

impl JobState {
    /// Check if the job is in a terminal state (completed, or failed after its last attempt)
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Active => "active",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Execution progress: a percentage plus a free-form stage label
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Progress {
    pub percent: u8,
    pub stage: String,
}

impl Progress {
    /// Percent is clamped to 100
    pub fn new(percent: u8, stage: impl Into<String>) -> Self {
        Self {
            percent: percent.min(100),
            stage: stage.into(),
        }
    }

    pub fn initializing() -> Self {
        Self::new(0, "initializing")
    }

    pub fn finished() -> Self {
        Self::new(100, "completed")
    }
}

impl Default for Progress {
    fn default() -> Self {
        Self::new(0, "queued")
    }
}

/// Job record - mutable runtime state stored by the queue store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub job_id: JobId,

    /// Task payload, opaque to the scheduler
    pub payload: ConversionPayload,

    pub user_tier: UserTier,

    /// Lower value is served first; fixed at creation
    pub priority: u8,

    pub attempts_made: u32,
    pub max_attempts: u32,
    pub backoff: Backoff,

    pub state: JobState,

    /// Worker holding the lock while `Active`
    pub lock_owner: Option<WorkerId>,
    pub lock_expires_at: Option<DateTime<Utc>>,

    /// Earliest dequeue time for a job waiting on a retry delay
    pub run_at: Option<DateTime<Utc>>,

    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,

    pub progress: Progress,

    /// Error of the most recent failed attempt
    pub last_error: Option<String>,

    /// Outcome reported by the conversion routine on success
    pub result: Option<ConversionOutcome>,
}

impl JobRecord {
    /// Create a new waiting job for a conversion
    pub fn new(payload: ConversionPayload, user_tier: UserTier, policy: JobPolicy) -> Self {
        let now = Utc::now();

        Self {
            job_id: JobId::for_conversion(&payload.conversion_id),
            payload,
            user_tier,
            priority: policy.priority,
            attempts_made: 0,
            max_attempts: policy.max_attempts,
            backoff: policy.backoff,
            state: JobState::Waiting,
            lock_owner: None,
            lock_expires_at: None,
            run_at: None,
            enqueued_at: now,
            started_at: None,
            finished_at: None,
            updated_at: now,
            progress: Progress::default(),
            last_error: None,
            result: None,
        }
    }

    pub fn conversion_id(&self) -> &str {
        &self.payload.conversion_id
    }

    pub fn user_id(&self) -> &str {
        &self.payload.user_id
    }

    pub fn owner(&self) -> JobOwner {
        JobOwner {
            conversion_id: self.payload.conversion_id.clone(),
            user_id: self.payload.user_id.clone(),
        }
    }

    /// Waiting and past any retry delay
    pub fn is_eligible(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.run_at.map_or(true, |run_at| run_at <= now)
    }

    /// Waiting on a retry delay that has not elapsed yet
    pub fn is_delayed(&self, now: DateTime<Utc>) -> bool {
        self.state == JobState::Waiting && self.run_at.map_or(false, |run_at| run_at > now)
    }

    /// Check if the lock has expired
    pub fn lock_expired(&self, now: DateTime<Utc>) -> bool {
        match (self.state, self.lock_expires_at) {
            (JobState::Active, Some(expires_at)) => expires_at < now,
            _ => false,
        }
    }

    /// Whether `worker_id` holds an unexpired lock on this job
    pub fn is_locked_by(&self, worker_id: &WorkerId, now: DateTime<Utc>) -> bool {
        self.state == JobState::Active
            && self.lock_owner.as_ref() == Some(worker_id)
            && self.lock_expires_at.map_or(false, |expires_at| expires_at >= now)
    }

    /// Claim the job for a worker
    pub fn start_processing(&mut self, worker_id: WorkerId, lock_expires_at: DateTime<Utc>) {
        let now = Utc::now();
        self.state = JobState::Active;
        self.lock_owner = Some(worker_id);
        self.lock_expires_at = Some(lock_expires_at);
        self.run_at = None;
        self.started_at = Some(now);
        self.updated_at = now;
    }

    /// Complete the job successfully
    pub fn complete(&mut self, outcome: ConversionOutcome) {
        let now = Utc::now();
        self.state = JobState::Completed;
        self.result = Some(outcome);
        self.progress = Progress::finished();
        self.release_lock();
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    /// Put the job back in the waiting pool until `retry_at`
    pub fn schedule_retry(&mut self, retry_at: DateTime<Utc>, error: String) {
        self.state = JobState::Waiting;
        self.run_at = Some(retry_at);
        self.last_error = Some(error);
        self.release_lock();
        self.updated_at = Utc::now();
    }

    /// Fail the job permanently
    pub fn fail(&mut self, error: String) {
        let now = Utc::now();
        self.state = JobState::Failed;
        self.last_error = Some(error);
        self.release_lock();
        self.finished_at = Some(now);
        self.updated_at = now;
    }

    fn release_lock(&mut self) {
        self.lock_owner = None;
        self.lock_expires_at = None;
    }

    /// Read-only view for status polling
    pub fn snapshot(&self) -> JobSnapshot {
        JobSnapshot {
            job_id: self.job_id.clone(),
            conversion_id: self.payload.conversion_id.clone(),
            state: self.state,
            progress: self.progress.clone(),
            attempts_made: self.attempts_made,
            max_attempts: self.max_attempts,
            priority: self.priority,
            enqueued_at: self.enqueued_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
            run_at: self.run_at,
            last_error: self.last_error.clone(),
        }
    }
}

/// What `get_job` hands to status-polling collaborators
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub job_id: JobId,
    pub conversion_id: String,
    pub state: JobState,
    pub progress: Progress,
    pub attempts_made: u32,
    pub max_attempts: u32,
    pub priority: u8,
    pub enqueued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub run_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Job counts by state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Waiting and eligible now
    pub waiting: usize,
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
    /// Waiting on a retry delay
    pub delayed: usize,
}

impl QueueStats {
    pub fn total(&self) -> usize {
        self.waiting + self.active + self.completed + self.failed + self.delayed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{policy::policy_for, ConversionType};

    fn record() -> JobRecord {
        let payload = ConversionPayload::new("c-1", "u-1", ConversionType::PdfToDocx);
        JobRecord::new(payload, UserTier::Premium, policy_for(&UserTier::Premium))
    }

    #[test]
    fn test_new_record_is_waiting_with_policy() {
        let record = record();
        assert_eq!(record.job_id.as_str(), "conversion:c-1");
        assert_eq!(record.state, JobState::Waiting);
        assert_eq!(record.priority, 2);
        assert_eq!(record.max_attempts, 4);
        assert_eq!(record.attempts_made, 0);
        assert!(record.is_eligible(Utc::now()));
    }

    #[test]
    fn test_retry_delay_gates_eligibility() {
        let mut record = record();
        let now = Utc::now();
        record.start_processing(WorkerId::from("w"), now + chrono::Duration::minutes(5));
        record.schedule_retry(now + chrono::Duration::seconds(5), "boom".to_string());

        assert!(record.is_delayed(now));
        assert!(!record.is_eligible(now));
        assert!(record.is_eligible(now + chrono::Duration::seconds(6)));
        assert!(record.lock_owner.is_none());
    }

    #[test]
    fn test_lock_ownership_requires_unexpired_lock() {
        let mut record = record();
        let now = Utc::now();
        let worker = WorkerId::from("w-1");
        record.start_processing(worker.clone(), now + chrono::Duration::seconds(10));

        assert!(record.is_locked_by(&worker, now));
        assert!(!record.is_locked_by(&WorkerId::from("w-2"), now));
        assert!(!record.is_locked_by(&worker, now + chrono::Duration::seconds(11)));
        assert!(record.lock_expired(now + chrono::Duration::seconds(11)));
    }

    #[test]
    fn test_progress_is_clamped() {
        assert_eq!(Progress::new(250, "x").percent, 100);
    }
}
