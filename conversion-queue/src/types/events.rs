use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::{ConversionOutcome, JobId, Progress, WorkerId};

/// Who a job belongs to; carried on every event so subscribers never
/// have to look the job up again
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOwner {
    pub conversion_id: String,
    pub user_id: String,
}

/// Lifecycle events published by the queue store
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum JobEvent {
    /// Job was enqueued
    Enqueued {
        job_id: JobId,
        owner: JobOwner,
        priority: u8,
        at: DateTime<Utc>,
    },

    /// Job was claimed by a worker
    Active {
        job_id: JobId,
        owner: JobOwner,
        worker_id: WorkerId,
        attempt: u32,
        lock_expires_at: DateTime<Utc>,
        at: DateTime<Utc>,
    },

    /// Worker reported progress
    Progress {
        job_id: JobId,
        owner: JobOwner,
        progress: Progress,
        at: DateTime<Utc>,
    },

    /// Job completed successfully
    Completed {
        job_id: JobId,
        owner: JobOwner,
        outcome: ConversionOutcome,
        started_at: Option<DateTime<Utc>>,
        at: DateTime<Utc>,
    },

    /// Attempt failed (or stalled); job is waiting for another attempt
    Retrying {
        job_id: JobId,
        owner: JobOwner,
        attempts_made: u32,
        max_attempts: u32,
        delay: Duration,
        retry_at: DateTime<Utc>,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job failed on its last attempt; no further retries
    Failed {
        job_id: JobId,
        owner: JobOwner,
        attempts_made: u32,
        max_attempts: u32,
        error: String,
        at: DateTime<Utc>,
    },

    /// Job was removed administratively
    Removed {
        job_id: JobId,
        at: DateTime<Utc>,
    },
}

impl JobEvent {
    /// Get event type name as string
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::Enqueued { .. } => "enqueued",
            Self::Active { .. } => "active",
            Self::Progress { .. } => "progress",
            Self::Completed { .. } => "completed",
            Self::Retrying { .. } => "retrying",
            Self::Failed { .. } => "failed",
            Self::Removed { .. } => "removed",
        }
    }

    /// Get the job ID from any event
    pub fn job_id(&self) -> &JobId {
        match self {
            Self::Enqueued { job_id, .. } => job_id,
            Self::Active { job_id, .. } => job_id,
            Self::Progress { job_id, .. } => job_id,
            Self::Completed { job_id, .. } => job_id,
            Self::Retrying { job_id, .. } => job_id,
            Self::Failed { job_id, .. } => job_id,
            Self::Removed { job_id, .. } => job_id,
        }
    }

    /// Get the timestamp from any event
    pub fn timestamp(&self) -> &DateTime<Utc> {
        match self {
            Self::Enqueued { at, .. } => at,
            Self::Active { at, .. } => at,
            Self::Progress { at, .. } => at,
            Self::Completed { at, .. } => at,
            Self::Retrying { at, .. } => at,
            Self::Failed { at, .. } => at,
            Self::Removed { at, .. } => at,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}
