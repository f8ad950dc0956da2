use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};

/// Live counters for scheduler activity
#[derive(Debug, Default)]
pub struct LiveMetrics {
    jobs_submitted: AtomicU64,
    jobs_deduplicated: AtomicU64,
    jobs_completed: AtomicU64,
    jobs_failed: AtomicU64,
    jobs_retried: AtomicU64,
    jobs_stalled: AtomicU64,
    jobs_abandoned: AtomicU64,
}

impl LiveMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn increment_jobs_submitted(&self) {
        self.jobs_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// A submission that landed on an existing non-terminal job
    pub fn increment_jobs_deduplicated(&self) {
        self.jobs_deduplicated.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_jobs_completed(&self) {
        self.jobs_completed.fetch_add(1, Ordering::Relaxed);
    }

    /// Terminal failures only
    pub fn increment_jobs_failed(&self) {
        self.jobs_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_jobs_retried(&self) {
        self.jobs_retried.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_jobs_stalled(&self, count: u64) {
        self.jobs_stalled.fetch_add(count, Ordering::Relaxed);
    }

    /// Worker gave up on a job after losing its lock
    pub fn increment_jobs_abandoned(&self) {
        self.jobs_abandoned.fetch_add(1, Ordering::Relaxed);
    }

    // Getters for global metrics
    pub fn jobs_submitted(&self) -> u64 {
        self.jobs_submitted.load(Ordering::Relaxed)
    }

    pub fn jobs_deduplicated(&self) -> u64 {
        self.jobs_deduplicated.load(Ordering::Relaxed)
    }

    pub fn jobs_completed(&self) -> u64 {
        self.jobs_completed.load(Ordering::Relaxed)
    }

    pub fn jobs_failed(&self) -> u64 {
        self.jobs_failed.load(Ordering::Relaxed)
    }

    pub fn jobs_retried(&self) -> u64 {
        self.jobs_retried.load(Ordering::Relaxed)
    }

    pub fn jobs_stalled(&self) -> u64 {
        self.jobs_stalled.load(Ordering::Relaxed)
    }

    pub fn jobs_abandoned(&self) -> u64 {
        self.jobs_abandoned.load(Ordering::Relaxed)
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            jobs_submitted: self.jobs_submitted.load(Ordering::Relaxed),
            jobs_deduplicated: self.jobs_deduplicated.load(Ordering::Relaxed),
            jobs_completed: self.jobs_completed.load(Ordering::Relaxed),
            jobs_failed: self.jobs_failed.load(Ordering::Relaxed),
            jobs_retried: self.jobs_retried.load(Ordering::Relaxed),
            jobs_stalled: self.jobs_stalled.load(Ordering::Relaxed),
            jobs_abandoned: self.jobs_abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub jobs_submitted: u64,
    pub jobs_deduplicated: u64,
    pub jobs_completed: u64,
    pub jobs_failed: u64,
    pub jobs_retried: u64,
    pub jobs_stalled: u64,
    pub jobs_abandoned: u64,
}

impl MetricsSnapshot {
    /// Share of finished jobs that completed (1.0 when nothing finished yet)
    pub fn success_rate(&self) -> f64 {
        let finished = self.jobs_completed + self.jobs_failed;
        if finished == 0 {
            1.0
        } else {
            self.jobs_completed as f64 / finished as f64
        }
    }
}
