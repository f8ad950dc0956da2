//! Scheduler configuration.
//!
//! Every knob has a default and can be overridden from `QUEUE_*` environment
//! variables via [`SchedulerConfig::from_env`].

use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;

use crate::{QueueError, QueueResult};

/// How long completed jobs are kept for observability.
///
/// Terminal failed jobs are never purged automatically so they stay
/// available for debugging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub completed_max_count: usize,
    pub completed_max_age: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed_max_count: 100,
            completed_max_age: Duration::from_secs(24 * 60 * 60),
        }
    }
}

/// Settings the queue store needs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// How long a dequeue or renewal keeps the job locked
    pub lock_duration: Duration,
    pub retention: RetentionPolicy,
    /// Capacity of the lifecycle event bus; slow subscribers skip events past this
    pub event_capacity: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(300),
            retention: RetentionPolicy::default(),
            event_capacity: 1024,
        }
    }
}

/// What happens to in-flight jobs on shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShutdownPolicy {
    /// Stop dequeuing, let in-flight jobs run to completion
    Drain,
    /// Stop immediately; abandoned jobs are picked up again once their lock expires
    Abandon,
}

impl std::str::FromStr for ShutdownPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "drain" => Ok(Self::Drain),
            "abandon" => Ok(Self::Abandon),
            _ => Err(format!("Invalid shutdown policy: {}", s)),
        }
    }
}

/// Configuration for the conversion scheduler
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Name used as the worker ID prefix
    pub pool_name: String,
    /// Maximum number of jobs executing at once
    pub concurrency: usize,
    /// Lock duration for dequeued jobs
    pub lock_duration: Duration,
    /// How often a worker renews its lock; must stay below half the lock duration
    pub lock_renew_interval: Duration,
    /// How long an idle worker sleeps before polling the store again
    pub poll_interval: Duration,
    /// How often the stalled-job reclaimer runs
    pub reclaim_interval: Duration,
    pub retention: RetentionPolicy,
    pub event_capacity: usize,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_name: "conversion".to_string(),
            concurrency: 4,
            lock_duration: Duration::from_secs(300), // 5 minutes
            lock_renew_interval: Duration::from_secs(60),
            poll_interval: Duration::from_millis(250),
            reclaim_interval: Duration::from_secs(30),
            retention: RetentionPolicy::default(),
            event_capacity: 1024,
            shutdown_policy: ShutdownPolicy::Drain,
        }
    }
}

impl SchedulerConfig {
    /// Build a configuration from `QUEUE_*` environment variables, falling back to defaults
    pub fn from_env() -> QueueResult<Self> {
        let defaults = Self::default();

        let config = Self {
            pool_name: std::env::var("QUEUE_POOL_NAME").unwrap_or(defaults.pool_name),
            concurrency: env_or("QUEUE_CONCURRENCY", defaults.concurrency),
            lock_duration: Duration::from_secs(env_or(
                "QUEUE_LOCK_DURATION_SECS",
                defaults.lock_duration.as_secs(),
            )),
            lock_renew_interval: Duration::from_secs(env_or(
                "QUEUE_LOCK_RENEW_INTERVAL_SECS",
                defaults.lock_renew_interval.as_secs(),
            )),
            poll_interval: Duration::from_millis(env_or(
                "QUEUE_POLL_INTERVAL_MS",
                defaults.poll_interval.as_millis() as u64,
            )),
            reclaim_interval: Duration::from_secs(env_or(
                "QUEUE_RECLAIM_INTERVAL_SECS",
                defaults.reclaim_interval.as_secs(),
            )),
            retention: RetentionPolicy {
                completed_max_count: env_or(
                    "QUEUE_RETENTION_COMPLETED_COUNT",
                    defaults.retention.completed_max_count,
                ),
                completed_max_age: Duration::from_secs(env_or(
                    "QUEUE_RETENTION_COMPLETED_AGE_SECS",
                    defaults.retention.completed_max_age.as_secs(),
                )),
            },
            event_capacity: env_or("QUEUE_EVENT_CAPACITY", defaults.event_capacity),
            shutdown_policy: env_or("QUEUE_SHUTDOWN_POLICY", defaults.shutdown_policy),
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the worker pool cannot honour
    pub fn validate(&self) -> QueueResult<()> {
        if self.concurrency == 0 {
            return Err(QueueError::InvalidConfig("concurrency must be at least 1".to_string()));
        }
        if self.lock_duration.is_zero() {
            return Err(QueueError::InvalidConfig("lock_duration must be positive".to_string()));
        }
        if self.lock_renew_interval.is_zero() || self.lock_renew_interval >= self.lock_duration / 2 {
            return Err(QueueError::InvalidConfig(format!(
                "lock_renew_interval ({:?}) must be positive and below half of lock_duration ({:?})",
                self.lock_renew_interval, self.lock_duration
            )));
        }
        if self.event_capacity == 0 {
            return Err(QueueError::InvalidConfig("event_capacity must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            lock_duration: self.lock_duration,
            retention: self.retention,
            event_capacity: self.event_capacity,
        }
    }
}

fn env_or<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => match raw.parse() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring unparsable {}={:?}, using default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.lock_duration, Duration::from_secs(300));
        assert_eq!(config.retention.completed_max_count, 100);
    }

    #[test]
    fn test_renew_interval_must_be_below_half_lock() {
        let config = SchedulerConfig {
            lock_duration: Duration::from_secs(10),
            lock_renew_interval: Duration::from_secs(5),
            ..SchedulerConfig::default()
        };
        assert!(matches!(config.validate(), Err(QueueError::InvalidConfig(_))));
    }

    #[test]
    fn test_zero_concurrency_rejected() {
        let config = SchedulerConfig {
            concurrency: 0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_env_overrides() {
        std::env::set_var("QUEUE_CONCURRENCY", "8");
        std::env::set_var("QUEUE_SHUTDOWN_POLICY", "abandon");
        std::env::set_var("QUEUE_RECLAIM_INTERVAL_SECS", "not-a-number");

        let config = SchedulerConfig::from_env().unwrap();

        std::env::remove_var("QUEUE_CONCURRENCY");
        std::env::remove_var("QUEUE_SHUTDOWN_POLICY");
        std::env::remove_var("QUEUE_RECLAIM_INTERVAL_SECS");

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.shutdown_policy, ShutdownPolicy::Abandon);
        assert_eq!(config.reclaim_interval, Duration::from_secs(30));
    }
}
