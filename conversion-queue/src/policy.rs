//! Tier-driven priority and retry policy.
//!
//! A pure mapping from [`UserTier`] to the scheduling parameters attached to a
//! job at submission time. Nothing here performs I/O or looks at other jobs.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::UserTier;

/// Base delay between attempts, shared by every tier
pub const BASE_BACKOFF_DELAY: Duration = Duration::from_millis(5000);

/// Priority rank for tiers the platform does not recognize (same as free)
pub const DEFAULT_PRIORITY: u8 = 4;

/// Attempt budget for tiers the platform does not recognize
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Exponential retry delay schedule stored on each job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    pub base_delay: Duration,
}

impl Backoff {
    pub fn exponential(base_delay: Duration) -> Self {
        Self { base_delay }
    }

    /// Delay before the next attempt, given how many attempts have already failed.
    ///
    /// `attempts_made` is 1 after the first failure, so the curve yields
    /// `base, 2*base, 4*base, ...`.
    pub fn delay_for(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.saturating_sub(1);
        self.base_delay.saturating_mul(2u32.saturating_pow(exponent))
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::exponential(BASE_BACKOFF_DELAY)
    }
}

/// Scheduling parameters derived from a tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPolicy {
    /// Lower value is served first
    pub priority: u8,
    pub max_attempts: u32,
    pub backoff: Backoff,
}

/// Priority rank: enterprise 1, premium 2, basic 3, free and anything else 4
pub fn priority_for(tier: &UserTier) -> u8 {
    match tier {
        UserTier::Enterprise => 1,
        UserTier::Premium => 2,
        UserTier::Basic => 3,
        UserTier::Free | UserTier::Unrecognized(_) => DEFAULT_PRIORITY,
    }
}

/// Attempt budget: enterprise 5, premium 4, basic 3, free 2, anything else 3
pub fn max_attempts_for(tier: &UserTier) -> u32 {
    match tier {
        UserTier::Enterprise => 5,
        UserTier::Premium => 4,
        UserTier::Basic => 3,
        UserTier::Free => 2,
        UserTier::Unrecognized(_) => DEFAULT_MAX_ATTEMPTS,
    }
}

/// Backoff does not depend on the tier today.
pub fn backoff_for(_tier: &UserTier) -> Backoff {
    Backoff::default()
}

pub fn policy_for(tier: &UserTier) -> JobPolicy {
    JobPolicy {
        priority: priority_for(tier),
        max_attempts: max_attempts_for(tier),
        backoff: backoff_for(tier),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_tier_table() {
        let cases = [
            (UserTier::Enterprise, 1, 5),
            (UserTier::Premium, 2, 4),
            (UserTier::Basic, 3, 3),
            (UserTier::Free, 4, 2),
        ];
        for (tier, priority, attempts) in cases {
            let policy = policy_for(&tier);
            assert_eq!(policy.priority, priority, "priority for {}", tier);
            assert_eq!(policy.max_attempts, attempts, "attempts for {}", tier);
            assert_eq!(policy.backoff, Backoff::exponential(Duration::from_millis(5000)));
        }
    }

    #[test]
    fn test_unrecognized_tier_defaults() {
        let policy = policy_for(&UserTier::parse("platinum"));
        assert_eq!(policy.priority, 4);
        assert_eq!(policy.max_attempts, 3);
    }

    #[test]
    fn test_exponential_delays() {
        let backoff = Backoff::default();
        let delays: Vec<u128> = (1..=4).map(|n| backoff.delay_for(n).as_millis()).collect();
        assert_eq!(delays, vec![5000, 10000, 20000, 40000]);
    }

    #[test]
    fn test_huge_attempt_count_saturates() {
        let backoff = Backoff::default();
        assert_eq!(backoff.delay_for(200), backoff.delay_for(33));
        assert!(backoff.delay_for(200) > backoff.delay_for(32));
    }

    proptest! {
        #[test]
        fn policy_is_deterministic(raw in "[a-zA-Z]{0,12}") {
            let tier = UserTier::parse(&raw);
            prop_assert_eq!(policy_for(&tier), policy_for(&tier));
        }

        #[test]
        fn priority_stays_in_band(raw in ".{0,16}") {
            let priority = priority_for(&UserTier::parse(&raw));
            prop_assert!((1..=4).contains(&priority));
        }

        #[test]
        fn exponential_delay_doubles(n in 1u32..20) {
            let backoff = Backoff::default();
            prop_assert_eq!(backoff.delay_for(n + 1), backoff.delay_for(n) * 2);
        }
    }
}
