//! Retry policy attached to every submitted job.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::JobPolicyConfig;
use crate::constants::policy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Backoff {
    Fixed { delay: Duration },
    /// Retry `n` (1-based) waits `base * 2^(n-1)`
    Exponential { base: Duration },
}

impl Backoff {
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self {
            Self::Fixed { delay } => *delay,
            Self::Exponential { base } => {
                let exponent = retry.saturating_sub(1).min(31);
                base.saturating_mul(1u32 << exponent)
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total executions allowed, the first one included
    pub attempts: u32,
    pub backoff: Backoff,
    /// How long finished jobs stay in the archive
    pub retention: Duration,
    /// Hard per-execution limit; exceeding it counts as a failed attempt
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: policy::DEFAULT_ATTEMPTS,
            backoff: Backoff::Exponential {
                base: policy::DEFAULT_BACKOFF_BASE,
            },
            retention: policy::DEFAULT_RETENTION,
            timeout: policy::DEFAULT_JOB_TIMEOUT,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &JobPolicyConfig) -> Self {
        Self {
            attempts: config.attempts.max(1),
            backoff: Backoff::Exponential {
                base: Duration::from_millis(config.backoff_base_ms),
            },
            retention: Duration::from_secs(config.retention_seconds),
            timeout: Duration::from_secs(config.timeout_seconds),
        }
    }

    /// After `attempts_made` failed executions, is another one allowed?
    pub fn allows_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.attempts
    }

    /// Delay before the retry that follows `attempts_made` failed executions
    pub fn retry_delay(&self, attempts_made: u32) -> Duration {
        self.backoff.delay_for(attempts_made)
    }

    /// How long a received message stays reserved
    pub fn visibility_timeout(&self) -> Duration {
        self.timeout + policy::VISIBILITY_GRACE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_default_policy() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.attempts, 3);
        assert_eq!(
            policy.backoff,
            Backoff::Exponential {
                base: Duration::from_secs(5)
            }
        );
        assert_eq!(policy.retention, Duration::from_secs(604_800));
        assert_eq!(policy.timeout, Duration::from_secs(1800));
    }

    #[test]
    fn test_exponential_delays() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.retry_delay(1), Duration::from_secs(5));
        assert_eq!(policy.retry_delay(2), Duration::from_secs(10));
        assert_eq!(policy.retry_delay(3), Duration::from_secs(20));
    }

    #[test]
    fn test_allows_retry_counts_first_execution() {
        let policy = RetryPolicy::default();
        assert!(policy.allows_retry(1));
        assert!(policy.allows_retry(2));
        assert!(!policy.allows_retry(3));
    }

    #[test]
    fn test_from_config_matches_default() {
        let policy = RetryPolicy::from_config(&JobPolicyConfig::default());
        assert_eq!(policy, RetryPolicy::default());
    }

    proptest! {
        #[test]
        fn prop_backoff_never_decreases(retry in 1u32..64) {
            let backoff = Backoff::Exponential { base: Duration::from_millis(5000) };
            prop_assert!(backoff.delay_for(retry + 1) >= backoff.delay_for(retry));
        }
    }
}
