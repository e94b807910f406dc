//! Retry policy for queued jobs.

use std::time::Duration;

use rand::Rng;

use crate::config::QueueConfig;

/// Exponential backoff policy.
///
/// `max_attempts` counts every execution including the first, so a policy of
/// 3 allows two retries.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Fraction (0.0-1.0) of random spread applied to each delay.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            jitter: 0.1,
        }
    }
}

impl RetryPolicy {
    pub fn from_config(config: &QueueConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.base_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            ..Default::default()
        }
    }

    /// A policy that never retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Default::default()
        }
    }

    /// Delay before the attempt following `attempt` (1-indexed), without jitter.
    pub fn base_delay_after(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }

    /// Delay before the attempt following `attempt`, with jitter applied.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let base = self.base_delay_after(attempt);
        if self.jitter <= 0.0 || base.is_zero() {
            return base;
        }
        let spread = rand::thread_rng().gen_range(-self.jitter..=self.jitter);
        base.mul_f64((1.0 + spread).max(0.0))
    }

    /// Whether another attempt is allowed after `attempt` attempts.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 4,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_millis(350),
            jitter: 0.0,
        }
    }

    #[test]
    fn test_delay_doubles_until_cap() {
        let policy = policy();
        assert_eq!(policy.base_delay_after(0), Duration::ZERO);
        assert_eq!(policy.base_delay_after(1), Duration::from_millis(100));
        assert_eq!(policy.base_delay_after(2), Duration::from_millis(200));
        assert_eq!(policy.base_delay_after(3), Duration::from_millis(350));
        assert_eq!(policy.base_delay_after(40), Duration::from_millis(350));
    }

    #[test]
    fn test_jitter_stays_within_spread() {
        let policy = RetryPolicy { jitter: 0.1, ..policy() };
        for _ in 0..100 {
            let delay = policy.delay_after(2);
            assert!(delay >= Duration::from_millis(179) && delay <= Duration::from_millis(221));
        }
    }

    #[test]
    fn test_should_retry_counts_first_attempt() {
        let policy = policy();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(3));
        assert!(!policy.should_retry(4));
        assert!(!RetryPolicy::no_retry().should_retry(1));
    }

    #[test]
    fn test_from_config_never_allows_zero_attempts() {
        let config = QueueConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(RetryPolicy::from_config(&config).max_attempts, 1);
    }
}
