//! Bounded exponential backoff for retryable publish failures.
//!
//! ```text
//! ceiling(n) = min(backoff_base * 2^(n-1), backoff_max)     n = 1, 2, ...
//! delay(n)   = ceiling(n)                 (jitter off)
//!            = uniform(0 ..= ceiling(n))  (full jitter)
//! ```
//!
//! `max_attempts` counts every publish, the first one included, so a policy
//! with `max_attempts = 5` sleeps at most four times.

use std::time::Duration;

use rand::Rng;

use crate::config;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total publish attempts, first try included.
    pub max_attempts: u32,
    /// Ceiling of the first retry delay.
    pub backoff_base: Duration,
    /// Cap on any single delay.
    pub backoff_max: Duration,
    /// Randomize each delay below its ceiling.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: config::DEFAULT_RETRY_ATTEMPTS,
            backoff_base: Duration::from_millis(config::DEFAULT_BACKOFF_BASE_MS),
            backoff_max: Duration::from_millis(config::DEFAULT_BACKOFF_MAX_MS),
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// A single attempt, never retried.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    /// Upper bound of the delay before retry number `retry` (1-based).
    pub fn ceiling(&self, retry: u32) -> Duration {
        let shift = retry.saturating_sub(1).min(20);
        self.backoff_base
            .saturating_mul(1u32 << shift)
            .min(self.backoff_max)
    }

    /// Delay to sleep before retry number `retry` (1-based).
    pub fn delay(&self, retry: u32) -> Duration {
        let ceiling = self.ceiling(retry);
        if !self.jitter || ceiling.is_zero() {
            return ceiling;
        }
        let millis = u64::try_from(ceiling.as_millis()).unwrap_or(u64::MAX);
        Duration::from_millis(rand::thread_rng().gen_range(0..=millis))
    }

    /// Worst-case time spent sleeping across the whole budget.
    pub fn max_total_delay(&self) -> Duration {
        (1..self.attempts()).map(|retry| self.ceiling(retry)).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(jitter: bool) -> RetryPolicy {
        RetryPolicy {
            max_attempts: 5,
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            jitter,
        }
    }

    #[test]
    fn ceiling_doubles_then_caps() {
        let p = policy(false);
        assert_eq!(p.ceiling(1), Duration::from_millis(100));
        assert_eq!(p.ceiling(2), Duration::from_millis(200));
        assert_eq!(p.ceiling(3), Duration::from_millis(400));
        assert_eq!(p.ceiling(4), Duration::from_millis(500));
        assert_eq!(p.ceiling(40), Duration::from_millis(500));
    }

    #[test]
    fn delay_without_jitter_equals_ceiling() {
        let p = policy(false);
        for retry in 1..6 {
            assert_eq!(p.delay(retry), p.ceiling(retry));
        }
    }

    #[test]
    fn jittered_delay_stays_under_ceiling() {
        let p = policy(true);
        for _ in 0..200 {
            for retry in 1..6 {
                assert!(p.delay(retry) <= p.ceiling(retry));
            }
        }
    }

    #[test]
    fn total_delay_is_bounded() {
        // 100 + 200 + 400 + 500
        assert_eq!(policy(true).max_total_delay(), Duration::from_millis(1_200));
        assert_eq!(RetryPolicy::no_retry().max_total_delay(), Duration::ZERO);
    }

    #[test]
    fn zero_attempts_means_one() {
        let p = RetryPolicy {
            max_attempts: 0,
            ..policy(false)
        };
        assert_eq!(p.attempts(), 1);
    }
}
