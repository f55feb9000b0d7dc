//! Retry and backoff policy.

use rand::Rng;
use std::time::Duration;

/// HTTP statuses worth retrying.
const RETRIABLE_STATUSES: &[u16] = &[429, 500, 502, 503];

/// Every error is retried on the first two attempts.
const UNCONDITIONAL_ATTEMPTS: u32 = 2;

pub fn is_retriable_status(status: u16) -> bool {
    RETRIABLE_STATUSES.contains(&status)
}

/// Retry policy for REST calls.
///
/// Total attempts are `max(2, retries) + 1`. Before retry `n` the client
/// sleeps `base * n` plus a uniform jitter in `[-jitter, +jitter]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub retries: u32,
    pub base: Duration,
    pub jitter: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: 2,
            base: Duration::from_secs(20),
            jitter: Duration::from_secs(10),
        }
    }
}

impl RetryPolicy {
    pub fn new(retries: u32) -> Self {
        Self {
            retries,
            ..Self::default()
        }
    }

    /// Same attempt count, no sleeping.
    pub fn immediate(retries: u32) -> Self {
        Self {
            retries,
            base: Duration::ZERO,
            jitter: Duration::ZERO,
        }
    }

    pub fn total_attempts(&self) -> u32 {
        self.retries.max(2) + 1
    }

    /// Whether a failed `attempt` (1-based) is followed by another.
    pub fn should_retry(&self, attempt: u32, retriable: bool) -> bool {
        attempt < self.total_attempts() && (attempt <= UNCONDITIONAL_ATTEMPTS || retriable)
    }

    /// Sleep before retry number `n` (1-based).
    pub fn backoff(&self, n: u32) -> Duration {
        let base = self.base.as_secs_f64() * f64::from(n);
        let jitter = self.jitter.as_secs_f64();
        let offset = if jitter > 0.0 {
            rand::thread_rng().gen_range(-jitter..=jitter)
        } else {
            0.0
        };
        Duration::from_secs_f64((base + offset).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_total_attempts_floor() {
        assert_eq!(RetryPolicy::new(0).total_attempts(), 3);
        assert_eq!(RetryPolicy::new(2).total_attempts(), 3);
        assert_eq!(RetryPolicy::new(5).total_attempts(), 6);
    }

    #[test]
    fn test_first_two_attempts_always_retried() {
        let policy = RetryPolicy::new(5);
        assert!(policy.should_retry(1, false));
        assert!(policy.should_retry(2, false));
        assert!(!policy.should_retry(3, false));
        assert!(policy.should_retry(3, true));
        assert!(policy.should_retry(5, true));
        assert!(!policy.should_retry(6, true));
    }

    #[test]
    fn test_backoff_bounds() {
        let policy = RetryPolicy::default();
        for n in 1..=4 {
            let secs = policy.backoff(n).as_secs_f64();
            let center = 20.0 * f64::from(n);
            assert!(secs >= center - 10.0 && secs <= center + 10.0, "{}", secs);
        }
        assert_eq!(RetryPolicy::immediate(3).backoff(2), Duration::ZERO);
    }

    #[test]
    fn test_retriable_statuses() {
        for status in [429, 500, 502, 503] {
            assert!(is_retriable_status(status));
        }
        for status in [400, 403, 404, 413, 504] {
            assert!(!is_retriable_status(status));
        }
    }
}
