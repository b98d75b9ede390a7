//! Retry backoff policy.

use chrono::{DateTime, Utc};
use std::time::Duration;

/// Optional jitter hook: maps a computed delay and attempt count to the
/// final delay. Injected explicitly so tests stay deterministic.
pub type JitterFn = fn(Duration, u32) -> Duration;

/// Exponential backoff with a cap and an attempt ceiling.
///
/// Deterministic given `attempt_count`: no hidden randomness. The delay for
/// the first failed attempt is `base_delay`, doubling per attempt up to
/// `max_delay`.
#[derive(Debug, Clone)]
pub struct BackoffPolicy {
    /// Delay after the first failed attempt (doubles each attempt).
    pub base_delay: Duration,
    /// Maximum delay between retries.
    pub max_delay: Duration,
    /// Total attempts allowed before a job is dead-lettered.
    pub max_attempts: u32,
    /// Optional jitter, applied after the cap.
    pub jitter: Option<JitterFn>,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(2),
            max_delay: Duration::from_secs(60),
            max_attempts: 3,
            jitter: None,
        }
    }
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_delay: Duration, max_attempts: u32) -> Self {
        Self {
            base_delay,
            max_delay,
            max_attempts,
            jitter: None,
        }
    }

    /// Set the maximum attempt count.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Inject a jitter function.
    pub fn with_jitter(mut self, jitter: JitterFn) -> Self {
        self.jitter = Some(jitter);
        self
    }

    /// Delay before the next retry, given the number of failed attempts so
    /// far (1-based: pass the attempt count after the failure).
    pub fn delay_for_attempt(&self, attempt_count: u32) -> Duration {
        let exponent = attempt_count.saturating_sub(1).min(31);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exponent))
            .min(self.max_delay);
        match self.jitter {
            Some(jitter) => jitter(delay, attempt_count),
            None => delay,
        }
    }

    /// True exactly when the attempt ceiling has been reached; routes the
    /// job to DLQ admission instead of rescheduling.
    pub fn is_exhausted(&self, attempt_count: u32) -> bool {
        attempt_count >= self.max_attempts
    }

    /// Timestamp before which the job is not eligible for retry.
    pub fn next_retry_at(&self, now: DateTime<Utc>, attempt_count: u32) -> DateTime<Utc> {
        let delay = self.delay_for_attempt(attempt_count);
        now + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::seconds(60))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_delay_doubles_from_base() {
        let policy = BackoffPolicy::default();

        assert_eq!(policy.delay_for_attempt(1), Duration::from_secs(2));
        assert_eq!(policy.delay_for_attempt(2), Duration::from_secs(4));
        assert_eq!(policy.delay_for_attempt(3), Duration::from_secs(8));
        assert_eq!(policy.delay_for_attempt(4), Duration::from_secs(16));
    }

    #[test]
    fn test_delay_non_decreasing_and_capped() {
        let policy = BackoffPolicy::default();

        let mut last = Duration::ZERO;
        for attempt in 1..64 {
            let delay = policy.delay_for_attempt(attempt);
            assert!(delay >= last);
            assert!(delay <= Duration::from_secs(60));
            last = delay;
        }
        assert_eq!(policy.delay_for_attempt(63), Duration::from_secs(60));
    }

    #[test]
    fn test_exhausted_exactly_at_max_attempts() {
        let policy = BackoffPolicy::default().with_max_attempts(3);

        assert!(!policy.is_exhausted(0));
        assert!(!policy.is_exhausted(2));
        assert!(policy.is_exhausted(3));
        assert!(policy.is_exhausted(4));
    }

    #[test]
    fn test_jitter_is_explicit_and_injectable() {
        fn plus_one(delay: Duration, _attempt: u32) -> Duration {
            delay + Duration::from_secs(1)
        }

        let plain = BackoffPolicy::default();
        let jittered = BackoffPolicy::default().with_jitter(plus_one);

        assert_eq!(
            jittered.delay_for_attempt(1),
            plain.delay_for_attempt(1) + Duration::from_secs(1)
        );
    }

    #[test]
    fn test_next_retry_at_offsets_now() {
        let policy = BackoffPolicy::default();
        let now = Utc::now();
        let at = policy.next_retry_at(now, 2);
        assert_eq!(at - now, chrono::Duration::seconds(4));
    }
}
