//! Retry policy and backoff computation.
//!
//! Backoff for retry *n* (1-indexed) is
//! `base_delay × 2^(n-1) × (1 + jitter)`, with `jitter` drawn from
//! `[0, jitter_fraction)` by a [`JitterSource`]. A `RateLimit` error that
//! carries a server `retry_after_secs` hint waits at least that long, up to
//! [`MAX_RETRY_AFTER`] (and never past the elapsed budget, when one is set).

use rand::Rng;
use std::time::Duration;

use crate::error::{ClassifiedError, ErrorKind};

/// Multiplier applied per retry.
pub const BACKOFF_MULTIPLIER: u32 = 2;

/// Exclusive upper bound for [`RetryPolicy::jitter_fraction`].
pub const MAX_JITTER_FRACTION: f64 = 0.1;

/// Longest wait a server `Retry-After` hint can impose.
pub const MAX_RETRY_AFTER: Duration = Duration::from_secs(300);

// 2^20 × base is far beyond any sane wait; keeps the shift from overflowing.
const MAX_BACKOFF_EXPONENT: u32 = 20;

/// Source of backoff jitter.
///
/// Injected into the executor so tests can pin jitter to zero.
pub trait JitterSource: Send + Sync {
    /// Return a value in `[0, upper)`. `upper` may be `0.0`.
    fn sample(&self, upper: f64) -> f64;
}

/// Uniform jitter from the thread-local RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    fn sample(&self, upper: f64) -> f64 {
        if upper <= 0.0 {
            return 0.0;
        }
        rand::thread_rng().gen_range(0.0..upper)
    }
}

/// Always zero.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoJitter;

impl JitterSource for NoJitter {
    fn sample(&self, _upper: f64) -> f64 {
        0.0
    }
}

/// Bounded-retry policy, immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    jitter_fraction: f64,
    max_elapsed: Option<Duration>,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` is raised to 1 and `base_delay` to
    /// 1ms if given lower values.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: base_delay.max(Duration::from_millis(1)),
            jitter_fraction: 0.0,
            max_elapsed: None,
        }
    }

    /// Set the jitter fraction, clamped into `[0, 0.1)`.
    pub fn with_jitter_fraction(mut self, fraction: f64) -> Self {
        self.jitter_fraction = if fraction.is_finite() {
            fraction.clamp(0.0, MAX_JITTER_FRACTION - f64::EPSILON)
        } else {
            0.0
        };
        self
    }

    /// Cap the cumulative time spent across attempts and backoff sleeps.
    pub fn with_max_elapsed(mut self, budget: Option<Duration>) -> Self {
        self.max_elapsed = budget;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn base_delay(&self) -> Duration {
        self.base_delay
    }

    pub fn jitter_fraction(&self) -> f64 {
        self.jitter_fraction
    }

    pub fn max_elapsed(&self) -> Option<Duration> {
        self.max_elapsed
    }

    /// Exponential delay for retry `retry` (1-indexed) with the given jitter.
    pub fn backoff_delay(&self, retry: u32, jitter: f64) -> Duration {
        let exponent = retry.saturating_sub(1).min(MAX_BACKOFF_EXPONENT);
        let delay = self
            .base_delay
            .saturating_mul(BACKOFF_MULTIPLIER.pow(exponent));
        if jitter > 0.0 {
            Duration::try_from_secs_f64(delay.as_secs_f64() * (1.0 + jitter))
                .unwrap_or(Duration::MAX)
        } else {
            delay
        }
    }

    /// Delay before retry `retry` following `error`.
    ///
    /// Rate-limit hints take precedence when they ask for a longer wait.
    /// The hint is server-controlled, so it is capped at [`MAX_RETRY_AFTER`]
    /// and at the elapsed budget.
    pub fn delay_for(
        &self,
        retry: u32,
        error: &ClassifiedError,
        jitter: &dyn JitterSource,
    ) -> Duration {
        let computed = self.backoff_delay(retry, jitter.sample(self.jitter_fraction));
        match (error.kind(), error.retry_after_secs()) {
            (ErrorKind::RateLimit, Some(secs)) => {
                let mut hint = Duration::from_secs(secs).min(MAX_RETRY_AFTER);
                if let Some(budget) = self.max_elapsed {
                    hint = hint.min(budget);
                }
                computed.max(hint)
            }
            _ => computed,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(1000)).with_jitter_fraction(0.05)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedJitter(f64);

    impl JitterSource for FixedJitter {
        fn sample(&self, upper: f64) -> f64 {
            self.0.min(upper)
        }
    }

    #[test]
    fn test_exponential_backoff() {
        let policy = RetryPolicy::new(5, Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1, 0.0), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(2, 0.0), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(3, 0.0), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(4, 0.0), Duration::from_millis(8000));
    }

    #[test]
    fn test_jitter_scales_delay() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000)).with_jitter_fraction(0.05);
        let err = ClassifiedError::new(ErrorKind::Server, "HTTP 500", "cid");
        let delay = policy.delay_for(2, &err, &FixedJitter(0.05));
        assert_eq!(delay, Duration::from_millis(2100));
    }

    #[test]
    fn test_random_jitter_within_bounds() {
        let policy = RetryPolicy::new(3, Duration::from_millis(1000)).with_jitter_fraction(0.09);
        let err = ClassifiedError::new(ErrorKind::Server, "HTTP 500", "cid");
        for _ in 0..200 {
            let delay = policy.delay_for(1, &err, &RandomJitter);
            assert!(delay >= Duration::from_millis(1000));
            assert!(delay < Duration::from_millis(1090));
        }
    }

    #[test]
    fn test_jitter_fraction_clamped() {
        let policy = RetryPolicy::default().with_jitter_fraction(0.5);
        assert!(policy.jitter_fraction() < MAX_JITTER_FRACTION);
        let policy = RetryPolicy::default().with_jitter_fraction(-1.0);
        assert_eq!(policy.jitter_fraction(), 0.0);
        let policy = RetryPolicy::default().with_jitter_fraction(f64::NAN);
        assert_eq!(policy.jitter_fraction(), 0.0);
    }

    #[test]
    fn test_minimums_enforced() {
        let policy = RetryPolicy::new(0, Duration::ZERO);
        assert_eq!(policy.max_attempts(), 1);
        assert_eq!(policy.base_delay(), Duration::from_millis(1));
    }

    #[test]
    fn test_retry_after_overrides_shorter_backoff() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let err = ClassifiedError::new(ErrorKind::RateLimit, "HTTP 429", "cid")
            .with_retry_after(Some(5));
        assert_eq!(policy.delay_for(1, &err, &NoJitter), Duration::from_secs(5));
    }

    #[test]
    fn test_backoff_kept_when_longer_than_retry_after() {
        let policy = RetryPolicy::new(5, Duration::from_millis(3000));
        let err = ClassifiedError::new(ErrorKind::RateLimit, "HTTP 429", "cid")
            .with_retry_after(Some(1));
        assert_eq!(policy.delay_for(2, &err, &NoJitter), Duration::from_secs(6));
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = RetryPolicy::new(3, Duration::from_millis(100));
        let err = ClassifiedError::new(ErrorKind::RateLimit, "HTTP 429", "cid")
            .with_retry_after(Some(u64::MAX));
        assert_eq!(policy.delay_for(1, &err, &NoJitter), MAX_RETRY_AFTER);

        let budgeted = policy.with_max_elapsed(Some(Duration::from_secs(10)));
        assert_eq!(
            budgeted.delay_for(1, &err, &NoJitter),
            Duration::from_secs(10)
        );
    }

    #[test]
    fn test_huge_base_delay_with_jitter_saturates() {
        let policy = RetryPolicy::new(3, Duration::MAX).with_jitter_fraction(0.05);
        assert_eq!(policy.backoff_delay(2, 0.05), Duration::MAX);
    }

    #[test]
    fn test_large_retry_index_saturates() {
        let policy = RetryPolicy::new(u32::MAX, Duration::from_millis(1));
        let delay = policy.backoff_delay(u32::MAX, 0.0);
        assert_eq!(delay, Duration::from_millis(1 << MAX_BACKOFF_EXPONENT));
    }
}
