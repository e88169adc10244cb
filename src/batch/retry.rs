//! Retry wrapper for a single unit of work
//!
//! Only failures classified as rate-limited are retried. Everything else
//! is assumed deterministic (bad input, not found, permission denied) and
//! returned on the first attempt.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::error::ClassifyFailure;
use super::types::duration_ms;
use crate::metrics;

/// Backoff configuration for rate-limited retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Total tries including the first one
    pub max_attempts: u32,
    /// Delay before the second attempt
    #[serde(with = "duration_ms")]
    pub initial_delay: Duration,
    /// Upper bound for any single wait
    #[serde(with = "duration_ms")]
    pub max_delay: Duration,
    /// Growth factor between consecutive waits
    pub backoff_multiplier: f64,
    /// Add up to 25% random jitter to each wait
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }

    pub fn with_jitter(mut self, jitter: bool) -> Self {
        self.jitter = jitter;
        self
    }

    /// Base wait after the given failed attempt (1-based), before jitter
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32) as i32;
        let millis =
            self.initial_delay.as_millis() as f64 * self.backoff_multiplier.powi(exponent);
        let capped = millis.min(self.max_delay.as_millis() as f64);
        Duration::from_millis(capped as u64)
    }

    /// Actual wait after `attempt`, including any server hint and jitter.
    ///
    /// Jitter is applied after the hint and the cap so that items throttled
    /// together do not wake together. `max_delay` stays a hard ceiling: once
    /// the wait sits at the cap, jitter pulls it down instead of up.
    pub fn delay_for(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let mut base = self.backoff(attempt);
        if let Some(hint) = retry_after {
            base = base.max(hint);
        }
        let base = base.min(self.max_delay);

        let spread = base.as_millis() as u64 / 4;
        if !self.jitter || spread == 0 {
            return base;
        }

        let base_ms = base.as_millis() as u64;
        let max_ms = self.max_delay.as_millis() as u64;
        let upper = (base_ms + spread).min(max_ms);
        let millis = if upper > base_ms {
            rand::thread_rng().gen_range(base_ms..=upper)
        } else {
            rand::thread_rng().gen_range(base_ms - spread..=base_ms)
        };
        Duration::from_millis(millis)
    }
}

/// Final result of a wrapped unit of work plus its retry bookkeeping
#[derive(Debug)]
pub struct Attempted<T, E> {
    pub result: Result<T, E>,
    /// Tries made, at least 1
    pub attempts: u32,
    /// Whether any try was throttled
    pub rate_limited: bool,
}

/// Executes a unit of work, retrying rate-limited failures with backoff
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// A wrapper that never retries
    pub fn disabled() -> Self {
        Self {
            policy: RetryPolicy::default().with_max_attempts(1),
        }
    }

    /// Execute an operation, retrying only while it reports rate limiting
    pub async fn execute<F, Fut, T, E>(&self, mut operation: F) -> Attempted<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: ClassifyFailure + std::fmt::Display,
    {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        let mut rate_limited = false;

        loop {
            attempt += 1;

            let error = match operation().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempts = attempt, "Operation succeeded after retries");
                    }
                    return Attempted {
                        result: Ok(value),
                        attempts: attempt,
                        rate_limited,
                    };
                }
                Err(error) => error,
            };

            if !error.is_rate_limited() {
                debug!(attempt, error = %error, "Terminal failure, not retrying");
                return Attempted {
                    result: Err(error),
                    attempts: attempt,
                    rate_limited,
                };
            }

            rate_limited = true;
            metrics::record_rate_limit_hit();

            if attempt >= max_attempts {
                warn!(
                    attempts = attempt,
                    error = %error,
                    "Rate limited on every attempt, giving up"
                );
                return Attempted {
                    result: Err(error),
                    attempts: attempt,
                    rate_limited,
                };
            }

            let delay = self.policy.delay_for(attempt, error.retry_after());
            warn!(
                attempt,
                max_attempts,
                delay_ms = delay.as_millis() as u64,
                "Rate limited, backing off"
            );
            metrics::record_retry();
            tokio::time::sleep(delay).await;
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::ApiError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(max_attempts)
            .with_initial_delay(Duration::from_millis(10))
            .with_max_delay(Duration::from_millis(100))
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = fast_policy(5).with_jitter(false);
        assert_eq!(policy.backoff(1), Duration::from_millis(10));
        assert_eq!(policy.backoff(2), Duration::from_millis(20));
        assert_eq!(policy.backoff(3), Duration::from_millis(40));
        assert_eq!(policy.backoff(10), Duration::from_millis(100));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = fast_policy(5);
        for attempt in 1..6 {
            let base = policy.backoff(attempt);
            for _ in 0..20 {
                let delay = policy.delay_for(attempt, None);
                assert!(delay >= base - base / 4);
                assert!(delay <= policy.max_delay);
            }
        }
    }

    #[test]
    fn test_retry_after_hint_is_capped() {
        let policy = fast_policy(3).with_jitter(false);
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_millis(50))),
            Duration::from_millis(50)
        );
        assert_eq!(
            policy.delay_for(1, Some(Duration::from_secs(60))),
            Duration::from_millis(100)
        );
    }

    #[test]
    fn test_hinted_delays_are_still_jittered() {
        let policy = RetryPolicy::default();
        let hint = Duration::from_secs(2);
        let delays: HashSet<Duration> =
            (0..50).map(|_| policy.delay_for(1, Some(hint))).collect();

        assert!(delays.len() > 1, "hinted waits must not be identical");
        for delay in delays {
            assert!(delay >= hint);
            assert!(delay <= hint + hint / 4);
        }
    }

    #[test]
    fn test_capped_delays_are_jittered_below_the_cap() {
        let policy = RetryPolicy::default()
            .with_initial_delay(Duration::from_secs(20))
            .with_max_delay(Duration::from_secs(30));
        let delays: HashSet<Duration> = (0..50).map(|_| policy.delay_for(2, None)).collect();

        assert!(delays.len() > 1, "waits at the cap must not be identical");
        for delay in delays {
            assert!(delay <= Duration::from_secs(30));
            assert!(delay >= Duration::from_millis(22_500));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(5));

        let outcome = executor
            .execute(|| {
                let calls = calls.clone();
                async move {
                    if calls.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err(ApiError::rate_limited("429"))
                    } else {
                        Ok(42)
                    }
                }
            })
            .await;

        assert_eq!(outcome.result.unwrap(), 42);
        assert_eq!(outcome.attempts, 3);
        assert!(outcome.rate_limited);
    }

    #[tokio::test(start_paused = true)]
    async fn test_terminal_failure_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let executor = RetryExecutor::new(fast_policy(5));

        let outcome = executor
            .execute(|| {
                let calls = calls.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(ApiError::NotFound("device 7".into()))
                }
            })
            .await;

        assert!(outcome.result.is_err());
        assert_eq!(outcome.attempts, 1);
        assert!(!outcome.rate_limited);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_runs_once() {
        let outcome = RetryExecutor::disabled()
            .execute(|| async { Err::<(), _>(ApiError::rate_limited("429")) })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert!(outcome.rate_limited);
    }
}
