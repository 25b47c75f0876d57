//! Bounded exponential-backoff retry.
//!
//! Delay before retry `n` (1-based) is
//! `min(base_delay_ms * backoff_base^(n-1), max_delay_ms)`, optionally
//! spread by up to ±25% jitter. Retry always runs inside a breaker-guarded
//! call, never instead of one.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use optguard_core::BrokerError;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::RetryError;

/// Jitter spread as a fraction of the computed delay.
const JITTER_FRACTION: f64 = 0.25;

/// Classifies errors as worth retrying.
pub trait RetryableError {
    fn is_retryable(&self) -> bool;

    /// Whether the error says the dependency itself is unhealthy, as opposed
    /// to a valid answer the caller did not like. Breakers count these.
    fn is_dependency_failure(&self) -> bool {
        self.is_retryable()
    }
}

impl RetryableError for BrokerError {
    fn is_retryable(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited(_))
    }

    fn is_dependency_failure(&self) -> bool {
        self.is_retryable() || matches!(self, Self::Unavailable(_))
    }
}

impl RetryableError for std::io::Error {
    fn is_retryable(&self) -> bool {
        use std::io::ErrorKind;
        matches!(
            self.kind(),
            ErrorKind::Interrupted
                | ErrorKind::WouldBlock
                | ErrorKind::TimedOut
                | ErrorKind::ConnectionReset
                | ErrorKind::ConnectionAborted
        )
    }
}

/// Retry parameters. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts including the first. Default: 3.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the first retry (ms). Default: 500.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound on any single delay (ms). Default: 10,000.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Multiplier between consecutive delays. Default: 2.0.
    #[serde(default = "default_backoff_base")]
    pub backoff_base: f64,
    /// Spread delays by up to ±25%. Default: true.
    #[serde(default = "default_jitter")]
    pub jitter: bool,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_backoff_base() -> f64 {
    2.0
}

fn default_jitter() -> bool {
    true
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            backoff_base: default_backoff_base(),
            jitter: default_jitter(),
        }
    }
}

/// Retry executor.
#[derive(Debug, Clone, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    fn attempts_allowed(&self) -> u32 {
        self.config.max_attempts.max(1)
    }

    /// Delay before retry number `retry` (1-based), without jitter.
    pub fn base_delay(&self, retry: u32) -> Duration {
        let exponent = retry.saturating_sub(1).min(32) as i32;
        let raw = self.config.base_delay_ms as f64 * self.config.backoff_base.max(1.0).powi(exponent);
        let capped = raw.min(self.config.max_delay_ms as f64);
        Duration::from_millis(capped.max(0.0) as u64)
    }

    /// Delay before retry number `retry`, jitter applied when enabled.
    pub fn delay_for(&self, retry: u32) -> Duration {
        let base = self.base_delay(retry);
        if !self.config.jitter {
            return base;
        }
        let spread = base.as_millis() as f64 * JITTER_FRACTION;
        let offset = rand::thread_rng().gen_range(-1.0f64..=1.0) * spread;
        let jittered = (base.as_millis() as f64 + offset).max(0.0);
        Duration::from_millis(jittered as u64)
    }

    /// Run `op`, retrying errors whose `is_retryable()` is true.
    pub async fn execute<F, Fut, T, E>(&self, op: F) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: RetryableError + Display,
    {
        self.execute_if(op, |e: &E| e.is_retryable()).await
    }

    /// Run `op`, retrying errors for which `should_retry` returns true.
    ///
    /// Non-retryable errors return immediately as `Aborted`; after
    /// `max_attempts` failures the last error is returned as `Exhausted`.
    pub async fn execute_if<F, Fut, T, E, P>(&self, mut op: F, should_retry: P) -> Result<T, RetryError<E>>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&E) -> bool,
    {
        let max_attempts = self.attempts_allowed();
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            match op().await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(attempt, "Operation succeeded after retry");
                    }
                    return Ok(value);
                }
                Err(error) if !should_retry(&error) => {
                    debug!(attempt, %error, "Non-retryable error, aborting");
                    return Err(RetryError::Aborted { attempt, error });
                }
                Err(error) if attempt >= max_attempts => {
                    warn!(attempts = attempt, %error, "Retries exhausted");
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last_error: error,
                    });
                }
                Err(error) => {
                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        %error,
                        "Retryable error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts,
            base_delay_ms: 1,
            max_delay_ms: 2,
            backoff_base: 2.0,
            jitter: false,
        })
    }

    #[tokio::test]
    async fn test_fails_k_times_then_succeeds() {
        let policy = fast_policy(5);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let k = 3;

        let result = policy
            .execute(|| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                if n <= k {
                    Err(BrokerError::Transient(format!("attempt {n}")))
                } else {
                    Ok("filled")
                }
            })
            .await;

        assert_eq!(result.unwrap(), "filled");
        assert_eq!(calls.load(Ordering::SeqCst), k + 1);
    }

    #[tokio::test]
    async fn test_always_failing_reraises_last_error() {
        let policy = fast_policy(4);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = policy
            .execute(|| async move {
                let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                Err::<(), _>(BrokerError::Transient(format!("attempt {n}")))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 4);
        assert!(err.is_exhausted());
        assert_eq!(err.attempts(), 4);
        assert_eq!(
            err.into_inner(),
            BrokerError::Transient("attempt 4".to_string())
        );
    }

    #[tokio::test]
    async fn test_non_retryable_aborts_immediately() {
        let policy = fast_policy(5);
        let counter = AtomicU32::new(0);
        let calls = &counter;

        let err = policy
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BrokerError::Rejected("insufficient buying power".to_string()))
            })
            .await
            .unwrap_err();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(matches!(err, RetryError::Aborted { attempt: 1, .. }));
    }

    #[tokio::test]
    async fn test_zero_max_attempts_still_runs_once() {
        let policy = fast_policy(0);
        let counter = AtomicU32::new(0);
        let calls = &counter;
        let _ = policy
            .execute(|| async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Err::<(), _>(BrokerError::Transient("x".to_string()))
            })
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_backoff_grows_and_caps() {
        let policy = RetryPolicy::new(RetryConfig {
            max_attempts: 10,
            base_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_base: 2.0,
            jitter: false,
        });
        assert_eq!(policy.delay_for(1), Duration::from_millis(100));
        assert_eq!(policy.delay_for(2), Duration::from_millis(200));
        assert_eq!(policy.delay_for(3), Duration::from_millis(400));
        assert_eq!(policy.delay_for(5), Duration::from_millis(1_000));
        assert_eq!(policy.delay_for(30), Duration::from_millis(1_000));
    }

    #[test]
    fn test_jitter_stays_within_bounds() {
        let policy = RetryPolicy::new(RetryConfig {
            base_delay_ms: 1_000,
            max_delay_ms: 1_000,
            jitter: true,
            ..Default::default()
        });
        for retry in 1..20 {
            let ms = policy.delay_for(retry).as_millis() as u64;
            assert!((750..=1_250).contains(&ms), "delay {ms} out of bounds");
        }
    }

    #[test]
    fn test_broker_error_classification() {
        assert!(BrokerError::Transient("x".into()).is_retryable());
        assert!(BrokerError::RateLimited("x".into()).is_retryable());
        assert!(!BrokerError::Rejected("x".into()).is_retryable());
        assert!(!BrokerError::NotFound("x".into()).is_retryable());
        assert!(!BrokerError::Unavailable("x".into()).is_retryable());

        assert!(BrokerError::Unavailable("x".into()).is_dependency_failure());
        assert!(BrokerError::Transient("x".into()).is_dependency_failure());
        assert!(!BrokerError::Rejected("x".into()).is_dependency_failure());
        assert!(!BrokerError::NotFound("x".into()).is_dependency_failure());
    }
}
