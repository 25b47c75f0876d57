//! Retry nested inside a circuit breaker.

use std::fmt::Display;
use std::future::Future;

use crate::breaker::CircuitBreaker;
use crate::error::{BreakerError, RetryError};
use crate::retry::{RetryPolicy, RetryableError};

/// Error from a guarded external call.
pub type GuardedError<E> = BreakerError<RetryError<E>>;

/// Run `op` under `retry`, the whole retry loop counting as one breaker call.
///
/// Exhausted retries count as one breaker failure, and so does an early
/// abort whose error marks the dependency as down (`Unavailable`). Any other
/// non-retryable error means the dependency answered, so it is recorded as
/// a success. An open breaker rejects before `op` runs at all.
pub async fn guarded_call<F, Fut, T, E>(
    breaker: &CircuitBreaker,
    retry: &RetryPolicy,
    op: F,
) -> Result<T, GuardedError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: RetryableError + Display,
{
    breaker
        .call_with(
            || retry.execute(op),
            |err: &RetryError<E>| err.is_exhausted() || err.inner().is_dependency_failure(),
        )
        .await
}
