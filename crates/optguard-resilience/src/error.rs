//! Resilience error types.

use thiserror::Error;

/// Error returned by a breaker-wrapped call.
#[derive(Debug, Error)]
pub enum BreakerError<E> {
    /// Breaker is open (or its half-open trial slot is taken); the operation
    /// was not attempted. Callers should fail fast, not retry immediately.
    #[error("Circuit '{name}' is open, retry after {retry_after_ms}ms")]
    Open { name: String, retry_after_ms: u64 },

    /// The operation ran and failed; the error is passed through unchanged.
    #[error("{0}")]
    Inner(E),
}

impl<E> BreakerError<E> {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    /// The underlying operation error, if the operation ran.
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Open { .. } => None,
            Self::Inner(e) => Some(e),
        }
    }
}

/// Error returned by `RetryPolicy::execute`.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// Every attempt failed with a retryable error; carries the last one.
    #[error("Retries exhausted after {attempts} attempts: {last_error}")]
    Exhausted { attempts: u32, last_error: E },

    /// A non-retryable error stopped the loop early.
    #[error("Non-retryable error on attempt {attempt}: {error}")]
    Aborted { attempt: u32, error: E },
}

impl<E> RetryError<E> {
    /// Number of attempts made before giving up.
    pub fn attempts(&self) -> u32 {
        match self {
            Self::Exhausted { attempts, .. } => *attempts,
            Self::Aborted { attempt, .. } => *attempt,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self, Self::Exhausted { .. })
    }

    /// The last underlying error.
    pub fn into_inner(self) -> E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Aborted { error, .. } => error,
        }
    }

    pub fn inner(&self) -> &E {
        match self {
            Self::Exhausted { last_error, .. } => last_error,
            Self::Aborted { error, .. } => error,
        }
    }
}
