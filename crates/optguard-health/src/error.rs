//! Health error types.

use optguard_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HealthError {
    /// A remediation ran and did not fix the problem. Surfaced, never retried.
    #[error("Remediation for {check} failed: {reason}")]
    HealCheckFailure { check: String, reason: String },

    #[error("Remediation refused for {0}: check must be resolved by an operator")]
    NotRemediable(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type HealthResult<T> = Result<T, HealthError>;
