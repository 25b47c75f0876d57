//! Lock error types.

use optguard_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum LockError {
    /// The lock was not obtained in time. Callers must abort, never proceed.
    #[error(
        "Timed out after {waited_ms}ms waiting for lock {name} (held by {})",
        .holder.as_deref().unwrap_or("unknown")
    )]
    Timeout {
        name: String,
        waited_ms: u64,
        holder: Option<String>,
    },

    #[error("Lock I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid lock payload: {0}")]
    Payload(String),

    #[error("Lock state error: {0}")]
    Persistence(#[from] PersistenceError),
}

impl LockError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

pub type LockResult<T> = Result<T, LockError>;
