//! Position error types.

use optguard_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PositionError {
    #[error("Position refresh failed: {0}")]
    Refresh(String),

    #[error("Audit report error: {0}")]
    Report(#[from] PersistenceError),
}

pub type PositionResult<T> = Result<T, PositionError>;
