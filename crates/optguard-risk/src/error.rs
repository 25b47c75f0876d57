//! Risk error types.

use optguard_persistence::PersistenceError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RiskError {
    /// Trading is halted; every trade attempt is rejected until cleared.
    #[error("Trading halted (marker at {marker})")]
    CrisisHalted { marker: String },

    #[error("Halt marker error: {0}")]
    HaltMarker(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("State file error: {0}")]
    Persistence(#[from] PersistenceError),
}

pub type RiskResult<T> = Result<T, RiskError>;
