//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Core error: {0}")]
    Core(#[from] optguard_core::CoreError),

    #[error("Trade lock error: {0}")]
    Lock(#[from] optguard_lock::LockError),

    #[error("Risk error: {0}")]
    Risk(#[from] optguard_risk::RiskError),

    #[error("Position error: {0}")]
    Position(#[from] optguard_position::PositionError),

    #[error("Health error: {0}")]
    Health(#[from] optguard_health::HealthError),

    #[error("Promotion gate error: {0}")]
    Gate(#[from] optguard_gate::GateError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] optguard_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] optguard_persistence::PersistenceError),

    #[error("Broker error: {0}")]
    Broker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    /// Trading is halted; the attempt was rejected before reaching the broker.
    pub fn is_halted(&self) -> bool {
        matches!(self, Self::Risk(optguard_risk::RiskError::CrisisHalted { .. }))
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::Lock(e) if e.is_timeout())
    }
}

pub type AppResult<T> = Result<T, AppError>;
