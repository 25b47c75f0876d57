//! Self-healing health checks.
//!
//! `SelfHealer` runs independent checks over persisted state and the
//! environment. A check with a registered remediation gets exactly one
//! auto-fix attempt; everything else is surfaced as-is.

pub mod checks;
pub mod config;
pub mod error;
pub mod healer;

pub use checks::{
    ConfigCompleteness, DataStaleness, PositionCompliance, RequiredFields, RestoreFromBackup,
    StateFileIntegrity,
};
pub use config::{HealthConfig, RequiredFieldsSpec, StalenessSpec};
pub use error::{HealthError, HealthResult};
pub use healer::{
    HealReport, HealedCheck, HealthCheck, HealthCheckResult, HealthStatus, HealthSummary,
    Remediation, SelfHealer,
};
