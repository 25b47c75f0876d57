//! optguard control plane.
//!
//! Wires every guard into one `ControlPlane`:
//! - Guarded order submission (lock, halt check, position limit, checklist)
//! - Crisis monitoring loop with optional forced closes
//! - Self-healing health checks
//! - Operator commands behind the `optguard` CLI

pub mod app;
pub mod broker;
pub mod config;
pub mod error;

pub use app::{ControlPlane, MonitorPass, StatusReport, SubmitDecision};
pub use broker::SnapshotBroker;
pub use config::{AppConfig, MonitorConfig};
pub use error::{AppError, AppResult};
