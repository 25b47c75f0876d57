//! Promotion gate.
//!
//! Compares aggregated live/paper metrics and backtest metrics against
//! thresholds before a strategy is promoted. Every threshold is evaluated
//! independently; the gate passes only when no deficit remains, or when an
//! operator supplies an explicit (logged) override.

pub mod error;
pub mod gate;
pub mod summary;
pub mod thresholds;

pub use error::{GateError, GateResult};
pub use gate::{evaluate_gate, GateDecision, GateDeficit, MetricSource, PromotionGate, OVERRIDE_ENV};
pub use summary::{MetricSummary, RateScale, RawRate};
pub use thresholds::GateThresholds;
