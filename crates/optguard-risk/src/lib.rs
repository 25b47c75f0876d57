//! Trade-gating risk controls.
//!
//! - `PreTradeChecklist`: policy checks every proposal must pass, all
//!   violations collected
//! - `CrisisMonitor`: portfolio crisis detection that writes a durable
//!   `HaltMarker`; only an operator clears it

pub mod checklist;
pub mod crisis;
pub mod error;

pub use checklist::{
    ChecklistConfig, ChecklistResult, CheckKind, EarningsBlackout, PreTradeChecklist, Violation,
};
pub use crisis::{
    evaluate_crisis, CrisisCondition, CrisisKind, CrisisLogEntry, CrisisMonitor, CrisisReport,
    HaltMarker, HALT_MARKER_FILE,
};
pub use error::{RiskError, RiskResult};
