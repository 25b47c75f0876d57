//! Forced-close management for losing positions.
//!
//! - `recommend`: pure CRITICAL/HIGH/MEDIUM close recommendations
//! - `pdt`: pattern-day-trade safe quantity trimming
//! - `auto_close`: guarded, partial-failure tolerant execution with an
//!   audit report per run

pub mod auto_close;
pub mod error;
pub mod pdt;
pub mod recommend;

pub use auto_close::{
    AutoCloseConfig, AutoCloseEngine, AutoCloseRun, CloseResult, CloseStatus, BROKER_BREAKER,
};
pub use error::{PositionError, PositionResult};
pub use pdt::{pdt_safe_qty, same_day_opened_qty};
pub use recommend::{recommend_closures, ClosePriority, CloseRecommendation};
