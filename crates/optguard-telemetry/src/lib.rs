//! Prometheus metrics and structured logging for optguard.
//!
//! - Structured logging with tracing (JSON in production)
//! - Prometheus metrics for breakers, the halt marker, the trade lock,
//!   forced closures and checklist violations
//! - Text exposition written to a file for a textfile collector

pub mod error;
pub mod logging;
pub mod metrics;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{default_filter, init_logging};
pub use metrics::Metrics;
