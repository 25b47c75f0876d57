//! Prometheus metrics for the risk-control plane.
//!
//! # Panics
//!
//! Metric registration uses `unwrap()`. A registration failure means a
//! duplicate metric name, which must crash at startup rather than fail
//! silently. These panics only occur during static initialization.

use std::fs;
use std::path::Path;

use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, register_int_gauge,
    register_int_gauge_vec, CounterVec, Encoder, Histogram, IntCounter, IntGauge, IntGaugeVec,
    TextEncoder,
};

use crate::error::TelemetryResult;

/// Halt marker present (1) or absent (0).
pub static HALTED: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("optguard_halted", "Trading halted by crisis marker (1=halted)").unwrap()
});

/// Breaker state per dependency: 0=closed, 1=half_open, 2=open.
pub static BREAKER_STATE: Lazy<IntGaugeVec> = Lazy::new(|| {
    register_int_gauge_vec!(
        "optguard_breaker_state",
        "Circuit breaker state (0=closed, 1=half_open, 2=open)",
        &["name"]
    )
    .unwrap()
});

pub static BREAKER_REJECTIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "optguard_breaker_rejections_total",
        "Calls rejected by an open circuit breaker",
        &["name"]
    )
    .unwrap()
});

/// Time spent waiting for the trade lock.
pub static LOCK_WAIT_MS: Lazy<Histogram> = Lazy::new(|| {
    register_histogram!(
        "optguard_lock_wait_ms",
        "Trade lock acquisition wait in milliseconds",
        vec![1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0, 30000.0]
    )
    .unwrap()
});

pub static LOCK_TIMEOUTS_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    register_int_counter!(
        "optguard_lock_timeouts_total",
        "Trade lock acquisitions that timed out"
    )
    .unwrap()
});

pub static CRISIS_CONDITIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "optguard_crisis_conditions_total",
        "Crisis conditions detected",
        &["kind"]
    )
    .unwrap()
});

/// Forced-close outcomes.
/// Labels: status (dry_run/closed/skipped/failed)
pub static CLOSURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "optguard_closures_total",
        "Forced-close results by status",
        &["status"]
    )
    .unwrap()
});

pub static CHECKLIST_VIOLATIONS_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "optguard_checklist_violations_total",
        "Pre-trade checklist violations",
        &["check"]
    )
    .unwrap()
});

pub static OPEN_POSITIONS: Lazy<IntGauge> = Lazy::new(|| {
    register_int_gauge!("optguard_open_positions", "Open positions in the last snapshot").unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    pub fn set_halted(halted: bool) {
        HALTED.set(i64::from(halted));
    }

    /// Set breaker state from its serialized name (`CLOSED`, `HALF_OPEN`, `OPEN`).
    pub fn breaker_state(name: &str, state: &str) {
        let code = match state {
            "OPEN" => 2,
            "HALF_OPEN" => 1,
            _ => 0,
        };
        BREAKER_STATE.with_label_values(&[name]).set(code);
    }

    pub fn breaker_rejected(name: &str) {
        BREAKER_REJECTIONS_TOTAL.with_label_values(&[name]).inc();
    }

    pub fn lock_wait(wait_ms: f64) {
        LOCK_WAIT_MS.observe(wait_ms);
    }

    pub fn lock_timeout() {
        LOCK_TIMEOUTS_TOTAL.inc();
    }

    pub fn crisis_condition(kind: &str) {
        CRISIS_CONDITIONS_TOTAL.with_label_values(&[kind]).inc();
    }

    pub fn closure(status: &str) {
        CLOSURES_TOTAL.with_label_values(&[status]).inc();
    }

    pub fn checklist_violation(check: &str) {
        CHECKLIST_VIOLATIONS_TOTAL.with_label_values(&[check]).inc();
    }

    pub fn open_positions(count: usize) {
        OPEN_POSITIONS.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Text exposition of every registered metric.
    pub fn gather_text() -> TelemetryResult<String> {
        let mut buf = Vec::new();
        TextEncoder::new().encode(&prometheus::gather(), &mut buf)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    /// Replace `path` with the current exposition (temp file, then rename).
    pub fn write_textfile(path: &Path) -> TelemetryResult<()> {
        let text = Self::gather_text()?;
        let tmp = path.with_extension("prom.tmp");
        fs::write(&tmp, text)?;
        fs::rename(&tmp, path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_exposition_contains_recorded_metrics() {
        Metrics::set_halted(true);
        Metrics::breaker_state("broker", "OPEN");
        Metrics::closure("failed");

        let text = Metrics::gather_text().unwrap();
        assert!(text.contains("optguard_halted 1"));
        assert!(text.contains("optguard_breaker_state{name=\"broker\"} 2"));
        assert!(text.contains("optguard_closures_total{status=\"failed\"}"));
    }

    #[test]
    fn test_textfile_written() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("metrics.prom");
        Metrics::open_positions(3);
        Metrics::write_textfile(&path).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("optguard_open_positions"));
        assert!(!dir.path().join("metrics.prom.tmp").exists());
    }
}
