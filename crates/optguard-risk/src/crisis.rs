//! Crisis monitor and the durable halt marker.
//!
//! CrisisMonitor evaluates three independent conditions per pass:
//! - EXCESS_POSITIONS: open position count above `max_positions`
//! - PORTFOLIO_LOSS: total unrealized loss / equity above `crisis_loss_pct`
//! - SINGLE_POSITION_CRISIS: any position's |P/L| / cost basis above
//!   `single_position_loss_pct`
//!
//! On breach it creates the halt marker if none exists. The marker is a
//! latch: no monitoring pass ever clears or rewrites it. Only
//! `clear_halt` (an operator action) removes it, after backing it up.
//!
//! Fail-closed: if the marker cannot be read, the system is treated as
//! halted. If it cannot be written, the monitor latches the halt in memory
//! so this process keeps rejecting trades until `clear_halt`.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, SecondsFormat, Utc};
use optguard_core::{AccountSnapshot, RiskThresholds};
use optguard_persistence::{create_new_atomic, write_atomic, CrisisLog};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::error::{RiskError, RiskResult};

/// Marker file name inside the state directory.
pub const HALT_MARKER_FILE: &str = "TRADING_HALTED";

/// Crisis log file name inside the state directory.
const CRISIS_LOG_FILE: &str = "crisis_log.json";

// ============================================================================
// Conditions
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CrisisKind {
    ExcessPositions,
    PortfolioLoss,
    SinglePositionCrisis,
}

impl CrisisKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ExcessPositions => "EXCESS_POSITIONS",
            Self::PortfolioLoss => "PORTFOLIO_LOSS",
            Self::SinglePositionCrisis => "SINGLE_POSITION_CRISIS",
        }
    }
}

impl std::fmt::Display for CrisisKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One breached condition from a monitoring pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisCondition {
    pub kind: CrisisKind,
    pub current_value: Decimal,
    pub threshold: Decimal,
    /// Position that triggered a single-position crisis.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    pub detected_at: DateTime<Utc>,
}

impl std::fmt::Display for CrisisCondition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}: {} > {}",
            self.kind, self.current_value, self.threshold
        )?;
        if let Some(symbol) = &self.symbol {
            write!(f, " ({symbol})")?;
        }
        Ok(())
    }
}

/// Evaluate all crisis conditions against one snapshot. Pure.
pub fn evaluate_crisis(
    snapshot: &AccountSnapshot,
    thresholds: &RiskThresholds,
    now: DateTime<Utc>,
) -> Vec<CrisisCondition> {
    let mut conditions = Vec::new();
    let open: Vec<_> = snapshot.open_positions().collect();

    if open.len() > thresholds.max_positions {
        conditions.push(CrisisCondition {
            kind: CrisisKind::ExcessPositions,
            current_value: Decimal::from(open.len()),
            threshold: Decimal::from(thresholds.max_positions),
            symbol: None,
            detected_at: now,
        });
    }

    let total_loss = snapshot.total_unrealized_loss();
    let loss_ratio = if snapshot.equity > Decimal::ZERO {
        Some((total_loss / snapshot.equity).round_dp(4))
    } else if !open.is_empty() {
        // No equity left to lose against: treat as a total loss.
        Some(Decimal::ONE)
    } else {
        None
    };
    if let Some(ratio) = loss_ratio {
        if ratio > thresholds.crisis_loss_pct {
            conditions.push(CrisisCondition {
                kind: CrisisKind::PortfolioLoss,
                current_value: ratio,
                threshold: thresholds.crisis_loss_pct,
                symbol: None,
                detected_at: now,
            });
        }
    }

    for position in &open {
        if let Some(ratio) = position.pnl_ratio_abs() {
            if ratio > thresholds.single_position_loss_pct {
                conditions.push(CrisisCondition {
                    kind: CrisisKind::SinglePositionCrisis,
                    current_value: ratio.round_dp(4),
                    threshold: thresholds.single_position_loss_pct,
                    symbol: Some(position.symbol.clone()),
                    detected_at: now,
                });
            }
        }
    }

    conditions
}

// ============================================================================
// HaltMarker
// ============================================================================

/// Durable halt flag. Its presence rejects every trade.
#[derive(Debug, Clone)]
pub struct HaltMarker {
    path: PathBuf,
}

impl HaltMarker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True if the marker exists or its presence cannot be determined.
    pub fn is_set(&self) -> bool {
        match self.path.try_exists() {
            Ok(exists) => exists,
            Err(e) => {
                error!(?e, path = %self.path.display(), "Cannot stat halt marker, assuming halted");
                true
            }
        }
    }

    /// Marker text, `None` if absent.
    pub fn read(&self) -> RiskResult<Option<String>> {
        match std::fs::read_to_string(&self.path) {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Create the marker unless one exists. Never overwrites.
    /// Returns true if this call created it.
    pub fn create(&self, content: &str) -> RiskResult<bool> {
        Ok(create_new_atomic(&self.path, content.as_bytes())?)
    }

    /// Back up and remove the marker. Returns the backup path, or `None`
    /// if there was no marker.
    pub fn clear(&self, reason: &str, now: DateTime<Utc>) -> RiskResult<Option<PathBuf>> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(RiskError::HaltMarker(
                "a reason is required to clear the halt".to_string(),
            ));
        }
        let Some(content) = self.read()? else {
            return Ok(None);
        };

        let file_name = self
            .path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(HALT_MARKER_FILE);
        let backup = self.path.with_file_name(format!(
            "{file_name}.cleared-{}.bak",
            now.format("%Y%m%dT%H%M%SZ")
        ));
        let audit = format!(
            "{content}\n---\nCleared at: {}\nReason: {reason}\n",
            now.to_rfc3339_opts(SecondsFormat::Secs, true)
        );
        write_atomic(&backup, audit.as_bytes())?;
        std::fs::remove_file(&self.path)?;

        warn!(
            reason,
            backup = %backup.display(),
            "Halt marker cleared by operator"
        );
        Ok(Some(backup))
    }
}

// ============================================================================
// CrisisMonitor
// ============================================================================

/// Entry appended to the crisis log when a halt is written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrisisLogEntry {
    pub detected_at: DateTime<Utc>,
    pub conditions: Vec<CrisisCondition>,
    pub position_count: usize,
    pub equity: Decimal,
    pub total_unrealized_pl: Decimal,
}

/// Outcome of one monitoring pass.
#[derive(Debug, Clone, Serialize)]
pub struct CrisisReport {
    /// Trading must not proceed.
    pub halted: bool,
    pub conditions: Vec<CrisisCondition>,
    /// This pass created the marker.
    pub marker_written: bool,
    /// Marker write failed; `halted` is forced true.
    pub marker_write_error: Option<String>,
    pub log_error: Option<String>,
}

impl CrisisReport {
    pub fn breached(&self) -> bool {
        !self.conditions.is_empty()
    }
}

pub struct CrisisMonitor {
    thresholds: RiskThresholds,
    marker: HaltMarker,
    log: CrisisLog,
    /// Set when a breach could not be persisted to the marker.
    latched: AtomicBool,
}

impl CrisisMonitor {
    /// Monitor with `TRADING_HALTED` and `crisis_log.json` in `state_dir`.
    pub fn new(state_dir: impl AsRef<Path>, thresholds: RiskThresholds) -> Self {
        let dir = state_dir.as_ref();
        Self::with_paths(
            dir.join(HALT_MARKER_FILE),
            dir.join(CRISIS_LOG_FILE),
            thresholds,
        )
    }

    pub fn with_paths(
        marker_path: impl Into<PathBuf>,
        log_path: impl Into<PathBuf>,
        thresholds: RiskThresholds,
    ) -> Self {
        Self {
            thresholds,
            marker: HaltMarker::new(marker_path),
            log: CrisisLog::new(log_path),
            latched: AtomicBool::new(false),
        }
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn marker(&self) -> &HaltMarker {
        &self.marker
    }

    pub fn log(&self) -> &CrisisLog {
        &self.log
    }

    pub fn evaluate(&self, snapshot: &AccountSnapshot) -> Vec<CrisisCondition> {
        evaluate_crisis(snapshot, &self.thresholds, Utc::now())
    }

    /// Evaluate, and on breach write the marker if absent.
    pub fn check_crisis(&self, snapshot: &AccountSnapshot) -> CrisisReport {
        self.check_crisis_at(snapshot, Utc::now())
    }

    pub fn check_crisis_at(&self, snapshot: &AccountSnapshot, now: DateTime<Utc>) -> CrisisReport {
        let conditions = evaluate_crisis(snapshot, &self.thresholds, now);
        if conditions.is_empty() {
            return CrisisReport {
                halted: self.is_halted(),
                conditions,
                marker_written: false,
                marker_write_error: None,
                log_error: None,
            };
        }

        for condition in &conditions {
            warn!(condition = %condition, "Crisis condition detected");
        }

        let mut report = CrisisReport {
            halted: true,
            conditions,
            marker_written: false,
            marker_write_error: None,
            log_error: None,
        };

        let content = render_marker(&report.conditions, snapshot, now);
        match self.marker.create(&content) {
            Ok(true) => {
                report.marker_written = true;
                error!(
                    marker = %self.marker.path().display(),
                    conditions = report.conditions.len(),
                    "TRADING HALTED"
                );
                let entry = CrisisLogEntry {
                    detected_at: now,
                    conditions: report.conditions.clone(),
                    position_count: snapshot.open_positions().count(),
                    equity: snapshot.equity,
                    total_unrealized_pl: snapshot.total_unrealized_pl(),
                };
                if let Err(e) = self.log.append(&entry) {
                    warn!(?e, "Failed to append crisis log");
                    report.log_error = Some(e.to_string());
                }
            }
            Ok(false) => {
                info!(marker = %self.marker.path().display(), "Already halted, marker left untouched");
            }
            Err(e) => {
                error!(?e, marker = %self.marker.path().display(), "Failed to write halt marker, latching halt in memory");
                self.latched.store(true, Ordering::SeqCst);
                report.marker_write_error = Some(e.to_string());
            }
        }

        report
    }

    /// Fail-closed halt query: the marker, or an unpersisted breach.
    pub fn is_halted(&self) -> bool {
        self.latched.load(Ordering::SeqCst) || self.marker.is_set()
    }

    /// `Err(CrisisHalted)` while halted.
    pub fn ensure_not_halted(&self) -> RiskResult<()> {
        if self.is_halted() {
            return Err(RiskError::CrisisHalted {
                marker: self.marker.path().display().to_string(),
            });
        }
        Ok(())
    }

    /// Operator action: back up and remove the marker.
    pub fn clear_halt(&self, reason: &str) -> RiskResult<Option<PathBuf>> {
        let backup = self.marker.clear(reason, Utc::now())?;
        if self.latched.swap(false, Ordering::SeqCst) {
            warn!(reason, "In-memory halt latch cleared by operator");
        }
        Ok(backup)
    }
}

fn render_marker(
    conditions: &[CrisisCondition],
    snapshot: &AccountSnapshot,
    now: DateTime<Utc>,
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "TRADING HALTED");
    let _ = writeln!(out, "==============");
    let _ = writeln!(
        out,
        "Halted at: {}",
        now.to_rfc3339_opts(SecondsFormat::Secs, true)
    );
    let _ = writeln!(out, "Reason: crisis conditions detected by the monitor");
    let _ = writeln!(out);
    let _ = writeln!(out, "Conditions:");
    for condition in conditions {
        let _ = writeln!(out, "- {condition}");
    }
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Open positions: {}  Equity: {}  Unrealized P/L: {}",
        snapshot.open_positions().count(),
        snapshot.equity,
        snapshot.total_unrealized_pl()
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "All trade execution is rejected while this file exists.");
    let _ = writeln!(out, "To resume, review the conditions above, then run:");
    let _ = writeln!(out, "    optguard clear-halt --reason \"<why it is safe to resume>\"");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use optguard_core::Position;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn monitor(dir: &TempDir) -> CrisisMonitor {
        CrisisMonitor::new(dir.path(), RiskThresholds::default())
    }

    fn calm() -> AccountSnapshot {
        AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-100), dec!(1000))],
        )
    }

    #[test]
    fn test_single_position_crisis_detected() {
        let dir = TempDir::new().unwrap();
        let snapshot = AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-6000), dec!(10000))],
        );

        let report = monitor(&dir).check_crisis(&snapshot);
        assert!(report.halted);
        assert!(report.marker_written);
        let single: Vec<_> = report
            .conditions
            .iter()
            .filter(|c| c.kind == CrisisKind::SinglePositionCrisis)
            .collect();
        assert_eq!(single.len(), 1);
        assert_eq!(single[0].current_value, dec!(0.6));
        assert_eq!(single[0].symbol.as_deref(), Some("SPY"));
    }

    #[test]
    fn test_excess_positions_detected() {
        let positions = (0..5)
            .map(|i| Position::new(format!("SYM{i}"), dec!(1), dec!(0), dec!(100)))
            .collect();
        let snapshot = AccountSnapshot::new(dec!(10000), positions);

        let conditions = evaluate_crisis(&snapshot, &RiskThresholds::default(), Utc::now());
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].kind, CrisisKind::ExcessPositions);
        assert_eq!(conditions[0].current_value, dec!(5));
    }

    #[test]
    fn test_portfolio_loss_detected() {
        let snapshot = AccountSnapshot::new(
            dec!(10000),
            vec![
                Position::new("SPY", dec!(1), dec!(-1400), dec!(3000)),
                Position::new("QQQ", dec!(1), dec!(-1200), dec!(3000)),
            ],
        );
        let conditions = evaluate_crisis(&snapshot, &RiskThresholds::default(), Utc::now());
        assert_eq!(conditions.len(), 1);
        assert_eq!(conditions[0].kind, CrisisKind::PortfolioLoss);
        assert_eq!(conditions[0].current_value, dec!(0.26));
    }

    #[test]
    fn test_non_positive_equity_with_positions_is_crisis() {
        let snapshot = AccountSnapshot::new(
            dec!(0),
            vec![Position::new("SPY", dec!(1), dec!(-10), dec!(1000))],
        );
        let conditions = evaluate_crisis(&snapshot, &RiskThresholds::default(), Utc::now());
        assert!(conditions.iter().any(|c| c.kind == CrisisKind::PortfolioLoss));
    }

    #[test]
    fn test_no_breach_writes_nothing() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);

        let report = monitor.check_crisis(&calm());
        assert!(!report.halted);
        assert!(report.conditions.is_empty());
        assert!(!monitor.marker().path().exists());
        assert!(monitor.log().entries().unwrap().is_empty());
    }

    #[test]
    fn test_existing_marker_never_overwritten() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        let crisis = AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-6000), dec!(10000))],
        );

        assert!(monitor.check_crisis(&crisis).marker_written);
        let original = monitor.marker().read().unwrap().unwrap();

        let worse = AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("QQQ", dec!(1), dec!(-9000), dec!(10000))],
        );
        let second = monitor.check_crisis(&worse);
        assert!(second.halted);
        assert!(!second.marker_written);
        assert_eq!(monitor.marker().read().unwrap().unwrap(), original);
        assert_eq!(monitor.log().entries().unwrap().len(), 1);
    }

    #[test]
    fn test_calm_pass_does_not_clear_halt() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        monitor.marker().create("manual halt").unwrap();

        let report = monitor.check_crisis(&calm());
        assert!(report.halted);
        assert!(monitor.is_halted());
        assert!(monitor.ensure_not_halted().is_err());
    }

    #[test]
    fn test_marker_has_clearing_instructions() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        let crisis = AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-6000), dec!(10000))],
        );
        monitor.check_crisis(&crisis);

        let content = monitor.marker().read().unwrap().unwrap();
        assert!(content.contains("SINGLE_POSITION_CRISIS"));
        assert!(content.contains("optguard clear-halt --reason"));
    }

    #[test]
    fn test_clear_halt_backs_up_then_removes() {
        let dir = TempDir::new().unwrap();
        let monitor = monitor(&dir);
        monitor.marker().create("halted for testing").unwrap();

        assert!(monitor.clear_halt("  ").is_err());
        assert!(monitor.is_halted());

        let backup = monitor.clear_halt("positions reviewed").unwrap().unwrap();
        assert!(!monitor.is_halted());
        let saved = std::fs::read_to_string(&backup).unwrap();
        assert!(saved.starts_with("halted for testing"));
        assert!(saved.contains("Reason: positions reviewed"));
        assert!(backup
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("TRADING_HALTED.cleared-"));

        assert!(monitor.clear_halt("again").unwrap().is_none());
    }

    #[test]
    fn test_unwritable_marker_fails_closed() {
        let dir = TempDir::new().unwrap();
        // The marker's parent is a regular file, so nothing under it can be created.
        let blocker = dir.path().join("blocker");
        std::fs::write(&blocker, b"x").unwrap();
        let monitor = CrisisMonitor::with_paths(
            blocker.join(HALT_MARKER_FILE),
            dir.path().join("log.json"),
            RiskThresholds::default(),
        );
        let crisis = AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-6000), dec!(10000))],
        );

        let report = monitor.check_crisis(&crisis);
        assert!(report.halted);
        assert!(!report.marker_written);
        assert!(report.marker_write_error.is_some());
    }

    #[cfg(unix)]
    #[test]
    fn test_failed_marker_write_latches_halt() {
        use std::ffi::OsStr;
        use std::os::unix::ffi::OsStrExt;

        let dir = TempDir::new().unwrap();
        // Not valid UTF-8: the write fails while the marker still stats as absent.
        let marker = dir.path().join(OsStr::from_bytes(b"TRADING_HALTED\xff"));
        let monitor = CrisisMonitor::with_paths(
            marker,
            dir.path().join("log.json"),
            RiskThresholds::default(),
        );
        let crisis = AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-6000), dec!(10000))],
        );
        assert!(!monitor.is_halted());

        let report = monitor.check_crisis(&crisis);
        assert!(report.marker_write_error.is_some());
        assert!(!monitor.marker().is_set());
        assert!(monitor.is_halted());
        assert!(matches!(
            monitor.ensure_not_halted(),
            Err(RiskError::CrisisHalted { .. })
        ));

        // A calm pass does not release it.
        assert!(monitor.check_crisis(&calm()).halted);
        assert!(monitor.is_halted());

        assert!(monitor.clear_halt("disk repaired").unwrap().is_none());
        assert!(!monitor.is_halted());
        monitor.ensure_not_halted().unwrap();
    }
}
