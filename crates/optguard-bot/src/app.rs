//! Control plane orchestration.
//!
//! Owns one instance of every guard and exposes the operations the CLI and
//! a trading loop call:
//! - `submit_guarded`: the only path from a proposal to the broker
//! - `monitor_once` / `run_monitor`: crisis evaluation, forced closes, health
//! - operator commands (status, clear halt, lock inspection and release)

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use optguard_core::{
    AccountSnapshot, BrokerError, BrokerResult, DynBroker, Fill, OrderAck, TradeHistoryStore,
    TradeProposal,
};
use optguard_health::{HealthSummary, SelfHealer};
use optguard_lock::{with_trade_lock, FileTradeLock, LockStatus, NamedLock};
use optguard_persistence::JsonTradeHistory;
use optguard_position::{AutoCloseEngine, AutoCloseRun, BROKER_BREAKER};
use optguard_resilience::{guarded_call, BreakerRegistry, BreakerStatus, RetryPolicy};
use optguard_risk::{ChecklistResult, CrisisMonitor, CrisisReport, PreTradeChecklist};
use optguard_telemetry::Metrics;
use serde::Serialize;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::SnapshotBroker;
use crate::config::AppConfig;
use crate::error::{AppError, AppResult};

/// Outcome of a guarded submission that reached a decision.
///
/// Lock timeouts, an active halt and broker failures are errors instead.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum SubmitDecision {
    Submitted(OrderAck),
    /// Already at the open position limit.
    PositionLimit { open: usize, max: usize },
    ChecklistFailed(ChecklistResult),
}

impl SubmitDecision {
    pub fn is_submitted(&self) -> bool {
        matches!(self, Self::Submitted(_))
    }
}

/// One monitoring pass.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorPass {
    pub open_positions: usize,
    pub report: CrisisReport,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_close: Option<AutoCloseRun>,
}

/// Operator view for `optguard status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    pub halted: bool,
    pub halt_marker: Option<String>,
    pub lock: LockStatus,
    pub breakers: Vec<BreakerStatus>,
    pub crisis_log_entries: Option<usize>,
    pub snapshot: Option<AccountSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub snapshot_error: Option<String>,
}

/// Stands in for a trade history that failed to load, so PDT checks skip
/// instead of closing blind.
struct UnavailableHistory(String);

impl TradeHistoryStore for UnavailableHistory {
    fn fills_for(&self, _symbol: &str) -> BrokerResult<Vec<Fill>> {
        Err(BrokerError::Unavailable(self.0.clone()))
    }
}

/// Every guard, wired together.
pub struct ControlPlane {
    config: AppConfig,
    broker: DynBroker,
    breakers: BreakerRegistry,
    retry: RetryPolicy,
    lock: FileTradeLock,
    crisis: CrisisMonitor,
    checklist: PreTradeChecklist,
    auto_close: AutoCloseEngine,
}

impl ControlPlane {
    pub fn new(config: AppConfig, broker: DynBroker) -> AppResult<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.state_dir)?;

        let breakers = BreakerRegistry::new(config.breaker.clone());
        let retry = RetryPolicy::new(config.retry.clone());

        let history: Arc<dyn TradeHistoryStore> = match JsonTradeHistory::load(config.history_path()) {
            Ok(history) => Arc::new(history),
            Err(e) => {
                warn!(%e, "Trade history unreadable, PDT-limited closes will be skipped");
                Arc::new(UnavailableHistory(e.to_string()))
            }
        };

        let auto_close = AutoCloseEngine::new(
            Arc::clone(&broker),
            breakers.breaker(BROKER_BREAKER),
            retry.clone(),
            config.thresholds.clone(),
            config.auto_close.clone(),
            config.reports_dir(),
        )
        .with_history(history);

        let plane = Self {
            lock: FileTradeLock::new(&config.state_dir, config.lock.clone()),
            crisis: CrisisMonitor::new(&config.state_dir, config.thresholds.clone()),
            checklist: PreTradeChecklist::new(config.checklist.clone()),
            auto_close,
            breakers,
            retry,
            broker,
            config,
        };
        info!(state_dir = %plane.config.state_dir.display(), "Control plane ready");
        Ok(plane)
    }

    /// Control plane over the snapshot-file paper broker.
    pub fn paper(config: AppConfig) -> AppResult<Self> {
        std::fs::create_dir_all(&config.state_dir)?;
        let broker: DynBroker = Arc::new(SnapshotBroker::new(&config.state_dir));
        Self::new(config, broker)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn breakers(&self) -> &BreakerRegistry {
        &self.breakers
    }

    pub fn crisis(&self) -> &CrisisMonitor {
        &self.crisis
    }

    pub fn trade_lock(&self) -> &FileTradeLock {
        &self.lock
    }

    /// Positions and equity through the broker breaker.
    pub async fn fetch_snapshot(&self) -> AppResult<AccountSnapshot> {
        let result = self.auto_close.fetch_snapshot().await;
        self.record_breakers();
        Ok(result?)
    }

    // ========================================================================
    // Guarded submission
    // ========================================================================

    /// Submit `proposal` with every pre-trade guard applied, in order:
    /// trade lock, halt marker, fresh positions, position limit, checklist,
    /// then the broker through breaker and retry.
    ///
    /// Everything after the lock runs as one unit, so two callers can never
    /// both pass the position limit on the same count.
    pub async fn submit_guarded(&self, proposal: &TradeProposal) -> AppResult<SubmitDecision> {
        let requested = Instant::now();
        let outcome = with_trade_lock(&self.lock, self.config.lock.timeout(), || async {
            Metrics::lock_wait(requested.elapsed().as_secs_f64() * 1000.0);
            self.submit_locked(proposal).await
        })
        .await;

        match outcome {
            Ok(decision) => decision,
            Err(e) => {
                if e.is_timeout() {
                    Metrics::lock_timeout();
                    error!(%e, symbol = %proposal.symbol, "Trade aborted: lock not acquired");
                }
                Err(e.into())
            }
        }
    }

    async fn submit_locked(&self, proposal: &TradeProposal) -> AppResult<SubmitDecision> {
        if let Err(e) = self.crisis.ensure_not_halted() {
            warn!(symbol = %proposal.symbol, "Trade rejected: trading halted");
            return Err(e.into());
        }

        let snapshot = self.fetch_snapshot().await?;
        let open = snapshot.open_positions().count();
        let max = self.config.thresholds.max_positions;
        if open >= max {
            warn!(symbol = %proposal.symbol, open, max, "Trade rejected: position limit");
            return Ok(SubmitDecision::PositionLimit { open, max });
        }

        // Size against live equity, not the strategy's cached figure.
        let sized = TradeProposal {
            account_equity: snapshot.equity,
            ..proposal.clone()
        };
        let result = self.checklist.evaluate(&sized);
        if !result.passed {
            for violation in &result.violations {
                Metrics::checklist_violation(violation.check.as_str());
            }
            return Ok(SubmitDecision::ChecklistFailed(result));
        }

        let order = sized.to_order();
        let breaker = self.breakers.breaker(BROKER_BREAKER);
        let ack = guarded_call(&breaker, &self.retry, || self.broker.submit_order(order.clone()))
            .await
            .map_err(|e| {
                if e.is_open() {
                    Metrics::breaker_rejected(BROKER_BREAKER);
                }
                AppError::Broker(e.to_string())
            });
        self.record_breakers();
        let ack = ack?;

        info!(
            symbol = %order.symbol,
            side = %order.side,
            qty = %order.qty,
            client_order_id = %ack.client_order_id,
            broker_order_id = %ack.broker_order_id,
            "Order submitted"
        );
        Ok(SubmitDecision::Submitted(ack))
    }

    /// Checklist only, against the proposal as given. Nothing is submitted.
    pub fn evaluate_checklist(&self, proposal: &TradeProposal) -> ChecklistResult {
        self.checklist.evaluate(proposal)
    }

    // ========================================================================
    // Monitoring
    // ========================================================================

    /// One crisis pass: evaluate, halt on breach, optionally hand the
    /// recommendations to the auto-close engine, export metrics.
    pub async fn monitor_once(&self) -> AppResult<MonitorPass> {
        let snapshot = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                Metrics::set_halted(self.crisis.is_halted());
                self.write_metrics();
                return Err(e);
            }
        };

        let open_positions = snapshot.open_positions().count();
        Metrics::open_positions(open_positions);

        let report = self.crisis.check_crisis(&snapshot);
        for condition in &report.conditions {
            Metrics::crisis_condition(condition.kind.as_str());
        }
        if let Some(e) = &report.marker_write_error {
            error!(error = %e, "Halt not persisted, trading stays halted in this process only");
        }
        Metrics::set_halted(self.crisis.is_halted());

        let auto_close = if report.breached() && self.config.monitor.auto_close_on_crisis {
            let run = self.run_auto_close(&snapshot).await?;
            Some(run)
        } else {
            None
        };

        self.record_breakers();
        self.write_metrics();
        Ok(MonitorPass {
            open_positions,
            report,
            auto_close,
        })
    }

    async fn run_auto_close(&self, snapshot: &AccountSnapshot) -> AppResult<AutoCloseRun> {
        let dry_run = !self.config.monitor.execute_closures;
        let run = if dry_run {
            self.auto_close.run(snapshot, true).await
        } else {
            // Closing changes the position count the submit path checks.
            with_trade_lock(&self.lock, self.config.lock.timeout(), || {
                self.auto_close.run(snapshot, false)
            })
            .await?
        };
        for result in &run.results {
            Metrics::closure(result.status.as_str());
        }
        Ok(run)
    }

    /// Fresh snapshot, recommendations and (optionally) execution.
    pub async fn auto_close(&self, execute: bool) -> AppResult<AutoCloseRun> {
        let snapshot = self.fetch_snapshot().await?;
        let run = if execute {
            with_trade_lock(&self.lock, self.config.lock.timeout(), || {
                self.auto_close.run(&snapshot, false)
            })
            .await?
        } else {
            self.auto_close.run(&snapshot, true).await
        };
        for result in &run.results {
            Metrics::closure(result.status.as_str());
        }
        Ok(run)
    }

    /// Health checks over the state directory.
    pub fn healer(&self) -> SelfHealer {
        SelfHealer::from_config(
            &self.config.health,
            &self.config.state_dir,
            self.config.thresholds.max_positions,
            &self.config.checklist.allowed_tickers,
        )
    }

    /// Run crisis and health passes until `cancel` fires.
    pub async fn run_monitor(&self, cancel: CancellationToken) -> AppResult<()> {
        let mut crisis_tick =
            tokio::time::interval(Duration::from_secs(self.config.monitor.interval_secs));
        crisis_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut health_tick =
            tokio::time::interval(Duration::from_secs(self.config.health.interval_secs.max(1)));
        health_tick.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let healer = self.healer();
        info!(
            interval_secs = self.config.monitor.interval_secs,
            health_interval_secs = self.config.health.interval_secs,
            execute_closures = self.config.monitor.execute_closures,
            "Monitor started"
        );

        let mut passes = 0u64;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!(passes, "Shutdown signal received");
                    break;
                }

                _ = crisis_tick.tick() => {
                    passes += 1;
                    match self.monitor_once().await {
                        Ok(pass) if pass.report.breached() => warn!(
                            conditions = pass.report.conditions.len(),
                            halted = pass.report.halted,
                            "Crisis conditions present"
                        ),
                        Ok(pass) => debug!(
                            open_positions = pass.open_positions,
                            halted = pass.report.halted,
                            "Monitoring pass clean"
                        ),
                        Err(e) => error!(%e, "Monitoring pass failed"),
                    }
                }

                _ = health_tick.tick() => {
                    let summary: HealthSummary = if self.config.monitor.auto_heal {
                        healer.heal().summary
                    } else {
                        healer.run_health_checks()
                    };
                    info!(overall = %summary.overall, "Health pass");
                }
            }
        }

        self.write_metrics();
        Ok(())
    }

    // ========================================================================
    // Operator commands
    // ========================================================================

    pub async fn status(&self) -> AppResult<StatusReport> {
        let halted = self.crisis.is_halted();
        let halt_marker = match self.crisis.marker().read() {
            Ok(content) => content,
            Err(e) => Some(format!("<unreadable: {e}>")),
        };
        let crisis_log_entries = self.crisis.log().entries().map(|e| e.len()).ok();
        let (snapshot, snapshot_error) = match self.fetch_snapshot().await {
            Ok(snapshot) => (Some(snapshot), None),
            Err(e) => (None, Some(e.to_string())),
        };

        Ok(StatusReport {
            halted,
            halt_marker,
            lock: self.lock.inspect()?,
            breakers: self.breakers.statuses(),
            crisis_log_entries,
            snapshot,
            snapshot_error,
        })
    }

    /// Remove the halt marker. Returns the backup path, or `None` if no
    /// marker was set.
    pub fn clear_halt(&self, reason: &str) -> AppResult<Option<PathBuf>> {
        let backup = self.crisis.clear_halt(reason)?;
        Metrics::set_halted(self.crisis.is_halted());
        Ok(backup)
    }

    pub fn lock_status(&self) -> AppResult<LockStatus> {
        Ok(self.lock.inspect()?)
    }

    pub fn force_release_lock(&self, reason: &str) -> AppResult<()> {
        if reason.trim().is_empty() {
            return Err(AppError::Config("force release requires a reason".to_string()));
        }
        Ok(self.lock.force_release(reason)?)
    }

    fn record_breakers(&self) {
        for status in self.breakers.statuses() {
            Metrics::breaker_state(&status.name, status.state.as_str());
        }
    }

    fn write_metrics(&self) {
        let path = self.config.metrics_path();
        if let Err(e) = Metrics::write_textfile(&path) {
            warn!(%e, path = %path.display(), "Failed to write metrics");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use optguard_core::{MockBroker, Position};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn plane(dir: &TempDir, broker: Arc<MockBroker>) -> ControlPlane {
        let config = AppConfig {
            state_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        ControlPlane::new(config, broker).unwrap()
    }

    #[tokio::test]
    async fn test_corrupt_history_skips_pdt_closes() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("fills.json"), b"{not json").unwrap();
        let broker = Arc::new(MockBroker::new(AccountSnapshot::new(
            dec!(10000),
            vec![Position::new("SPY", dec!(1), dec!(-600), dec!(1000))],
        )));
        let plane = plane(&dir, broker.clone());

        let run = plane.auto_close(true).await.unwrap();
        assert_eq!(run.results.len(), 1);
        assert_eq!(run.results[0].status, optguard_position::CloseStatus::Skipped);
        assert!(broker.closes().is_empty());
    }

    #[tokio::test]
    async fn test_force_release_requires_reason() {
        let dir = TempDir::new().unwrap();
        let plane = plane(&dir, Arc::new(MockBroker::new(AccountSnapshot::new(dec!(1), vec![]))));
        assert!(plane.force_release_lock("  ").is_err());
        assert!(plane.force_release_lock("stuck after crash").is_ok());
    }
}
