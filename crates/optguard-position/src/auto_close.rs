//! Auto-close engine.
//!
//! Turns recommendations into broker close calls. Dry-run is the default;
//! execution is opt-in. Every broker call goes through the broker circuit
//! breaker with retry nested inside. One symbol failing never stops the
//! rest. Each run writes an audit report, whatever the outcome.

use std::collections::HashSet;
use std::fmt::Write as _;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use optguard_core::{
    AccountSnapshot, BrokerError, CloseAck, DynBroker, RiskThresholds, TradeHistoryStore,
};
use optguard_persistence::{AuditReportPaths, AuditReportWriter};
use optguard_resilience::{guarded_call, BreakerError, CircuitBreaker, GuardedError, RetryPolicy};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{PositionError, PositionResult};
use crate::pdt::{pdt_safe_qty, same_day_opened_qty};
use crate::recommend::{recommend_closures, ClosePriority, CloseRecommendation};

/// Registry name of the breaker guarding broker calls.
pub const BROKER_BREAKER: &str = "broker";

/// Outcome of a reconciled close.
struct CloseAttempt {
    /// Acknowledgement of the final close call; `None` when earlier
    /// unacknowledged fills already covered the request.
    ack: Option<CloseAck>,
    /// Quantity filled by attempts whose acknowledgement was lost.
    prefilled: Decimal,
}

// ============================================================================
// Configuration
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutoCloseConfig {
    /// Below this equity, same-day opens are never closed. Default: 25,000.
    #[serde(default = "default_pdt_equity_threshold")]
    pub pdt_equity_threshold: Decimal,
    #[serde(default = "default_pdt_protection")]
    pub pdt_protection: bool,
}

fn default_pdt_equity_threshold() -> Decimal {
    Decimal::from(25_000)
}

fn default_pdt_protection() -> bool {
    true
}

impl Default for AutoCloseConfig {
    fn default() -> Self {
        Self {
            pdt_equity_threshold: default_pdt_equity_threshold(),
            pdt_protection: default_pdt_protection(),
        }
    }
}

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseStatus {
    DryRun,
    Closed,
    Skipped,
    Failed,
}

impl CloseStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DryRun => "dry_run",
            Self::Closed => "closed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
        }
    }
}

/// Outcome for one recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseResult {
    pub symbol: String,
    pub priority: ClosePriority,
    pub requested_qty: Decimal,
    pub executed_qty: Decimal,
    pub status: CloseStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

impl CloseResult {
    fn new(rec: &CloseRecommendation, status: CloseStatus, detail: impl Into<String>) -> Self {
        Self {
            symbol: rec.symbol.clone(),
            priority: rec.priority,
            requested_qty: rec.qty,
            executed_qty: Decimal::ZERO,
            status,
            detail: Some(detail.into()),
            order_id: None,
        }
    }
}

/// Everything one run decided and did; serialized as the audit report.
#[derive(Debug, Clone, Serialize)]
pub struct AutoCloseRun {
    pub generated_at: DateTime<Utc>,
    pub dry_run: bool,
    pub equity: Decimal,
    pub position_count: usize,
    pub total_unrealized_pl: Decimal,
    pub recommendations: Vec<CloseRecommendation>,
    pub results: Vec<CloseResult>,
    #[serde(skip)]
    pub report: Option<AuditReportPaths>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub report_error: Option<String>,
}

impl AutoCloseRun {
    pub fn count(&self, status: CloseStatus) -> usize {
        self.results.iter().filter(|r| r.status == status).count()
    }

    /// Any close that was attempted and failed.
    pub fn has_failures(&self) -> bool {
        self.count(CloseStatus::Failed) > 0
    }
}

// ============================================================================
// Engine
// ============================================================================

pub struct AutoCloseEngine {
    broker: DynBroker,
    history: Option<Arc<dyn TradeHistoryStore>>,
    breaker: Arc<CircuitBreaker>,
    retry: RetryPolicy,
    thresholds: RiskThresholds,
    config: AutoCloseConfig,
    reports: AuditReportWriter,
}

impl AutoCloseEngine {
    pub fn new(
        broker: DynBroker,
        breaker: Arc<CircuitBreaker>,
        retry: RetryPolicy,
        thresholds: RiskThresholds,
        config: AutoCloseConfig,
        report_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            broker,
            history: None,
            breaker,
            retry,
            thresholds,
            config,
            reports: AuditReportWriter::new(report_dir),
        }
    }

    /// Trade history used for PDT trimming.
    pub fn with_history(mut self, history: Arc<dyn TradeHistoryStore>) -> Self {
        self.history = Some(history);
        self
    }

    pub fn thresholds(&self) -> &RiskThresholds {
        &self.thresholds
    }

    pub fn recommend(&self, snapshot: &AccountSnapshot) -> Vec<CloseRecommendation> {
        recommend_closures(&snapshot.positions, snapshot.equity, &self.thresholds)
    }

    /// Positions and equity, read through the broker breaker.
    pub async fn fetch_snapshot(&self) -> PositionResult<AccountSnapshot> {
        let positions = guarded_call(&self.breaker, &self.retry, || self.broker.get_positions())
            .await
            .map_err(|e| PositionError::Refresh(describe(&e)))?;
        let equity = guarded_call(&self.breaker, &self.retry, || {
            self.broker.get_account_equity()
        })
        .await
        .map_err(|e| PositionError::Refresh(describe(&e)))?;
        Ok(AccountSnapshot::new(equity, positions))
    }

    /// Execute `recs`. With `dry_run` no broker call is made.
    pub async fn execute_closures(
        &self,
        recs: &[CloseRecommendation],
        dry_run: bool,
    ) -> Vec<CloseResult> {
        let mut seen = HashSet::new();
        let recs: Vec<&CloseRecommendation> =
            recs.iter().filter(|r| seen.insert(r.symbol.clone())).collect();

        if dry_run {
            return recs
                .into_iter()
                .map(|rec| {
                    info!(symbol = %rec.symbol, qty = %rec.qty, priority = %rec.priority, "Dry run: would close");
                    CloseResult::new(rec, CloseStatus::DryRun, format!("would close {}", rec.qty))
                })
                .collect();
        }

        // One refresh for the whole batch; without it nothing is closed blind.
        let live = match self.fetch_snapshot().await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                error!(?e, "Cannot refresh positions, no closes attempted");
                return recs
                    .into_iter()
                    .map(|rec| CloseResult::new(rec, CloseStatus::Failed, e.to_string()))
                    .collect();
            }
        };

        let pdt_applies =
            self.config.pdt_protection && live.equity < self.config.pdt_equity_threshold;
        let today = Utc::now().date_naive();

        let mut results = Vec::with_capacity(recs.len());
        for rec in recs {
            results.push(self.close_one(rec, &live, pdt_applies, today).await);
        }
        results
    }

    async fn close_one(
        &self,
        rec: &CloseRecommendation,
        live: &AccountSnapshot,
        pdt_applies: bool,
        today: chrono::NaiveDate,
    ) -> CloseResult {
        let Some(position) = live.open_positions().find(|p| p.symbol == rec.symbol) else {
            debug!(symbol = %rec.symbol, "Already flat, skipping");
            return CloseResult::new(rec, CloseStatus::Skipped, "already flat");
        };

        let mut qty = rec.qty.min(position.qty.abs());
        if pdt_applies {
            if let Some(history) = &self.history {
                let fills = match history.fills_for(&rec.symbol) {
                    Ok(fills) => fills,
                    Err(e) => {
                        warn!(symbol = %rec.symbol, ?e, "Trade history unavailable, not closing");
                        return CloseResult::new(
                            rec,
                            CloseStatus::Skipped,
                            format!("trade history unavailable for PDT check: {e}"),
                        );
                    }
                };
                let same_day = same_day_opened_qty(&fills, position.opening_side(), today);
                let safe = pdt_safe_qty(position.qty, qty, same_day);
                if safe < qty {
                    info!(
                        symbol = %rec.symbol,
                        requested = %qty,
                        same_day = %same_day,
                        safe = %safe,
                        "PDT trim applied"
                    );
                }
                qty = safe;
            }
        }
        if qty <= Decimal::ZERO {
            return CloseResult::new(
                rec,
                CloseStatus::Skipped,
                "entire position opened today (PDT protection)",
            );
        }

        let outcome = self.close_reconciled(&rec.symbol, position.qty.abs(), qty).await;

        match outcome {
            Ok(CloseAttempt { ack, prefilled }) => {
                let prefilled = prefilled.min(qty);
                let executed = prefilled + ack.as_ref().map_or(Decimal::ZERO, |a| a.qty);
                info!(
                    symbol = %rec.symbol,
                    qty = %executed,
                    prefilled = %prefilled,
                    order_id = ?ack.as_ref().map(|a| &a.order_id),
                    priority = %rec.priority,
                    "Position closed"
                );
                let detail = if prefilled > Decimal::ZERO {
                    Some(format!(
                        "{prefilled} filled by an unacknowledged attempt, {executed} of {}",
                        rec.qty
                    ))
                } else {
                    (executed < rec.qty).then(|| format!("partial: {executed} of {}", rec.qty))
                };
                CloseResult {
                    symbol: rec.symbol.clone(),
                    priority: rec.priority,
                    requested_qty: rec.qty,
                    executed_qty: executed,
                    status: CloseStatus::Closed,
                    detail,
                    order_id: ack.map(|a| a.order_id),
                }
            }
            Err(BreakerError::Inner(e)) if matches!(e.inner(), BrokerError::NotFound(_)) => {
                CloseResult::new(rec, CloseStatus::Skipped, "already flat at broker")
            }
            Err(e) => {
                warn!(symbol = %rec.symbol, error = %e, "Close failed, continuing with the rest");
                CloseResult::new(rec, CloseStatus::Failed, describe(&e))
            }
        }
    }

    /// Close `qty` of `symbol` under breaker and retry.
    ///
    /// A failed attempt may still have filled. Before every retry the live
    /// quantity is re-read and only what is still missing from `qty` is
    /// sent, so retries never close more than `qty` in total.
    async fn close_reconciled(
        &self,
        symbol: &str,
        start: Decimal,
        qty: Decimal,
    ) -> Result<CloseAttempt, GuardedError<BrokerError>> {
        let broker = &self.broker;
        let mut attempt = 0u32;
        guarded_call(&self.breaker, &self.retry, || {
            attempt += 1;
            let reconcile = attempt > 1;
            let symbol = symbol.to_string();
            async move {
                let mut prefilled = Decimal::ZERO;
                if reconcile {
                    let live = broker
                        .get_positions()
                        .await?
                        .into_iter()
                        .find(|p| p.symbol == symbol && !p.is_flat())
                        .map_or(Decimal::ZERO, |p| p.qty.abs());
                    prefilled = (start - live).max(Decimal::ZERO);
                    if prefilled > Decimal::ZERO {
                        warn!(symbol = %symbol, prefilled = %prefilled, "Earlier close attempt filled without acknowledgement");
                    }
                }
                let rest = qty - prefilled;
                if rest <= Decimal::ZERO {
                    return Ok(CloseAttempt { ack: None, prefilled });
                }
                let ack = broker.close_position(symbol, rest).await?;
                Ok::<_, BrokerError>(CloseAttempt {
                    ack: Some(ack),
                    prefilled,
                })
            }
        })
        .await
    }

    /// Recommend from `snapshot`, execute, and write the audit report.
    pub async fn run(&self, snapshot: &AccountSnapshot, dry_run: bool) -> AutoCloseRun {
        let recommendations = self.recommend(snapshot);
        info!(
            recommendations = recommendations.len(),
            dry_run,
            "Auto-close run"
        );
        let results = self.execute_closures(&recommendations, dry_run).await;

        let mut run = AutoCloseRun {
            generated_at: Utc::now(),
            dry_run,
            equity: snapshot.equity,
            position_count: snapshot.open_positions().count(),
            total_unrealized_pl: snapshot.total_unrealized_pl(),
            recommendations,
            results,
            report: None,
            report_error: None,
        };

        let markdown = render_markdown(&run);
        match self
            .reports
            .write("auto_close", run.generated_at, &run, &markdown)
        {
            Ok(paths) => run.report = Some(paths),
            Err(e) => {
                error!(?e, "Failed to write auto-close audit report");
                run.report_error = Some(e.to_string());
            }
        }
        run
    }
}

fn describe(err: &GuardedError<BrokerError>) -> String {
    match err {
        BreakerError::Open { .. } => format!("skipped, {err}"),
        BreakerError::Inner(inner) => inner.to_string(),
    }
}

fn render_markdown(run: &AutoCloseRun) -> String {
    let mut md = String::new();
    let _ = writeln!(md, "# Auto-close report");
    let _ = writeln!(md);
    let _ = writeln!(md, "- Generated: {}", run.generated_at.to_rfc3339());
    let _ = writeln!(
        md,
        "- Mode: {}",
        if run.dry_run { "dry run" } else { "execute" }
    );
    let _ = writeln!(md, "- Equity: {}", run.equity);
    let _ = writeln!(md, "- Open positions: {}", run.position_count);
    let _ = writeln!(md, "- Unrealized P/L: {}", run.total_unrealized_pl);
    let _ = writeln!(md);

    let _ = writeln!(md, "## Recommendations");
    let _ = writeln!(md);
    if run.recommendations.is_empty() {
        let _ = writeln!(md, "None.");
    } else {
        let _ = writeln!(md, "| Priority | Symbol | Qty | Side | Unrealized P/L | Cost basis | Reason |");
        let _ = writeln!(md, "|---|---|---|---|---|---|---|");
        for r in &run.recommendations {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} | {} | {} |",
                r.priority, r.symbol, r.qty, r.side, r.unrealized_pl, r.cost_basis, r.reason
            );
        }
    }
    let _ = writeln!(md);

    let _ = writeln!(md, "## Results");
    let _ = writeln!(md);
    if run.results.is_empty() {
        let _ = writeln!(md, "None.");
    } else {
        let _ = writeln!(md, "| Symbol | Status | Requested | Executed | Detail |");
        let _ = writeln!(md, "|---|---|---|---|---|");
        for r in &run.results {
            let _ = writeln!(
                md,
                "| {} | {} | {} | {} | {} |",
                r.symbol,
                r.status.as_str(),
                r.requested_qty,
                r.executed_qty,
                r.detail.as_deref().unwrap_or("")
            );
        }
    }
    md
}

#[cfg(test)]
mod tests {
    use super::*;
    use optguard_core::{BrokerAdapter, Fill, MockBroker, OrderSide, Position};
    use optguard_resilience::{BreakerConfig, BreakerState, RetryConfig};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn fast_retry() -> RetryPolicy {
        RetryPolicy::new(RetryConfig {
            max_attempts: 2,
            base_delay_ms: 1,
            max_delay_ms: 1,
            backoff_base: 1.0,
            jitter: false,
        })
    }

    fn crisis_snapshot(equity: Decimal) -> AccountSnapshot {
        AccountSnapshot::new(
            equity,
            vec![
                Position::new("SPY", dec!(4), dec!(-700), dec!(1000)),
                Position::new("QQQ", dec!(2), dec!(-600), dec!(1000)),
                Position::new("IWM", dec!(1), dec!(50), dec!(1000)),
            ],
        )
    }

    fn engine(broker: Arc<MockBroker>, dir: &TempDir) -> AutoCloseEngine {
        AutoCloseEngine::new(
            broker,
            Arc::new(CircuitBreaker::new(BROKER_BREAKER, BreakerConfig::default())),
            fast_retry(),
            RiskThresholds::default(),
            AutoCloseConfig::default(),
            dir.path().join("reports"),
        )
    }

    #[tokio::test]
    async fn test_dry_run_makes_no_broker_calls_and_writes_report() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        let engine = engine(broker.clone(), &dir);

        let run = engine.run(&snapshot, true).await;
        assert_eq!(run.recommendations.len(), 2);
        assert_eq!(run.count(CloseStatus::DryRun), 2);
        assert_eq!(broker.call_count(), 0);

        let paths = run.report.unwrap();
        assert!(paths.json.exists());
        let md = std::fs::read_to_string(&paths.markdown).unwrap();
        assert!(md.contains("| CRITICAL | SPY |"));
    }

    #[tokio::test]
    async fn test_execute_closes_critical_positions() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        let engine = engine(broker.clone(), &dir);

        let run = engine.run(&snapshot, false).await;
        assert_eq!(run.count(CloseStatus::Closed), 2);
        assert_eq!(
            broker.closes(),
            vec![("SPY".to_string(), dec!(4)), ("QQQ".to_string(), dec!(2))]
        );
        assert!(!run.has_failures());
    }

    #[tokio::test]
    async fn test_one_failure_does_not_block_the_rest() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        broker.fail_close("SPY", 10, BrokerError::Transient("gateway timeout".to_string()));
        let engine = engine(broker.clone(), &dir);

        let run = engine.run(&snapshot, false).await;
        let spy = run.results.iter().find(|r| r.symbol == "SPY").unwrap();
        let qqq = run.results.iter().find(|r| r.symbol == "QQQ").unwrap();
        assert_eq!(spy.status, CloseStatus::Failed);
        assert_eq!(qqq.status, CloseStatus::Closed);
        assert!(run.has_failures());
        assert!(run.report.is_some());
    }

    #[tokio::test]
    async fn test_open_breaker_fails_fast_without_broker_calls() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        let breaker = Arc::new(CircuitBreaker::new(
            BROKER_BREAKER,
            BreakerConfig {
                failure_threshold: 1,
                ..Default::default()
            },
        ));
        breaker.record_failure();
        assert_eq!(breaker.state(), BreakerState::Open);

        let engine = AutoCloseEngine::new(
            broker.clone(),
            breaker,
            fast_retry(),
            RiskThresholds::default(),
            AutoCloseConfig::default(),
            dir.path(),
        );
        let results = engine.execute_closures(&engine.recommend(&snapshot), false).await;
        assert!(results.iter().all(|r| r.status == CloseStatus::Failed));
        assert_eq!(broker.call_count(), 0);
    }

    #[tokio::test]
    async fn test_already_flat_symbol_is_skipped() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let recs = recommend_closures(&snapshot.positions, snapshot.equity, &RiskThresholds::default());
        // Broker no longer holds SPY.
        let broker = Arc::new(MockBroker::new(AccountSnapshot::new(
            dec!(100000),
            vec![Position::new("QQQ", dec!(2), dec!(-600), dec!(1000))],
        )));
        let engine = engine(broker.clone(), &dir);

        let results = engine.execute_closures(&recs, false).await;
        assert_eq!(results[0].symbol, "SPY");
        assert_eq!(results[0].status, CloseStatus::Skipped);
        assert_eq!(results[1].status, CloseStatus::Closed);
    }

    #[tokio::test]
    async fn test_repeated_execution_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        let engine = engine(broker.clone(), &dir);
        let recs = engine.recommend(&snapshot);

        engine.execute_closures(&recs, false).await;
        let second = engine.execute_closures(&recs, false).await;
        assert!(second.iter().all(|r| r.status == CloseStatus::Skipped));
        assert_eq!(broker.closes().len(), 2);
    }

    #[tokio::test]
    async fn test_pdt_trim_below_threshold() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(10000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        let history: Arc<dyn TradeHistoryStore> = Arc::new(vec![
            Fill {
                symbol: "SPY".to_string(),
                side: OrderSide::Buy,
                filled_qty: dec!(3),
                filled_at: Utc::now(),
            },
            Fill {
                symbol: "QQQ".to_string(),
                side: OrderSide::Buy,
                filled_qty: dec!(2),
                filled_at: Utc::now(),
            },
        ]);
        let engine = engine(broker.clone(), &dir).with_history(history);

        let run = engine.run(&snapshot, false).await;
        let spy = run.results.iter().find(|r| r.symbol == "SPY").unwrap();
        let qqq = run.results.iter().find(|r| r.symbol == "QQQ").unwrap();
        assert_eq!(spy.status, CloseStatus::Closed);
        assert_eq!(spy.executed_qty, dec!(1));
        assert_eq!(qqq.status, CloseStatus::Skipped);
        assert_eq!(broker.closes(), vec![("SPY".to_string(), dec!(1))]);
    }

    #[tokio::test]
    async fn test_lost_ack_retry_never_exceeds_pdt_safe_qty() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(10000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        broker.fill_then_fail_close("SPY", 1, BrokerError::Transient("ack lost".to_string()));
        let history: Arc<dyn TradeHistoryStore> = Arc::new(vec![Fill {
            symbol: "SPY".to_string(),
            side: OrderSide::Buy,
            filled_qty: dec!(3),
            filled_at: Utc::now(),
        }]);
        let engine = engine(broker.clone(), &dir).with_history(history);

        let recs = engine.recommend(&snapshot);
        let results = engine.execute_closures(&recs, false).await;
        let spy = results.iter().find(|r| r.symbol == "SPY").unwrap();
        assert_eq!(spy.status, CloseStatus::Closed);
        assert_eq!(spy.executed_qty, dec!(1));
        assert!(spy.order_id.is_none());

        // Only the PDT-safe single contract ever left the book.
        let spy_closed: Decimal = broker
            .closes()
            .iter()
            .filter(|(s, _)| s == "SPY")
            .map(|(_, q)| *q)
            .sum();
        assert_eq!(spy_closed, dec!(1));
        let live = broker.get_positions().await.unwrap();
        assert_eq!(live.iter().find(|p| p.symbol == "SPY").unwrap().qty, dec!(3));
    }

    #[tokio::test]
    async fn test_retry_after_unfilled_failure_closes_full_qty() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        broker.fail_close("SPY", 1, BrokerError::Transient("gateway timeout".to_string()));
        let engine = engine(broker.clone(), &dir);

        let results = engine.execute_closures(&engine.recommend(&snapshot), false).await;
        let spy = results.iter().find(|r| r.symbol == "SPY").unwrap();
        assert_eq!(spy.status, CloseStatus::Closed);
        assert_eq!(spy.executed_qty, dec!(4));
        assert!(spy.detail.is_none());
        assert_eq!(broker.closes()[0], ("SPY".to_string(), dec!(4)));
    }

    #[tokio::test]
    async fn test_no_pdt_trim_above_threshold() {
        let dir = TempDir::new().unwrap();
        let snapshot = crisis_snapshot(dec!(100000));
        let broker = Arc::new(MockBroker::new(snapshot.clone()));
        let history: Arc<dyn TradeHistoryStore> = Arc::new(vec![Fill {
            symbol: "SPY".to_string(),
            side: OrderSide::Buy,
            filled_qty: dec!(4),
            filled_at: Utc::now(),
        }]);
        let engine = engine(broker.clone(), &dir).with_history(history);

        let run = engine.run(&snapshot, false).await;
        assert_eq!(run.count(CloseStatus::Closed), 2);
    }
}
