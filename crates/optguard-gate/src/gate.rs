//! Threshold evaluation and the override path.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::summary::MetricSummary;
use crate::thresholds::GateThresholds;

/// Environment variable carrying an emergency override reason.
pub const OVERRIDE_ENV: &str = "PROMOTION_GATE_OVERRIDE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricSource {
    Live,
    Backtest,
}

impl fmt::Display for MetricSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Live => f.write_str("live"),
            Self::Backtest => f.write_str("backtest"),
        }
    }
}

/// One threshold the metrics failed to meet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateDeficit {
    pub source: MetricSource,
    pub metric: String,
    /// `None` when the metric was not reported.
    pub actual: Option<f64>,
    pub required: f64,
    /// `>=` for floors, `<=` for ceilings.
    pub comparison: String,
}

impl fmt::Display for GateDeficit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.actual {
            Some(actual) => write!(
                f,
                "{} {}: {:.4} (required {} {:.4})",
                self.source, self.metric, actual, self.comparison, self.required
            ),
            None => write!(
                f,
                "{} {}: missing (required {} {:.4})",
                self.source, self.metric, self.comparison, self.required
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateDecision {
    pub passed: bool,
    pub deficits: Vec<GateDeficit>,
    /// Operator reason when deficits were bypassed.
    pub overridden: Option<String>,
    pub evaluated_at: DateTime<Utc>,
}

impl GateDecision {
    /// Plain-text summary for the CLI.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        let verdict = match (self.passed, &self.overridden) {
            (true, Some(_)) => "PASS (OVERRIDDEN)",
            (true, None) => "PASS",
            (false, _) => "FAIL",
        };
        out.push_str(&format!("Promotion gate: {verdict}\n"));
        if self.deficits.is_empty() {
            out.push_str("All thresholds met.\n");
        } else {
            out.push_str(&format!("Deficits ({}):\n", self.deficits.len()));
            for deficit in &self.deficits {
                out.push_str(&format!("  - {deficit}\n"));
            }
        }
        if let Some(reason) = &self.overridden {
            out.push_str(&format!("Override reason: {reason}\n"));
        }
        out
    }
}

fn floor(
    deficits: &mut Vec<GateDeficit>,
    source: MetricSource,
    metric: &str,
    actual: Option<f64>,
    required: f64,
) {
    if !matches!(actual, Some(v) if v >= required) {
        deficits.push(GateDeficit {
            source,
            metric: metric.to_string(),
            actual,
            required,
            comparison: ">=".to_string(),
        });
    }
}

fn ceiling(
    deficits: &mut Vec<GateDeficit>,
    source: MetricSource,
    metric: &str,
    actual: Option<f64>,
    required: f64,
) {
    if !matches!(actual, Some(v) if v <= required) {
        deficits.push(GateDeficit {
            source,
            metric: metric.to_string(),
            actual,
            required,
            comparison: "<=".to_string(),
        });
    }
}

/// Every unmet threshold. Missing metrics count as unmet.
pub fn evaluate_gate(
    live: &MetricSummary,
    backtest: &MetricSummary,
    thresholds: &GateThresholds,
) -> Vec<GateDeficit> {
    use MetricSource::{Backtest, Live};

    let mut deficits = Vec::new();
    floor(&mut deficits, Live, "win_rate", live.win_rate, thresholds.min_win_rate);
    floor(&mut deficits, Live, "sharpe", live.sharpe, thresholds.min_sharpe);
    ceiling(&mut deficits, Live, "max_drawdown", live.max_drawdown, thresholds.max_drawdown);
    floor(
        &mut deficits,
        Live,
        "profitable_days_streak",
        live.profitable_days,
        f64::from(thresholds.min_profitable_days),
    );
    floor(
        &mut deficits,
        Live,
        "total_trades",
        live.total_trades,
        f64::from(thresholds.min_trades),
    );
    floor(
        &mut deficits,
        Backtest,
        "sharpe",
        backtest.sharpe,
        thresholds.min_backtest_sharpe,
    );
    ceiling(
        &mut deficits,
        Backtest,
        "max_drawdown",
        backtest.max_drawdown,
        thresholds.max_backtest_drawdown,
    );
    deficits
}

/// Promotion gate with configured thresholds.
#[derive(Debug, Clone, Default)]
pub struct PromotionGate {
    thresholds: GateThresholds,
}

impl PromotionGate {
    pub fn new(thresholds: GateThresholds) -> Self {
        Self { thresholds }
    }

    pub fn thresholds(&self) -> &GateThresholds {
        &self.thresholds
    }

    /// Evaluate without any override.
    pub fn evaluate(&self, live: &MetricSummary, backtest: &MetricSummary) -> GateDecision {
        self.evaluate_with_override(live, backtest, None)
    }

    /// Evaluate, letting a non-empty `override_reason` bypass deficits.
    pub fn evaluate_with_override(
        &self,
        live: &MetricSummary,
        backtest: &MetricSummary,
        override_reason: Option<&str>,
    ) -> GateDecision {
        let deficits = evaluate_gate(live, backtest, &self.thresholds);
        let reason = override_reason
            .map(str::trim)
            .filter(|r| !r.is_empty())
            .map(str::to_string);

        let (passed, overridden) = match (deficits.is_empty(), reason) {
            (true, _) => (true, None),
            (false, Some(reason)) => {
                warn!(
                    deficits = deficits.len(),
                    %reason,
                    "Promotion gate OVERRIDDEN, deficits bypassed"
                );
                (true, Some(reason))
            }
            (false, None) => (false, None),
        };

        info!(passed, deficits = deficits.len(), "Promotion gate evaluated");
        GateDecision {
            passed,
            deficits,
            overridden,
            evaluated_at: Utc::now(),
        }
    }

    /// Evaluate with the override taken from `PROMOTION_GATE_OVERRIDE`.
    pub fn evaluate_from_env(&self, live: &MetricSummary, backtest: &MetricSummary) -> GateDecision {
        let reason = std::env::var(OVERRIDE_ENV).ok();
        self.evaluate_with_override(live, backtest, reason.as_deref())
    }
}
