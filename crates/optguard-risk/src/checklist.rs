//! Pre-trade checklist.
//!
//! Every proposal is run through all checks; nothing short-circuits, so the
//! caller always sees the complete list of violations. Must be evaluated
//! while holding the trade lock.
//!
//! # Checks
//! - Ticker: underlying on the allow-list
//! - Size: max loss within `max_risk_pct` of equity
//! - Spread: defined-risk (two or more legs, nothing naked)
//! - Blackout: not inside a per-ticker earnings window
//! - Dte: days to expiration within `[min_dte, max_dte]`
//! - StopLoss: exit plan defined before entry

use std::fmt;

use chrono::NaiveDate;
use optguard_core::TradeProposal;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Earnings blackout for one ticker, both ends inclusive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EarningsBlackout {
    pub ticker: String,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl EarningsBlackout {
    pub fn contains(&self, ticker: &str, date: NaiveDate) -> bool {
        self.ticker.eq_ignore_ascii_case(ticker) && date >= self.start && date <= self.end
    }
}

/// Checklist policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChecklistConfig {
    #[serde(default = "default_allowed_tickers")]
    pub allowed_tickers: Vec<String>,
    /// Max loss per position as a fraction of equity. Default: 0.05.
    #[serde(default = "default_max_risk_pct")]
    pub max_risk_pct: Decimal,
    #[serde(default = "default_min_dte")]
    pub min_dte: i64,
    #[serde(default = "default_max_dte")]
    pub max_dte: i64,
    #[serde(default)]
    pub earnings_blackouts: Vec<EarningsBlackout>,
}

fn default_allowed_tickers() -> Vec<String> {
    vec!["SPY".to_string(), "QQQ".to_string(), "IWM".to_string()]
}

fn default_max_risk_pct() -> Decimal {
    Decimal::new(5, 2) // 0.05
}

fn default_min_dte() -> i64 {
    30
}

fn default_max_dte() -> i64 {
    60
}

impl Default for ChecklistConfig {
    fn default() -> Self {
        Self {
            allowed_tickers: default_allowed_tickers(),
            max_risk_pct: default_max_risk_pct(),
            min_dte: default_min_dte(),
            max_dte: default_max_dte(),
            earnings_blackouts: Vec::new(),
        }
    }
}

/// Which check produced a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Ticker,
    Size,
    Spread,
    Blackout,
    Dte,
    StopLoss,
}

impl CheckKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ticker => "ticker",
            Self::Size => "size",
            Self::Spread => "spread",
            Self::Blackout => "blackout",
            Self::Dte => "dte",
            Self::StopLoss => "stop_loss",
        }
    }
}

impl fmt::Display for CheckKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A failed check. Business-normal data, not an error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    pub check: CheckKind,
    pub message: String,
}

impl Violation {
    fn new(check: CheckKind, message: impl Into<String>) -> Self {
        Self {
            check,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl ChecklistResult {
    pub fn has(&self, check: CheckKind) -> bool {
        self.violations.iter().any(|v| v.check == check)
    }
}

/// Stateless validator over `ChecklistConfig`.
#[derive(Debug, Clone, Default)]
pub struct PreTradeChecklist {
    config: ChecklistConfig,
}

impl PreTradeChecklist {
    pub fn new(config: ChecklistConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ChecklistConfig {
        &self.config
    }

    /// Run every check. `passed` iff no violations.
    pub fn evaluate(&self, proposal: &TradeProposal) -> ChecklistResult {
        let violations: Vec<Violation> = [
            self.check_ticker(proposal),
            self.check_size(proposal),
            self.check_spread(proposal),
            self.check_blackout(proposal),
            self.check_dte(proposal),
            self.check_stop_loss(proposal),
        ]
        .into_iter()
        .flatten()
        .collect();

        let passed = violations.is_empty();
        if passed {
            debug!(symbol = %proposal.symbol, "Checklist passed");
        } else {
            warn!(
                symbol = %proposal.symbol,
                violations = violations.len(),
                checks = ?violations.iter().map(|v| v.check.as_str()).collect::<Vec<_>>(),
                "Checklist failed"
            );
        }

        ChecklistResult { passed, violations }
    }

    fn check_ticker(&self, proposal: &TradeProposal) -> Option<Violation> {
        let underlying = proposal.underlying();
        let allowed = self
            .config
            .allowed_tickers
            .iter()
            .any(|t| t.eq_ignore_ascii_case(underlying));
        (!allowed).then(|| {
            Violation::new(
                CheckKind::Ticker,
                format!(
                    "{underlying} is not on the allow-list ({})",
                    self.config.allowed_tickers.join(", ")
                ),
            )
        })
    }

    fn check_size(&self, proposal: &TradeProposal) -> Option<Violation> {
        if proposal.account_equity <= Decimal::ZERO {
            return Some(Violation::new(
                CheckKind::Size,
                format!("account equity {} is not positive", proposal.account_equity),
            ));
        }
        let limit = proposal.account_equity * self.config.max_risk_pct;
        (proposal.max_loss > limit).then(|| {
            Violation::new(
                CheckKind::Size,
                format!(
                    "max loss {} exceeds {} ({} of equity {})",
                    proposal.max_loss,
                    limit.round_dp(2),
                    self.config.max_risk_pct,
                    proposal.account_equity
                ),
            )
        })
    }

    fn check_spread(&self, proposal: &TradeProposal) -> Option<Violation> {
        if proposal.is_naked {
            return Some(Violation::new(
                CheckKind::Spread,
                "naked position: loss is not defined",
            ));
        }
        (proposal.legs < 2).then(|| {
            Violation::new(
                CheckKind::Spread,
                format!("{} leg(s): a defined-risk spread needs at least 2", proposal.legs),
            )
        })
    }

    fn check_blackout(&self, proposal: &TradeProposal) -> Option<Violation> {
        let underlying = proposal.underlying();
        self.config
            .earnings_blackouts
            .iter()
            .find(|b| b.contains(underlying, proposal.trade_date))
            .map(|b| {
                Violation::new(
                    CheckKind::Blackout,
                    format!(
                        "{underlying} is in its earnings blackout ({} to {})",
                        b.start, b.end
                    ),
                )
            })
    }

    fn check_dte(&self, proposal: &TradeProposal) -> Option<Violation> {
        let (min, max) = (self.config.min_dte, self.config.max_dte);
        match proposal.dte() {
            None => Some(Violation::new(
                CheckKind::Dte,
                "expiration unknown: days to expiration cannot be checked",
            )),
            Some(dte) if dte < min || dte > max => Some(Violation::new(
                CheckKind::Dte,
                format!("{dte} DTE outside [{min}, {max}]"),
            )),
            Some(_) => None,
        }
    }

    fn check_stop_loss(&self, proposal: &TradeProposal) -> Option<Violation> {
        match proposal.stop_loss {
            Some(stop) if stop > Decimal::ZERO => None,
            Some(stop) => Some(Violation::new(
                CheckKind::StopLoss,
                format!("stop-loss {stop} must be positive"),
            )),
            None => Some(Violation::new(
                CheckKind::StopLoss,
                "no stop-loss defined before entry",
            )),
        }
    }
}
