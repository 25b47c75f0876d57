//! Close recommendations.
//!
//! A pure function of (positions, equity, thresholds):
//! - CRITICAL: a position's loss ratio strictly exceeds
//!   `single_position_loss_pct`
//! - HIGH: while total loss / equity exceeds `crisis_loss_pct`, the
//!   remaining losers, most negative P/L first, until the breach is covered
//! - MEDIUM: positions beyond `max_positions` that are still open after
//!   the above, worst P/L first
//!
//! Output is sorted CRITICAL, HIGH, MEDIUM; most negative P/L first within
//! a tier.

use std::collections::HashSet;
use std::fmt;

use optguard_core::{OrderSide, Position, RiskThresholds};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Urgency tier. Ordering is urgency: `Critical < High < Medium`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClosePriority {
    Critical,
    High,
    Medium,
}

impl ClosePriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "CRITICAL",
            Self::High => "HIGH",
            Self::Medium => "MEDIUM",
        }
    }
}

impl fmt::Display for ClosePriority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseRecommendation {
    pub symbol: String,
    /// Absolute quantity to close.
    pub qty: Decimal,
    /// Side of the closing order.
    pub side: OrderSide,
    pub reason: String,
    pub priority: ClosePriority,
    pub unrealized_pl: Decimal,
    pub cost_basis: Decimal,
}

impl CloseRecommendation {
    fn for_position(position: &Position, priority: ClosePriority, reason: String) -> Self {
        Self {
            symbol: position.symbol.clone(),
            qty: position.qty.abs(),
            side: position.opening_side().opposite(),
            reason,
            priority,
            unrealized_pl: position.unrealized_pl,
            cost_basis: position.cost_basis,
        }
    }
}

fn pct(ratio: Decimal) -> String {
    format!("{}%", (ratio * Decimal::ONE_HUNDRED).round_dp(2))
}

/// Compute close recommendations.
pub fn recommend_closures(
    positions: &[Position],
    equity: Decimal,
    thresholds: &RiskThresholds,
) -> Vec<CloseRecommendation> {
    let mut open: Vec<&Position> = Vec::new();
    let mut seen = HashSet::new();
    for position in positions.iter().filter(|p| !p.is_flat()) {
        if seen.insert(position.symbol.as_str()) {
            open.push(position);
        }
    }
    // Worst P/L first; every tier walks positions in this order.
    open.sort_by(|a, b| a.unrealized_pl.cmp(&b.unrealized_pl));

    let mut recs: Vec<CloseRecommendation> = Vec::new();
    let mut chosen: HashSet<&str> = HashSet::new();

    for position in &open {
        if let Some(ratio) = position.loss_ratio() {
            if ratio > thresholds.single_position_loss_pct {
                chosen.insert(position.symbol.as_str());
                recs.push(CloseRecommendation::for_position(
                    position,
                    ClosePriority::Critical,
                    format!(
                        "loss {} of cost basis exceeds {}",
                        pct(ratio),
                        pct(thresholds.single_position_loss_pct)
                    ),
                ));
            }
        }
    }

    let total_loss: Decimal = open
        .iter()
        .filter(|p| p.is_losing())
        .map(|p| -p.unrealized_pl)
        .sum();
    let breached = |loss: Decimal| {
        if equity <= Decimal::ZERO {
            loss > Decimal::ZERO
        } else {
            loss / equity > thresholds.crisis_loss_pct
        }
    };
    if breached(total_loss) {
        let mut remaining = total_loss
            - recs
                .iter()
                .map(|r| -r.unrealized_pl)
                .sum::<Decimal>();
        for position in open.iter().filter(|p| p.is_losing()) {
            if !breached(remaining) {
                break;
            }
            if chosen.contains(position.symbol.as_str()) {
                continue;
            }
            chosen.insert(position.symbol.as_str());
            remaining -= -position.unrealized_pl;
            recs.push(CloseRecommendation::for_position(
                position,
                ClosePriority::High,
                if equity > Decimal::ZERO {
                    format!(
                        "portfolio loss {} of equity exceeds {}",
                        pct(total_loss / equity),
                        pct(thresholds.crisis_loss_pct)
                    )
                } else {
                    "portfolio loss with no remaining equity".to_string()
                },
            ));
        }
    }

    let still_open = open.len() - chosen.len();
    if still_open > thresholds.max_positions {
        let surplus = still_open - thresholds.max_positions;
        let extra: Vec<&Position> = open
            .iter()
            .filter(|p| !chosen.contains(p.symbol.as_str()))
            .take(surplus)
            .copied()
            .collect();
        for position in extra {
            chosen.insert(position.symbol.as_str());
            recs.push(CloseRecommendation::for_position(
                position,
                ClosePriority::Medium,
                format!(
                    "{} open positions exceed the limit of {}",
                    open.len(),
                    thresholds.max_positions
                ),
            ));
        }
    }

    recs.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then_with(|| a.unrealized_pl.cmp(&b.unrealized_pl))
    });
    recs
}
