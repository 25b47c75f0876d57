//! Broker-owned position and fill snapshots.
//!
//! These are read-only views handed to the guards. Money fields use
//! `rust_decimal` so ratio thresholds such as "exactly 50%" compare exactly.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::symbol::underlying_symbol;

/// Order side: buy or sell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    /// Returns the opposite side.
    pub fn opposite(&self) -> Self {
        match self {
            Self::Buy => Self::Sell,
            Self::Sell => Self::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Buy => write!(f, "buy"),
            Self::Sell => write!(f, "sell"),
        }
    }
}

/// Open position as reported by the broker.
///
/// `qty` is signed: positive for long, negative for short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub qty: Decimal,
    pub unrealized_pl: Decimal,
    pub cost_basis: Decimal,
}

impl Position {
    pub fn new(
        symbol: impl Into<String>,
        qty: Decimal,
        unrealized_pl: Decimal,
        cost_basis: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            qty,
            unrealized_pl,
            cost_basis,
        }
    }

    /// Underlying ticker (option suffix stripped).
    pub fn underlying(&self) -> &str {
        underlying_symbol(&self.symbol)
    }

    /// Side that opened this position.
    pub fn opening_side(&self) -> OrderSide {
        if self.qty.is_sign_negative() {
            OrderSide::Sell
        } else {
            OrderSide::Buy
        }
    }

    pub fn is_flat(&self) -> bool {
        self.qty.is_zero()
    }

    pub fn is_losing(&self) -> bool {
        self.unrealized_pl < Decimal::ZERO
    }

    /// Loss as a fraction of cost basis; `None` for winners or zero basis.
    pub fn loss_ratio(&self) -> Option<Decimal> {
        let basis = self.cost_basis.abs();
        if !self.is_losing() || basis.is_zero() {
            return None;
        }
        Some(-self.unrealized_pl / basis)
    }

    /// |P/L| as a fraction of cost basis; `None` for zero basis.
    pub fn pnl_ratio_abs(&self) -> Option<Decimal> {
        let basis = self.cost_basis.abs();
        if basis.is_zero() {
            return None;
        }
        Some(self.unrealized_pl.abs() / basis)
    }
}

/// Position/equity snapshot taken at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub equity: Decimal,
    #[serde(default)]
    pub positions: Vec<Position>,
}

impl AccountSnapshot {
    pub fn new(equity: Decimal, positions: Vec<Position>) -> Self {
        Self { equity, positions }
    }

    /// Open (non-flat) positions.
    pub fn open_positions(&self) -> impl Iterator<Item = &Position> {
        self.positions.iter().filter(|p| !p.is_flat())
    }

    /// Sum of losses across losing positions, as a positive number.
    pub fn total_unrealized_loss(&self) -> Decimal {
        self.open_positions()
            .filter(|p| p.is_losing())
            .map(|p| -p.unrealized_pl)
            .sum()
    }

    /// Net unrealized P/L across all positions.
    pub fn total_unrealized_pl(&self) -> Decimal {
        self.open_positions().map(|p| p.unrealized_pl).sum()
    }
}

/// Executed fill from the trade history store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fill {
    pub symbol: String,
    pub side: OrderSide,
    pub filled_qty: Decimal,
    pub filled_at: DateTime<Utc>,
}

impl Fill {
    pub fn filled_on(&self, date: NaiveDate) -> bool {
        self.filled_at.date_naive() == date
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_loss_ratio_only_for_losers() {
        let loser = Position::new("SPY", dec!(1), dec!(-600), dec!(1000));
        let winner = Position::new("SPY", dec!(1), dec!(600), dec!(1000));
        assert_eq!(loser.loss_ratio(), Some(dec!(0.6)));
        assert_eq!(winner.loss_ratio(), None);
        assert_eq!(winner.pnl_ratio_abs(), Some(dec!(0.6)));
    }

    #[test]
    fn test_zero_cost_basis_has_no_ratio() {
        let p = Position::new("SPY", dec!(1), dec!(-10), dec!(0));
        assert_eq!(p.loss_ratio(), None);
        assert_eq!(p.pnl_ratio_abs(), None);
    }

    #[test]
    fn test_short_position_uses_abs_basis() {
        let p = Position::new("SPY240119P00450000", dec!(-2), dec!(-300), dec!(-500));
        assert_eq!(p.opening_side(), OrderSide::Sell);
        assert_eq!(p.loss_ratio(), Some(dec!(0.6)));
        assert_eq!(p.underlying(), "SPY");
    }

    #[test]
    fn test_snapshot_totals_ignore_flat_positions() {
        let snapshot = AccountSnapshot::new(
            dec!(10000),
            vec![
                Position::new("A", dec!(1), dec!(-100), dec!(500)),
                Position::new("B", dec!(1), dec!(50), dec!(500)),
                Position::new("C", dec!(0), dec!(-999), dec!(500)),
            ],
        );
        assert_eq!(snapshot.total_unrealized_loss(), dec!(100));
        assert_eq!(snapshot.total_unrealized_pl(), dec!(-50));
        assert_eq!(snapshot.open_positions().count(), 2);
    }
}
