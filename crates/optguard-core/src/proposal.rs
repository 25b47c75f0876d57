//! Trade proposals and the orders they turn into.

use chrono::{NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::position::OrderSide;
use crate::symbol::{underlying_symbol, OptionSymbol};

/// A strategy's request to open a position, evaluated by the pre-trade
/// checklist before anything reaches the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    /// Ticker or OCC option symbol (first leg for spreads).
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    /// Worst-case loss of the whole position in account currency.
    pub max_loss: Decimal,
    /// Account equity at proposal time.
    pub account_equity: Decimal,
    /// Number of option legs. A defined-risk spread has at least two.
    #[serde(default = "default_legs")]
    pub legs: u8,
    /// True when any leg is sold without a protecting long leg.
    #[serde(default)]
    pub is_naked: bool,
    /// Expiration date; derived from an OCC symbol when absent.
    #[serde(default)]
    pub expiration: Option<NaiveDate>,
    /// Date the trade would be entered; DTE is measured from here.
    #[serde(default = "today")]
    pub trade_date: NaiveDate,
    #[serde(default)]
    pub stop_loss: Option<Decimal>,
    #[serde(default)]
    pub take_profit: Option<Decimal>,
    #[serde(default)]
    pub limit_price: Option<Decimal>,
}

fn default_legs() -> u8 {
    1
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}

impl TradeProposal {
    /// Minimal proposal entered today; fill the rest with struct update syntax.
    pub fn new(
        symbol: impl Into<String>,
        side: OrderSide,
        qty: Decimal,
        max_loss: Decimal,
        account_equity: Decimal,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            side,
            qty,
            max_loss,
            account_equity,
            legs: default_legs(),
            is_naked: false,
            expiration: None,
            trade_date: today(),
            stop_loss: None,
            take_profit: None,
            limit_price: None,
        }
    }

    pub fn underlying(&self) -> &str {
        underlying_symbol(&self.symbol)
    }

    /// Expiration from the explicit field, else from the OCC symbol.
    pub fn resolved_expiration(&self) -> Option<NaiveDate> {
        self.expiration
            .or_else(|| OptionSymbol::parse(&self.symbol).ok().map(|s| s.expiration))
    }

    /// Days to expiration relative to `trade_date`.
    pub fn dte(&self) -> Option<i64> {
        self.resolved_expiration()
            .map(|exp| (exp - self.trade_date).num_days())
    }

    pub fn to_order(&self) -> OrderRequest {
        OrderRequest {
            client_order_id: Uuid::new_v4().to_string(),
            symbol: self.symbol.clone(),
            side: self.side,
            qty: self.qty,
            limit_price: self.limit_price,
        }
    }
}

/// Order handed to the broker adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub client_order_id: String,
    pub symbol: String,
    pub side: OrderSide,
    pub qty: Decimal,
    pub limit_price: Option<Decimal>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[test]
    fn test_dte_from_explicit_expiration() {
        let mut p = TradeProposal::new("SPY", OrderSide::Buy, dec!(1), dec!(100), dec!(10000));
        p.expiration = Some(p.trade_date + Duration::days(35));
        assert_eq!(p.dte(), Some(35));
    }

    #[test]
    fn test_dte_from_occ_symbol() {
        let mut p = TradeProposal::new(
            "SPY240119C00450000",
            OrderSide::Buy,
            dec!(1),
            dec!(100),
            dec!(10000),
        );
        p.trade_date = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
        assert_eq!(p.dte(), Some(18));
        assert_eq!(p.underlying(), "SPY");
    }

    #[test]
    fn test_missing_expiration_has_no_dte() {
        let p = TradeProposal::new("AAPL", OrderSide::Buy, dec!(1), dec!(100), dec!(10000));
        assert_eq!(p.dte(), None);
    }

    #[test]
    fn test_to_order_copies_fields() {
        let p = TradeProposal::new("SPY", OrderSide::Sell, dec!(3), dec!(100), dec!(10000));
        let order = p.to_order();
        assert_eq!(order.symbol, "SPY");
        assert_eq!(order.side, OrderSide::Sell);
        assert_eq!(order.qty, dec!(3));
        assert!(!order.client_order_id.is_empty());
    }
}
