//! Pattern-day-trade safe close quantities.
//!
//! Below the PDT equity threshold, closing contracts opened the same day
//! counts as a day trade. Only the quantity opened on earlier days may be
//! closed.

use chrono::NaiveDate;
use optguard_core::{Fill, OrderSide};
use rust_decimal::Decimal;

/// Quantity opened on `today` in the position's opening direction.
pub fn same_day_opened_qty(fills: &[Fill], opening_side: OrderSide, today: NaiveDate) -> Decimal {
    fills
        .iter()
        .filter(|f| f.side == opening_side && f.filled_on(today))
        .map(|f| f.filled_qty.abs())
        .sum()
}

/// Largest quantity that can be closed without touching today's opens.
///
/// `live_qty` is the absolute live position, `requested` the recommended
/// close quantity.
pub fn pdt_safe_qty(live_qty: Decimal, requested: Decimal, same_day_qty: Decimal) -> Decimal {
    let older = (live_qty.abs() - same_day_qty).max(Decimal::ZERO);
    requested.abs().min(older)
}
