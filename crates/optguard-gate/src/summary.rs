//! Metric summaries loaded from live/paper and backtest JSON reports.
//!
//! Producers disagree on key names and on whether rates are fractions or
//! percentages. Both are resolved here, once, so the gate only ever sees
//! fractions. The scale is decided per payload, never per value, so a
//! producer's numbers keep their order after normalization.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{GateError, GateResult};

const WIN_RATE_KEYS: &[&str] = &["win_rate", "winRate"];
const SHARPE_KEYS: &[&str] = &["sharpe", "sharpe_ratio", "sharpeRatio"];
const DRAWDOWN_KEYS: &[&str] = &["max_drawdown", "max_drawdown_pct", "maxDrawdown"];
const PROFITABLE_DAYS_KEYS: &[&str] = &[
    "profitable_days_streak",
    "consecutive_profitable_days",
    "profitableDaysStreak",
];
const TRADES_KEYS: &[&str] = &["total_trades", "trade_count", "totalTrades"];

/// A rate as the producer wrote it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RawRate {
    pub value: f64,
    /// Key ends in `_pct` or the string carried a trailing `%`.
    pub marked_percent: bool,
}

impl RawRate {
    pub fn fraction(value: f64) -> Self {
        Self {
            value,
            marked_percent: false,
        }
    }
}

/// Scale a producer used for all of its rate metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RateScale {
    Fraction,
    Percent,
}

impl RateScale {
    /// Percent if any rate is marked as one or has magnitude above 1,
    /// otherwise fractions.
    pub fn detect<'a>(rates: impl IntoIterator<Item = &'a RawRate>) -> Self {
        let percent = rates
            .into_iter()
            .any(|r| r.marked_percent || r.value.abs() > 1.0);
        if percent {
            Self::Percent
        } else {
            Self::Fraction
        }
    }

    /// Map `value` onto the 0..1 scale.
    pub fn to_fraction(self, value: f64) -> f64 {
        match self {
            Self::Fraction => value,
            Self::Percent => value / 100.0,
        }
    }
}

/// Normalized metrics. `None` means the producer did not report it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricSummary {
    pub win_rate: Option<f64>,
    pub sharpe: Option<f64>,
    /// Positive fraction, whatever sign the producer used.
    pub max_drawdown: Option<f64>,
    pub profitable_days: Option<f64>,
    pub total_trades: Option<f64>,
}

impl MetricSummary {
    /// Build from a JSON object, resolving key aliases and scales.
    pub fn from_value(value: &Value) -> GateResult<Self> {
        let obj = value.as_object().ok_or(GateError::NotAnObject)?;
        let win_rate = lookup_rate(obj, WIN_RATE_KEYS);
        let max_drawdown = lookup_rate(obj, DRAWDOWN_KEYS);
        let scale = RateScale::detect(win_rate.iter().chain(max_drawdown.iter()));

        Ok(Self {
            win_rate: win_rate.map(|r| scale.to_fraction(r.value)),
            sharpe: lookup(obj, SHARPE_KEYS),
            max_drawdown: max_drawdown.map(|r| scale.to_fraction(r.value).abs()),
            profitable_days: lookup(obj, PROFITABLE_DAYS_KEYS),
            total_trades: lookup(obj, TRADES_KEYS),
        })
    }

    pub fn from_file(path: &Path) -> GateResult<Self> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| GateError::Read {
            path: display.clone(),
            source,
        })?;
        let value: Value = serde_json::from_str(&text).map_err(|source| GateError::Json {
            path: display,
            source,
        })?;
        Self::from_value(&value)
    }
}

/// First alias holding a finite number or numeric string.
fn lookup(obj: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find_map(as_number)
        .filter(|v| v.is_finite())
}

fn lookup_rate(obj: &Map<String, Value>, keys: &[&str]) -> Option<RawRate> {
    keys.iter()
        .filter_map(|k| obj.get(*k).map(|v| (*k, v)))
        .find_map(|(key, v)| {
            let value = as_number(v).filter(|n| n.is_finite())?;
            let marked_percent = key.ends_with("_pct")
                || matches!(v, Value::String(s) if s.trim().ends_with('%'));
            Some(RawRate {
                value,
                marked_percent,
            })
        })
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().trim_end_matches('%').trim().parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_rate_scale_detection() {
        let fractions = [RawRate::fraction(0.62), RawRate::fraction(-0.12)];
        assert_eq!(RateScale::detect(&fractions), RateScale::Fraction);
        assert_eq!(RateScale::detect(&[RawRate::fraction(1.0)]), RateScale::Fraction);

        // One value above 1 settles the scale for the whole payload.
        let mixed = [RawRate::fraction(0.9), RawRate::fraction(12.0)];
        assert_eq!(RateScale::detect(&mixed), RateScale::Percent);

        let marked = RawRate {
            value: 0.5,
            marked_percent: true,
        };
        assert_eq!(RateScale::detect(&[marked]), RateScale::Percent);
        assert_eq!(RateScale::Percent.to_fraction(62.0), 0.62);
        assert_eq!(RateScale::Fraction.to_fraction(0.62), 0.62);
    }

    #[test]
    fn test_small_percent_stays_percent_with_its_payload() {
        // 0.9% win rate next to a 12% drawdown: both are percentages.
        let summary = MetricSummary::from_value(&json!({
            "win_rate": 0.9,
            "max_drawdown": 12.0
        }))
        .unwrap();
        assert!((summary.win_rate.unwrap() - 0.009).abs() < 1e-12);
        assert_eq!(summary.max_drawdown, Some(0.12));

        let pct_key = MetricSummary::from_value(&json!({ "max_drawdown_pct": 0.8 })).unwrap();
        assert!((pct_key.max_drawdown.unwrap() - 0.008).abs() < 1e-12);
    }

    #[test]
    fn test_aliases_and_scales() {
        let summary = MetricSummary::from_value(&json!({
            "winRate": 61.0,
            "sharpe_ratio": "1.4",
            "max_drawdown_pct": -12.5,
            "consecutive_profitable_days": 4,
            "trade_count": "120"
        }))
        .unwrap();

        assert_eq!(summary.win_rate, Some(0.61));
        assert_eq!(summary.sharpe, Some(1.4));
        assert_eq!(summary.max_drawdown, Some(0.125));
        assert_eq!(summary.profitable_days, Some(4.0));
        assert_eq!(summary.total_trades, Some(120.0));
    }

    #[test]
    fn test_unparseable_values_are_missing() {
        let summary = MetricSummary::from_value(&json!({
            "win_rate": "n/a",
            "sharpe": null,
            "max_drawdown": "15%"
        }))
        .unwrap();

        assert_eq!(summary.win_rate, None);
        assert_eq!(summary.sharpe, None);
        assert_eq!(summary.max_drawdown, Some(0.15));
        assert_eq!(summary.total_trades, None);
    }

    #[test]
    fn test_non_object_rejected() {
        assert!(matches!(
            MetricSummary::from_value(&json!([1, 2])),
            Err(GateError::NotAnObject)
        ));
    }
}
