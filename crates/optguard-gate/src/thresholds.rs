//! Gate thresholds (`[gate]` table or a standalone JSON file).

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{GateError, GateResult};

/// Promotion thresholds. Rates and drawdowns are fractions (0.55 = 55%).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateThresholds {
    /// Live win rate floor. Default: 0.55.
    #[serde(default = "default_min_win_rate")]
    pub min_win_rate: f64,
    /// Live Sharpe floor. Default: 1.0.
    #[serde(default = "default_min_sharpe")]
    pub min_sharpe: f64,
    /// Live max drawdown ceiling. Default: 0.15.
    #[serde(default = "default_max_drawdown")]
    pub max_drawdown: f64,
    /// Consecutive profitable days required. Default: 3.
    #[serde(default = "default_min_profitable_days")]
    pub min_profitable_days: u32,
    /// Live trade count floor. Default: 50.
    #[serde(default = "default_min_trades")]
    pub min_trades: u32,
    /// Backtest Sharpe floor. Default: 0.5.
    #[serde(default = "default_min_backtest_sharpe")]
    pub min_backtest_sharpe: f64,
    /// Backtest max drawdown ceiling. Default: 0.25.
    #[serde(default = "default_max_backtest_drawdown")]
    pub max_backtest_drawdown: f64,
}

fn default_min_win_rate() -> f64 {
    0.55
}

fn default_min_sharpe() -> f64 {
    1.0
}

fn default_max_drawdown() -> f64 {
    0.15
}

fn default_min_profitable_days() -> u32 {
    3
}

fn default_min_trades() -> u32 {
    50
}

fn default_min_backtest_sharpe() -> f64 {
    0.5
}

fn default_max_backtest_drawdown() -> f64 {
    0.25
}

impl Default for GateThresholds {
    fn default() -> Self {
        Self {
            min_win_rate: default_min_win_rate(),
            min_sharpe: default_min_sharpe(),
            max_drawdown: default_max_drawdown(),
            min_profitable_days: default_min_profitable_days(),
            min_trades: default_min_trades(),
            min_backtest_sharpe: default_min_backtest_sharpe(),
            max_backtest_drawdown: default_max_backtest_drawdown(),
        }
    }
}

impl GateThresholds {
    /// Load thresholds from a JSON file. Missing keys keep their defaults.
    pub fn from_file(path: &Path) -> GateResult<Self> {
        let display = path.display().to_string();
        let text = fs::read_to_string(path).map_err(|source| GateError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| GateError::Json {
            path: display,
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("thresholds.json");
        fs::write(&path, r#"{"min_sharpe": 1.5, "min_trades": 100}"#).unwrap();

        let thresholds = GateThresholds::from_file(&path).unwrap();
        assert_eq!(thresholds.min_sharpe, 1.5);
        assert_eq!(thresholds.min_trades, 100);
        assert_eq!(thresholds.min_win_rate, 0.55);
        assert_eq!(thresholds.max_backtest_drawdown, 0.25);
    }
}
