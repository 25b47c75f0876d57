//! Consolidated crisis thresholds.
//!
//! Crisis detection and forced-close recommendations read the same
//! `RiskThresholds` so the two can never drift apart.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Portfolio-level risk thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskThresholds {
    /// Maximum number of simultaneously open positions.
    #[serde(default = "default_max_positions")]
    pub max_positions: usize,
    /// Total unrealized loss / equity above which the portfolio is in crisis.
    #[serde(default = "default_crisis_loss_pct")]
    pub crisis_loss_pct: Decimal,
    /// Single position loss / cost basis above which it must be closed.
    #[serde(default = "default_single_position_loss_pct")]
    pub single_position_loss_pct: Decimal,
}

fn default_max_positions() -> usize {
    4
}

fn default_crisis_loss_pct() -> Decimal {
    Decimal::new(25, 2) // 0.25
}

fn default_single_position_loss_pct() -> Decimal {
    Decimal::new(50, 2) // 0.50
}

impl Default for RiskThresholds {
    fn default() -> Self {
        Self {
            max_positions: default_max_positions(),
            crisis_loss_pct: default_crisis_loss_pct(),
            single_position_loss_pct: default_single_position_loss_pct(),
        }
    }
}

impl RiskThresholds {
    /// Reject nonsensical values at load time.
    pub fn validate(&self) -> Result<()> {
        if self.max_positions == 0 {
            return Err(CoreError::InvalidConfig(
                "max_positions must be at least 1".to_string(),
            ));
        }
        for (name, value) in [
            ("crisis_loss_pct", self.crisis_loss_pct),
            ("single_position_loss_pct", self.single_position_loss_pct),
        ] {
            if value <= Decimal::ZERO || value > Decimal::ONE {
                return Err(CoreError::InvalidConfig(format!(
                    "{name} must be in (0, 1], got {value}"
                )));
            }
        }
        Ok(())
    }
}
