//! Trade history store backed by a JSON array of fills.

use std::path::{Path, PathBuf};

use optguard_core::{BrokerError, BrokerResult, Fill, TradeHistoryStore};
use tracing::debug;

use crate::atomic::read_json;
use crate::error::PersistenceResult;

/// Fills loaded from `<state_dir>/fills.json`.
#[derive(Debug, Clone, Default)]
pub struct JsonTradeHistory {
    path: PathBuf,
    fills: Vec<Fill>,
}

impl JsonTradeHistory {
    /// Load fills from `path`. A missing file is an empty history.
    pub fn load(path: impl Into<PathBuf>) -> PersistenceResult<Self> {
        let path = path.into();
        let fills: Vec<Fill> = read_json(&path)?.unwrap_or_default();
        debug!(path = %path.display(), fills = fills.len(), "Trade history loaded");
        Ok(Self { path, fills })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.fills.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fills.is_empty()
    }

    /// Re-read the file, keeping the old fills if it became unreadable.
    pub fn reload(&mut self) -> PersistenceResult<()> {
        let fresh = Self::load(self.path.clone())?;
        self.fills = fresh.fills;
        Ok(())
    }
}

impl TradeHistoryStore for JsonTradeHistory {
    fn fills_for(&self, symbol: &str) -> BrokerResult<Vec<Fill>> {
        if symbol.is_empty() {
            return Err(BrokerError::Rejected("empty symbol".to_string()));
        }
        Ok(self
            .fills
            .iter()
            .filter(|f| f.symbol == symbol)
            .cloned()
            .collect())
    }
}
