//! Core domain types for the optguard risk-control plane.
//!
//! This crate provides the vocabulary shared by every guard:
//! - `Position`, `Fill`, `AccountSnapshot`: read-only broker snapshots
//! - `TradeProposal`, `OrderRequest`: what a strategy wants to do
//! - `RiskThresholds`: the single source of crisis/close thresholds
//! - `BrokerAdapter`, `TradeHistoryStore`: seams to external collaborators
//! - `Clock`: injectable time source

pub mod broker;
pub mod clock;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod mock;
pub mod position;
pub mod proposal;
pub mod symbol;
pub mod thresholds;

pub use broker::{
    BoxFuture, BrokerAdapter, BrokerError, BrokerResult, CloseAck, DynBroker, OrderAck,
    TradeHistoryStore,
};
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
#[cfg(any(test, feature = "test-util"))]
pub use mock::MockBroker;
pub use position::{AccountSnapshot, Fill, OrderSide, Position};
pub use proposal::{OrderRequest, TradeProposal};
pub use symbol::{underlying_symbol, OptionKind, OptionSymbol};
pub use thresholds::RiskThresholds;
