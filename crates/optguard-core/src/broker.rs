//! Seams to external collaborators: the broker and the trade history store.
//!
//! Provides trait-based abstractions so every guard can be exercised with
//! an in-memory broker (`mock`, behind the `test-util` feature) and wired
//! to a real adapter in production.

use std::pin::Pin;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::position::{Fill, Position};
use crate::proposal::OrderRequest;

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn std::future::Future<Output = T> + Send + 'a>>;

/// Broker adapter errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// Network hiccup, timeout, 5xx. Worth retrying.
    #[error("Transient broker error: {0}")]
    Transient(String),

    /// Rate limited by the broker. Worth retrying after backoff.
    #[error("Broker rate limited: {0}")]
    RateLimited(String),

    /// Broker refused the request (bad symbol, insufficient buying power).
    #[error("Broker rejected request: {0}")]
    Rejected(String),

    /// Position or order does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Adapter is not configured or permanently unavailable.
    #[error("Broker unavailable: {0}")]
    Unavailable(String),
}

pub type BrokerResult<T> = Result<T, BrokerError>;

/// Acknowledgement of a close request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CloseAck {
    pub symbol: String,
    pub qty: Decimal,
    pub order_id: String,
}

/// Acknowledgement of a submitted order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderAck {
    pub client_order_id: String,
    pub broker_order_id: String,
}

/// Broker adapter consumed by the control plane.
///
/// Every call must be routed through a circuit breaker and retry policy by
/// the caller; implementations should not retry internally.
pub trait BrokerAdapter: Send + Sync {
    fn get_positions(&self) -> BoxFuture<'_, BrokerResult<Vec<Position>>>;

    fn get_account_equity(&self) -> BoxFuture<'_, BrokerResult<Decimal>>;

    /// Close `qty` (absolute) of the position in `symbol`.
    fn close_position(&self, symbol: String, qty: Decimal) -> BoxFuture<'_, BrokerResult<CloseAck>>;

    fn submit_order(&self, order: OrderRequest) -> BoxFuture<'_, BrokerResult<OrderAck>>;
}

/// Arc wrapper for BrokerAdapter trait objects.
pub type DynBroker = Arc<dyn BrokerAdapter>;

/// Source of historical fills.
pub trait TradeHistoryStore: Send + Sync {
    /// All known fills for `symbol`, any order.
    fn fills_for(&self, symbol: &str) -> BrokerResult<Vec<Fill>>;
}

impl TradeHistoryStore for Vec<Fill> {
    fn fills_for(&self, symbol: &str) -> BrokerResult<Vec<Fill>> {
        Ok(self.iter().filter(|f| f.symbol == symbol).cloned().collect())
    }
}
