//! In-memory broker for tests and dry runs.
//!
//! Compiled for this crate's tests and, for other crates, behind the
//! `test-util` feature. Orders and closes mutate the held snapshot the way a
//! real account would, so guards that re-read positions see their effect.

use std::collections::HashMap;

use parking_lot::Mutex;
use rust_decimal::Decimal;

use crate::broker::{BoxFuture, BrokerAdapter, BrokerError, BrokerResult, CloseAck, OrderAck};
use crate::position::{AccountSnapshot, OrderSide, Position};
use crate::proposal::OrderRequest;

/// Scripted outcome for the next closes of one symbol.
#[derive(Debug, Clone)]
struct CloseScript {
    remaining: u32,
    error: BrokerError,
    /// Apply the fill before reporting `error` (lost acknowledgement).
    fill_first: bool,
}

#[derive(Debug, Default)]
pub struct MockBroker {
    snapshot: Mutex<Option<AccountSnapshot>>,
    close_scripts: Mutex<HashMap<String, CloseScript>>,
    /// Remaining scripted failures for `get_positions`/`get_account_equity`.
    read_failures: Mutex<Option<(u32, BrokerError)>>,
    closes: Mutex<Vec<(String, Decimal)>>,
    orders: Mutex<Vec<OrderRequest>>,
    calls: Mutex<u32>,
}

impl MockBroker {
    pub fn new(snapshot: AccountSnapshot) -> Self {
        Self {
            snapshot: Mutex::new(Some(snapshot)),
            ..Default::default()
        }
    }

    /// Make the next `times` closes of `symbol` fail with `error`.
    pub fn fail_close(&self, symbol: &str, times: u32, error: BrokerError) {
        self.script_close(symbol, times, error, false);
    }

    /// Make the next `times` closes of `symbol` fill, then report `error`
    /// as if the acknowledgement was lost.
    pub fn fill_then_fail_close(&self, symbol: &str, times: u32, error: BrokerError) {
        self.script_close(symbol, times, error, true);
    }

    fn script_close(&self, symbol: &str, times: u32, error: BrokerError, fill_first: bool) {
        self.close_scripts.lock().insert(
            symbol.to_string(),
            CloseScript {
                remaining: times,
                error,
                fill_first,
            },
        );
    }

    /// Make the next `times` account reads fail with `error`.
    pub fn fail_reads(&self, times: u32, error: BrokerError) {
        *self.read_failures.lock() = Some((times, error));
    }

    pub fn set_snapshot(&self, snapshot: AccountSnapshot) {
        *self.snapshot.lock() = Some(snapshot);
    }

    /// Recorded `(symbol, qty)` of every filled close, acknowledged or not.
    pub fn closes(&self) -> Vec<(String, Decimal)> {
        self.closes.lock().clone()
    }

    pub fn orders(&self) -> Vec<OrderRequest> {
        self.orders.lock().clone()
    }

    /// Total number of adapter calls, including failed ones.
    pub fn call_count(&self) -> u32 {
        *self.calls.lock()
    }

    fn take_read_failure(&self) -> Option<BrokerError> {
        let mut guard = self.read_failures.lock();
        match guard.as_mut() {
            Some((remaining, error)) if *remaining > 0 => {
                *remaining -= 1;
                Some(error.clone())
            }
            _ => None,
        }
    }

    fn take_close_script(&self, symbol: &str) -> Option<(BrokerError, bool)> {
        let mut scripts = self.close_scripts.lock();
        let script = scripts.get_mut(symbol)?;
        if script.remaining == 0 {
            return None;
        }
        script.remaining -= 1;
        Some((script.error.clone(), script.fill_first))
    }

    fn current(&self) -> BrokerResult<AccountSnapshot> {
        self.snapshot
            .lock()
            .clone()
            .ok_or_else(|| BrokerError::Unavailable("no snapshot loaded".to_string()))
    }

    /// Reduce `symbol` by up to `qty`. Returns the filled quantity.
    fn fill_close(&self, symbol: &str, qty: Decimal) -> BrokerResult<Decimal> {
        let mut guard = self.snapshot.lock();
        let snapshot = guard
            .as_mut()
            .ok_or_else(|| BrokerError::Unavailable("no snapshot loaded".to_string()))?;
        let position = snapshot
            .positions
            .iter_mut()
            .find(|p| p.symbol == symbol && !p.is_flat())
            .ok_or_else(|| BrokerError::NotFound(symbol.to_string()))?;

        let closed = qty.min(position.qty.abs());
        let remaining = position.qty.abs() - closed;
        position.qty = if position.qty.is_sign_negative() {
            -remaining
        } else {
            remaining
        };
        snapshot.positions.retain(|p| !p.is_flat());

        self.closes.lock().push((symbol.to_string(), closed));
        Ok(closed)
    }

    /// Apply an order fill to the held positions.
    fn fill_order(&self, order: &OrderRequest) -> BrokerResult<()> {
        let mut guard = self.snapshot.lock();
        let snapshot = guard
            .as_mut()
            .ok_or_else(|| BrokerError::Unavailable("no snapshot loaded".to_string()))?;
        let delta = match order.side {
            OrderSide::Buy => order.qty,
            OrderSide::Sell => -order.qty,
        };
        let notional = order.limit_price.unwrap_or_default() * order.qty;

        match snapshot.positions.iter_mut().find(|p| p.symbol == order.symbol) {
            Some(position) => {
                position.qty += delta;
                position.cost_basis += notional;
            }
            None => snapshot.positions.push(Position::new(
                order.symbol.clone(),
                delta,
                Decimal::ZERO,
                notional,
            )),
        }
        snapshot.positions.retain(|p| !p.is_flat());
        Ok(())
    }
}

impl BrokerAdapter for MockBroker {
    fn get_positions(&self) -> BoxFuture<'_, BrokerResult<Vec<Position>>> {
        Box::pin(async move {
            *self.calls.lock() += 1;
            if let Some(err) = self.take_read_failure() {
                return Err(err);
            }
            Ok(self.current()?.positions)
        })
    }

    fn get_account_equity(&self) -> BoxFuture<'_, BrokerResult<Decimal>> {
        Box::pin(async move {
            *self.calls.lock() += 1;
            if let Some(err) = self.take_read_failure() {
                return Err(err);
            }
            Ok(self.current()?.equity)
        })
    }

    fn close_position(&self, symbol: String, qty: Decimal) -> BoxFuture<'_, BrokerResult<CloseAck>> {
        Box::pin(async move {
            *self.calls.lock() += 1;
            if let Some((error, fill_first)) = self.take_close_script(&symbol) {
                if fill_first {
                    self.fill_close(&symbol, qty)?;
                }
                return Err(error);
            }

            let closed = self.fill_close(&symbol, qty)?;
            Ok(CloseAck {
                symbol,
                qty: closed,
                order_id: uuid::Uuid::new_v4().to_string(),
            })
        })
    }

    fn submit_order(&self, order: OrderRequest) -> BoxFuture<'_, BrokerResult<OrderAck>> {
        Box::pin(async move {
            *self.calls.lock() += 1;
            self.fill_order(&order)?;
            let ack = OrderAck {
                client_order_id: order.client_order_id.clone(),
                broker_order_id: uuid::Uuid::new_v4().to_string(),
            };
            self.orders.lock().push(order);
            Ok(ack)
        })
    }
}
