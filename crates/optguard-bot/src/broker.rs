//! Paper broker backed by the position snapshot file.
//!
//! Used when no live adapter is wired. Positions and equity are read from
//! `<state_dir>/positions.json` (`{equity, positions[]}`), closes rewrite
//! that file (keeping the previous version as `positions.json.bak`), and
//! orders are journaled to `paper_orders_<date>.jsonl` without filling.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use optguard_core::{
    AccountSnapshot, BoxFuture, BrokerAdapter, BrokerError, BrokerResult, CloseAck, OrderAck,
    OrderRequest, Position,
};
use optguard_persistence::{read_json, write_json_with_backup, JsonLinesWriter};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::Serialize;
use tracing::{debug, info};
use uuid::Uuid;

/// Journal line for a paper order.
#[derive(Debug, Clone, Serialize)]
pub struct PaperOrderRecord {
    pub recorded_at: DateTime<Utc>,
    pub broker_order_id: String,
    pub order: OrderRequest,
}

pub struct SnapshotBroker {
    snapshot_path: PathBuf,
    /// Serializes read-modify-write of the snapshot file.
    write_lock: Mutex<()>,
    orders: Mutex<JsonLinesWriter<PaperOrderRecord>>,
}

impl SnapshotBroker {
    pub fn new(state_dir: &Path) -> Self {
        Self {
            snapshot_path: state_dir.join("positions.json"),
            write_lock: Mutex::new(()),
            orders: Mutex::new(JsonLinesWriter::new(state_dir, "paper_orders", 1)),
        }
    }

    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    fn load(&self) -> BrokerResult<AccountSnapshot> {
        match read_json::<AccountSnapshot>(&self.snapshot_path) {
            Ok(Some(snapshot)) => Ok(snapshot),
            Ok(None) => Err(BrokerError::Unavailable(format!(
                "no snapshot at {}",
                self.snapshot_path.display()
            ))),
            Err(e) => Err(BrokerError::Unavailable(e.to_string())),
        }
    }

    fn close(&self, symbol: &str, qty: Decimal) -> BrokerResult<CloseAck> {
        let _write = self.write_lock.lock();
        let mut snapshot = self.load()?;

        let idx = snapshot
            .positions
            .iter()
            .position(|p| p.symbol == symbol && !p.is_flat())
            .ok_or_else(|| BrokerError::NotFound(symbol.to_string()))?;
        if qty <= Decimal::ZERO {
            return Err(BrokerError::Rejected(format!("close qty must be positive, got {qty}")));
        }

        let position = &snapshot.positions[idx];
        let live = position.qty.abs();
        let closed = qty.min(live);
        let remaining = live - closed;

        if remaining.is_zero() {
            snapshot.positions.remove(idx);
        } else {
            let fraction = remaining / live;
            let reduced = Position::new(
                position.symbol.clone(),
                if position.qty.is_sign_negative() { -remaining } else { remaining },
                position.unrealized_pl * fraction,
                position.cost_basis * fraction,
            );
            snapshot.positions[idx] = reduced;
        }

        write_json_with_backup(&self.snapshot_path, &snapshot)
            .map_err(|e| BrokerError::Transient(e.to_string()))?;

        let order_id = format!("paper-{}", Uuid::new_v4());
        info!(symbol, qty = %closed, %order_id, "Paper close filled");
        Ok(CloseAck {
            symbol: symbol.to_string(),
            qty: closed,
            order_id,
        })
    }

    fn journal(&self, order: OrderRequest) -> BrokerResult<OrderAck> {
        let broker_order_id = format!("paper-{}", Uuid::new_v4());
        let client_order_id = order.client_order_id.clone();
        let record = PaperOrderRecord {
            recorded_at: Utc::now(),
            broker_order_id: broker_order_id.clone(),
            order,
        };
        self.orders
            .lock()
            .add_record(record)
            .map_err(|e| BrokerError::Transient(e.to_string()))?;
        debug!(%client_order_id, %broker_order_id, "Paper order journaled");
        Ok(OrderAck {
            client_order_id,
            broker_order_id,
        })
    }
}

impl BrokerAdapter for SnapshotBroker {
    fn get_positions(&self) -> BoxFuture<'_, BrokerResult<Vec<Position>>> {
        Box::pin(async move { self.load().map(|s| s.positions) })
    }

    fn get_account_equity(&self) -> BoxFuture<'_, BrokerResult<Decimal>> {
        Box::pin(async move { self.load().map(|s| s.equity) })
    }

    fn close_position(&self, symbol: String, qty: Decimal) -> BoxFuture<'_, BrokerResult<CloseAck>> {
        Box::pin(async move { self.close(&symbol, qty) })
    }

    fn submit_order(&self, order: OrderRequest) -> BoxFuture<'_, BrokerResult<OrderAck>> {
        Box::pin(async move { self.journal(order) })
    }
}
