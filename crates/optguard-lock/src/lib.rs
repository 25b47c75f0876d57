//! Cross-process mutual exclusion for trade evaluation.
//!
//! Holding the trade lock turns "check position count, then submit" into
//! one atomic unit across every process on the host.
//!
//! - `NamedLock`: exclusive, timeout-bounded, stale-reclaimable capability
//! - `FileTradeLock`: OS advisory lock plus a JSON holder payload
//! - `with_trade_lock`: run a future while holding the lock

pub mod error;
pub mod file_lock;
pub mod named;

pub use error::{LockError, LockResult};
pub use file_lock::{FileTradeLock, LockConfig, LockPayload, LockStatus, TradeLockGuard};
pub use named::{acquire_named, with_trade_lock, NamedLock};
