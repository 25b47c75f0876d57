//! Lock capability and the acquisition loop shared by every implementation.

use std::future::Future;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{LockError, LockResult};

/// Exclusive, timeout-bounded, crash-recoverable lock.
///
/// `FileTradeLock` is the single-host implementation; a lease in an
/// external store can implement the same capability.
pub trait NamedLock: Send + Sync {
    /// Held while the lock is owned; releases on drop.
    type Guard: Send;

    fn name(&self) -> &str;

    /// Sleep between acquisition attempts.
    fn poll_interval(&self) -> Duration;

    /// Single non-blocking attempt. `Ok(None)` means another holder has it.
    fn try_acquire(&self) -> LockResult<Option<Self::Guard>>;

    /// Remove holder state older than the staleness threshold.
    /// Returns true if something was reclaimed.
    fn reclaim_stale(&self) -> LockResult<bool>;

    /// Emergency override: drop the lock regardless of holder.
    fn force_release(&self, reason: &str) -> LockResult<()>;

    /// Best-effort description of the current holder.
    fn holder(&self) -> Option<String>;
}

/// Acquire `lock`, polling until `timeout` elapses.
///
/// Stale holder state is reclaimed once before polling starts.
pub async fn acquire_named<L: NamedLock>(lock: &L, timeout: Duration) -> LockResult<L::Guard> {
    let started = Instant::now();

    if lock.reclaim_stale()? {
        warn!(lock = lock.name(), "Reclaimed stale lock before acquiring");
    }

    loop {
        if let Some(guard) = lock.try_acquire()? {
            debug!(
                lock = lock.name(),
                waited_ms = started.elapsed().as_millis() as u64,
                "Lock acquired"
            );
            return Ok(guard);
        }

        let elapsed = started.elapsed();
        if elapsed >= timeout {
            let holder = lock.holder();
            warn!(
                lock = lock.name(),
                waited_ms = elapsed.as_millis() as u64,
                holder = holder.as_deref().unwrap_or("unknown"),
                "Lock acquisition timed out"
            );
            return Err(LockError::Timeout {
                name: lock.name().to_string(),
                waited_ms: elapsed.as_millis() as u64,
                holder,
            });
        }

        tokio::time::sleep(lock.poll_interval().min(timeout - elapsed)).await;
    }
}

/// Run `f` while holding `lock`.
///
/// On `LockError::Timeout` nothing has run; the caller must treat it as
/// "abort, do not proceed".
pub async fn with_trade_lock<L, F, Fut, T>(lock: &L, timeout: Duration, f: F) -> LockResult<T>
where
    L: NamedLock,
    F: FnOnce() -> Fut,
    Fut: Future<Output = T>,
{
    let _guard = acquire_named(lock, timeout).await?;
    Ok(f().await)
}
