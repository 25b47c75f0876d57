//! File-backed trade lock.
//!
//! Two files live in the state directory:
//! - `trade.lock`: persistent file holding the OS advisory lock (flock on
//!   unix). The OS drops the lock when the holder dies.
//! - `trade.lock.json`: holder payload, replaced atomically on acquire and
//!   removed on release.
//!
//! A payload older than `stale_after_secs` is only a hint. It is reclaimed
//! after the reclaimer itself takes the OS lock, so a live holder that runs
//! past the threshold keeps exclusivity. Reclaim never unlinks `trade.lock`;
//! only `force_release` does, and acquirers verify the inode they locked is
//! still the one on disk.

use std::fs::{self, File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use optguard_core::{Clock, SystemClock};
use optguard_persistence::{read_json, write_json_atomic, PersistenceError};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{LockError, LockResult};
use crate::named::NamedLock;

const LOCK_FILE: &str = "trade.lock";
const PAYLOAD_FILE: &str = "trade.lock.json";

// ============================================================================
// Configuration
// ============================================================================

/// Trade lock timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockConfig {
    /// How long `acquire` waits before giving up. Default: 30s.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Payload age after which the holder is presumed dead. Default: 300s.
    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,
    /// Sleep between attempts. Default: 100ms.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_stale_after_secs() -> u64 {
    300
}

fn default_poll_interval_ms() -> u64 {
    100
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

impl LockConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.stale_after_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }
}

// ============================================================================
// Payload and status
// ============================================================================

/// Who holds the lock, as written to `trade.lock.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockPayload {
    pub holder_id: String,
    pub pid: u32,
    pub host: String,
    pub acquired_at_ms: u64,
}

impl LockPayload {
    fn new(acquired_at_ms: u64) -> Self {
        Self {
            holder_id: uuid::Uuid::new_v4().to_string(),
            pid: std::process::id(),
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string()),
            acquired_at_ms,
        }
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.acquired_at_ms)
    }

    fn describe(&self) -> String {
        format!("{} (pid {} on {})", self.holder_id, self.pid, self.host)
    }
}

/// Snapshot for operators (`optguard lock-status`).
#[derive(Debug, Clone, Serialize)]
pub struct LockStatus {
    pub lock_path: PathBuf,
    /// An OS lock is currently held on the lock file.
    pub held: bool,
    pub payload: Option<LockPayload>,
    pub age_ms: Option<u64>,
    pub stale: bool,
}

// ============================================================================
// Guard
// ============================================================================

/// Proof of ownership. Dropping it clears our payload and unlocks.
#[derive(Debug)]
pub struct TradeLockGuard {
    file: File,
    payload_path: PathBuf,
    holder_id: String,
    acquired: Instant,
}

impl TradeLockGuard {
    pub fn holder_id(&self) -> &str {
        &self.holder_id
    }

    pub fn held_for(&self) -> Duration {
        self.acquired.elapsed()
    }

    /// Release explicitly. Equivalent to dropping the guard.
    pub fn release(self) {}
}

impl Drop for TradeLockGuard {
    fn drop(&mut self) {
        match read_json::<LockPayload>(&self.payload_path) {
            Ok(Some(payload)) if payload.holder_id == self.holder_id => {
                if let Err(e) = fs::remove_file(&self.payload_path) {
                    warn!(?e, "Failed to clear lock payload");
                }
            }
            Ok(_) => {
                warn!(holder_id = %self.holder_id, "Lock payload replaced while held, leaving it");
            }
            Err(e) => {
                warn!(?e, "Unreadable lock payload on release");
            }
        }
        if let Err(e) = fs2::FileExt::unlock(&self.file) {
            warn!(?e, "Failed to unlock trade lock");
        }
        debug!(
            holder_id = %self.holder_id,
            held_ms = self.acquired.elapsed().as_millis() as u64,
            "Trade lock released"
        );
    }
}

// ============================================================================
// FileTradeLock
// ============================================================================

/// Cross-process trade lock in `state_dir`.
pub struct FileTradeLock {
    name: String,
    lock_path: PathBuf,
    payload_path: PathBuf,
    config: LockConfig,
    clock: Arc<dyn Clock>,
}

impl FileTradeLock {
    pub fn new(state_dir: impl AsRef<Path>, config: LockConfig) -> Self {
        Self::with_clock(state_dir, config, Arc::new(SystemClock))
    }

    pub fn with_clock(state_dir: impl AsRef<Path>, config: LockConfig, clock: Arc<dyn Clock>) -> Self {
        let dir = state_dir.as_ref();
        Self {
            name: "trade".to_string(),
            lock_path: dir.join(LOCK_FILE),
            payload_path: dir.join(PAYLOAD_FILE),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &LockConfig {
        &self.config
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    pub fn payload_path(&self) -> &Path {
        &self.payload_path
    }

    /// Acquire with the configured timeout.
    pub async fn acquire(&self) -> LockResult<TradeLockGuard> {
        crate::named::acquire_named(self, self.config.timeout()).await
    }

    /// Current payload, or `None` when nobody has written one.
    pub fn payload(&self) -> LockResult<Option<LockPayload>> {
        match read_json::<LockPayload>(&self.payload_path) {
            Ok(payload) => Ok(payload),
            Err(PersistenceError::Json(e)) => Err(LockError::Payload(e.to_string())),
            Err(e) => Err(e.into()),
        }
    }

    /// Lock state for operators. Takes the lock only momentarily to test it.
    pub fn inspect(&self) -> LockResult<LockStatus> {
        let payload = self.payload()?;
        let now_ms = self.clock.now_ms();
        let age_ms = payload.as_ref().map(|p| p.age_ms(now_ms));
        let stale = age_ms.is_some_and(|age| age > self.config.stale_after().as_millis() as u64);

        Ok(LockStatus {
            lock_path: self.lock_path.clone(),
            held: self.held_elsewhere()?,
            payload,
            age_ms,
            stale,
        })
    }

    fn held_elsewhere(&self) -> LockResult<bool> {
        let file = match File::open(&self.lock_path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {
                fs2::FileExt::unlock(&file)?;
                Ok(false)
            }
            Err(e) if is_contended(&e) => Ok(true),
            Err(e) => Err(e.into()),
        }
    }

    /// Run `f` while briefly holding the OS lock ourselves.
    ///
    /// `None` means a live holder has it and `f` did not run.
    fn while_unheld<T>(&self, f: impl FnOnce() -> LockResult<T>) -> LockResult<Option<T>> {
        let file = self.open_lock_file()?;
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        }
        let result = f();
        if let Err(e) = fs2::FileExt::unlock(&file) {
            warn!(?e, "Failed to unlock trade lock after reclaim");
        }
        result.map(Some)
    }

    fn open_lock_file(&self) -> LockResult<File> {
        if let Some(parent) = self.lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)?;
        Ok(file)
    }

    /// The inode we locked is still the one at `lock_path`.
    #[cfg(unix)]
    fn still_linked(&self, file: &File) -> io::Result<bool> {
        use std::os::unix::fs::MetadataExt;

        let locked = file.metadata()?;
        match fs::metadata(&self.lock_path) {
            Ok(on_disk) => Ok(on_disk.ino() == locked.ino() && on_disk.dev() == locked.dev()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e),
        }
    }

    #[cfg(not(unix))]
    fn still_linked(&self, _file: &File) -> io::Result<bool> {
        Ok(self.lock_path.exists())
    }
}

fn is_contended(err: &io::Error) -> bool {
    err.kind() == io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

impl NamedLock for FileTradeLock {
    type Guard = TradeLockGuard;

    fn name(&self) -> &str {
        &self.name
    }

    fn poll_interval(&self) -> Duration {
        self.config.poll_interval()
    }

    fn try_acquire(&self) -> LockResult<Option<TradeLockGuard>> {
        let file = self.open_lock_file()?;
        match fs2::FileExt::try_lock_exclusive(&file) {
            Ok(()) => {}
            Err(e) if is_contended(&e) => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        if !self.still_linked(&file)? {
            // Reclaimed between open and lock; retry on the fresh file.
            debug!(path = %self.lock_path.display(), "Locked an unlinked lock file, retrying");
            return Ok(None);
        }

        let payload = LockPayload::new(self.clock.now_ms());
        if let Err(e) = write_json_atomic(&self.payload_path, &payload) {
            let _ = fs2::FileExt::unlock(&file);
            return Err(e.into());
        }

        info!(
            holder_id = %payload.holder_id,
            pid = payload.pid,
            "Trade lock acquired"
        );
        Ok(Some(TradeLockGuard {
            file,
            payload_path: self.payload_path.clone(),
            holder_id: payload.holder_id,
            acquired: Instant::now(),
        }))
    }

    fn reclaim_stale(&self) -> LockResult<bool> {
        let payload = match self.payload() {
            Ok(Some(payload)) => payload,
            Ok(None) => return Ok(false),
            Err(LockError::Payload(reason)) => {
                let discarded = self.while_unheld(|| {
                    remove_if_exists(&self.payload_path)?;
                    Ok(true)
                })?;
                if discarded.is_some() {
                    warn!(%reason, path = %self.payload_path.display(), "Discarded unreadable lock payload");
                }
                return Ok(false);
            }
            Err(e) => return Err(e),
        };

        let age_ms = payload.age_ms(self.clock.now_ms());
        let stale_ms = self.config.stale_after().as_millis() as u64;
        if age_ms <= stale_ms {
            return Ok(false);
        }

        let reclaimed = self.while_unheld(|| match self.payload()? {
            Some(current) if current.holder_id == payload.holder_id => {
                remove_if_exists(&self.payload_path)?;
                Ok(true)
            }
            _ => Ok(false),
        })?;

        match reclaimed {
            None => {
                warn!(
                    holder_id = %payload.holder_id,
                    pid = payload.pid,
                    age_ms,
                    stale_ms,
                    "Trade lock held past stale threshold by a live holder"
                );
                Ok(false)
            }
            Some(true) => {
                warn!(
                    holder_id = %payload.holder_id,
                    pid = payload.pid,
                    host = %payload.host,
                    age_ms,
                    stale_ms,
                    "Reclaimed stale trade lock payload"
                );
                Ok(true)
            }
            Some(false) => Ok(false),
        }
    }

    fn force_release(&self, reason: &str) -> LockResult<()> {
        let holder = self.holder();
        error!(
            reason,
            holder = holder.as_deref().unwrap_or("none"),
            "Force-releasing trade lock"
        );
        remove_if_exists(&self.payload_path)?;
        remove_if_exists(&self.lock_path)?;
        Ok(())
    }

    fn holder(&self) -> Option<String> {
        self.payload().ok().flatten().map(|p| p.describe())
    }
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
