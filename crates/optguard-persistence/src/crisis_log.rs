//! Capped crisis log.
//!
//! A JSON array holding the most recent crisis events, oldest first.
//! The whole array is rewritten atomically on every append, keeping the
//! previous version as `<name>.bak`. Reads never modify the file.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::atomic::{read_json, write_json_with_backup};
use crate::error::{PersistenceError, PersistenceResult};

/// Number of entries retained by default.
pub const DEFAULT_CRISIS_LOG_CAPACITY: usize = 100;

/// Bounded JSON array log.
#[derive(Debug, Clone)]
pub struct CrisisLog {
    path: PathBuf,
    capacity: usize,
}

impl CrisisLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_capacity(path, DEFAULT_CRISIS_LOG_CAPACITY)
    }

    pub fn with_capacity(path: impl Into<PathBuf>, capacity: usize) -> Self {
        Self {
            path: path.into(),
            capacity: capacity.max(1),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All retained entries, oldest first. A corrupt log is an error.
    pub fn entries(&self) -> PersistenceResult<Vec<Value>> {
        Ok(read_json::<Vec<Value>>(&self.path)?.unwrap_or_default())
    }

    /// Append one entry, dropping the oldest beyond capacity.
    ///
    /// A corrupt log is moved aside (`<name>.corrupt`) and a new one started
    /// so crisis recording never stalls on a damaged file.
    pub fn append<T: Serialize>(&self, entry: &T) -> PersistenceResult<usize> {
        let mut entries = match self.entries() {
            Ok(entries) => entries,
            Err(PersistenceError::Json(e)) => {
                let aside = self.path.with_extension("corrupt");
                warn!(?e, path = %self.path.display(), aside = %aside.display(), "Crisis log unreadable, moving aside");
                fs::rename(&self.path, &aside)?;
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        entries.push(serde_json::to_value(entry)?);
        if entries.len() > self.capacity {
            let excess = entries.len() - self.capacity;
            entries.drain(..excess);
        }
        write_json_with_backup(&self.path, &entries)?;
        debug!(path = %self.path.display(), entries = entries.len(), "Crisis log appended");
        Ok(entries.len())
    }
}
