//! Atomic file replacement.
//!
//! Writers stage content in a temp file in the target's directory, fsync it,
//! then rename over the target. Readers see either the old or the new file.
//! State files that health checks may restore keep their last good version
//! in `<file>.bak`.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::{PersistenceError, PersistenceResult};

fn temp_path_for(path: &Path) -> PersistenceResult<PathBuf> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| PersistenceError::InvalidPath(path.display().to_string()))?;
    let tmp_name = format!(
        ".{}.tmp.{}.{}",
        file_name,
        std::process::id(),
        uuid::Uuid::new_v4().simple()
    );
    Ok(path.with_file_name(tmp_name))
}

fn ensure_parent(path: &Path) -> PersistenceResult<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn sync_parent_dir(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            if let Err(e) = dir.sync_all() {
                debug!(?e, dir = %parent.display(), "Directory fsync not supported");
            }
        }
    }
}

/// Replace `path` with `bytes` atomically.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> PersistenceResult<()> {
    ensure_parent(path)?;
    let tmp = temp_path_for(path)?;

    if let Err(e) = write_synced(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    sync_parent_dir(path);
    Ok(())
}

/// Serialize `value` as pretty JSON and replace `path` atomically.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> PersistenceResult<()> {
    let json = serde_json::to_vec_pretty(value)?;
    write_atomic(path, &json)
}

/// `<path>.bak`, the last good copy of a state file.
pub fn backup_path(path: &Path) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(".bak");
    PathBuf::from(name)
}

/// Like `write_json_atomic`, but first copies the current file to
/// `<path>.bak` if it holds valid JSON. A corrupt current file never
/// replaces a good backup.
pub fn write_json_with_backup<T: Serialize + ?Sized>(
    path: &Path,
    value: &T,
) -> PersistenceResult<()> {
    match fs::read(path) {
        Ok(current) if serde_json::from_slice::<serde_json::Value>(&current).is_ok() => {
            write_atomic(&backup_path(path), &current)?;
        }
        Ok(_) => {
            warn!(path = %path.display(), "Current state file is not valid JSON, keeping previous backup");
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    write_json_atomic(path, value)
}

/// Create `path` with `bytes` only if it does not exist yet.
///
/// The content is staged in a temp file and published with a hard link, so
/// the target appears complete or not at all and an existing file is never
/// overwritten. Returns `Ok(false)` when the target already exists.
pub fn create_new_atomic(path: &Path, bytes: &[u8]) -> PersistenceResult<bool> {
    ensure_parent(path)?;
    let tmp = temp_path_for(path)?;

    if let Err(e) = write_synced(&tmp, bytes) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }

    let linked = fs::hard_link(&tmp, path);
    if let Err(e) = fs::remove_file(&tmp) {
        warn!(?e, tmp = %tmp.display(), "Failed to remove staging file");
    }

    match linked {
        Ok(()) => {
            sync_parent_dir(path);
            Ok(true)
        }
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(false),
        Err(e) => Err(e.into()),
    }
}

/// Read and deserialize a JSON file. `Ok(None)` if it does not exist.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> PersistenceResult<Option<T>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_atomic_replaces_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state.json");

        write_atomic(&path, b"first").unwrap();
        write_atomic(&path, b"second").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"second");
    }

    #[test]
    fn test_no_staging_files_left_behind() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/state.json");
        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();
        create_new_atomic(&dir.path().join("nested/marker"), b"x").unwrap();

        let names: Vec<String> = fs::read_dir(dir.path().join("nested"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names.len(), 2, "unexpected files: {names:?}");
    }

    #[test]
    fn test_create_new_never_overwrites() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("marker");

        assert!(create_new_atomic(&path, b"original").unwrap());
        assert!(!create_new_atomic(&path, b"replacement").unwrap());
        assert_eq!(fs::read(&path).unwrap(), b"original");
    }

    #[test]
    fn test_backup_keeps_last_good_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        let backup = backup_path(&path);
        assert_eq!(backup, dir.path().join("positions.json.bak"));

        write_json_with_backup(&path, &vec![1]).unwrap();
        assert!(!backup.exists());

        write_json_with_backup(&path, &vec![2]).unwrap();
        let saved: Option<Vec<u32>> = read_json(&backup).unwrap();
        assert_eq!(saved, Some(vec![1]));

        // A damaged file is replaced but never becomes the backup.
        fs::write(&path, b"{torn").unwrap();
        write_json_with_backup(&path, &vec![3]).unwrap();
        let saved: Option<Vec<u32>> = read_json(&backup).unwrap();
        assert_eq!(saved, Some(vec![1]));
        let current: Option<Vec<u32>> = read_json(&path).unwrap();
        assert_eq!(current, Some(vec![3]));
    }

    #[test]
    fn test_read_json_missing_is_none() {
        let dir = TempDir::new().unwrap();
        let missing: Option<Vec<u32>> = read_json(&dir.path().join("nope.json")).unwrap();
        assert!(missing.is_none());

        let path = dir.path().join("v.json");
        write_json_atomic(&path, &vec![4u32, 5]).unwrap();
        let back: Option<Vec<u32>> = read_json(&path).unwrap();
        assert_eq!(back, Some(vec![4, 5]));
    }
}
