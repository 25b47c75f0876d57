//! Timestamped audit reports.
//!
//! Each run produces `<prefix>_YYYYMMDD_HHMMSS.json` plus a markdown twin.
//! Reports are never overwritten; a second run in the same second gets a
//! numeric suffix.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;

use crate::atomic::{create_new_atomic, write_atomic};
use crate::error::{PersistenceError, PersistenceResult};

/// Highest suffix tried before giving up on a unique name.
const MAX_SUFFIX: u32 = 1000;

/// Where a report was written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditReportPaths {
    pub json: PathBuf,
    pub markdown: PathBuf,
}

/// Writes audit reports into one directory.
#[derive(Debug, Clone)]
pub struct AuditReportWriter {
    dir: PathBuf,
}

impl AuditReportWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `report` as JSON and `markdown` alongside it.
    pub fn write<T: Serialize>(
        &self,
        prefix: &str,
        generated_at: DateTime<Utc>,
        report: &T,
        markdown: &str,
    ) -> PersistenceResult<AuditReportPaths> {
        let stamp = generated_at.format("%Y%m%d_%H%M%S").to_string();
        let json = serde_json::to_vec_pretty(report)?;

        for n in 1..=MAX_SUFFIX {
            let stem = if n == 1 {
                format!("{prefix}_{stamp}")
            } else {
                format!("{prefix}_{stamp}_{n}")
            };
            let json_path = self.dir.join(format!("{stem}.json"));
            if create_new_atomic(&json_path, &json)? {
                let md_path = self.dir.join(format!("{stem}.md"));
                write_atomic(&md_path, markdown.as_bytes())?;
                info!(report = %json_path.display(), "Audit report written");
                return Ok(AuditReportPaths {
                    json: json_path,
                    markdown: md_path,
                });
            }
        }

        Err(PersistenceError::AlreadyExists(format!(
            "{}/{prefix}_{stamp}",
            self.dir.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_report_filenames_are_timestamped() {
        let dir = TempDir::new().unwrap();
        let writer = AuditReportWriter::new(dir.path().join("reports"));
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 5).unwrap();

        let paths = writer
            .write("auto_close", at, &json!({"dry_run": true}), "# Report\n")
            .unwrap();
        assert!(paths.json.ends_with("auto_close_20250314_093005.json"));
        assert!(paths.markdown.ends_with("auto_close_20250314_093005.md"));
        assert_eq!(std::fs::read_to_string(&paths.markdown).unwrap(), "# Report\n");
    }

    #[test]
    fn test_same_second_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let writer = AuditReportWriter::new(dir.path());
        let at = Utc.with_ymd_and_hms(2025, 3, 14, 9, 30, 5).unwrap();

        let first = writer.write("auto_close", at, &json!({"run": 1}), "").unwrap();
        let second = writer.write("auto_close", at, &json!({"run": 2}), "").unwrap();
        assert_ne!(first.json, second.json);
        assert!(second.json.ends_with("auto_close_20250314_093005_2.json"));

        let body: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&first.json).unwrap()).unwrap();
        assert_eq!(body["run"], 1);
    }
}
