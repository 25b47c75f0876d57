//! Built-in health checks and remediations.

use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use optguard_core::AccountSnapshot;
use optguard_persistence::{backup_path, read_json, write_atomic};
use serde_json::Value;
use tracing::{info, warn};

use crate::config::HealthConfig;
use crate::error::{HealthError, HealthResult};
use crate::healer::{HealthCheck, HealthCheckResult, SelfHealer};

fn with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let mut name: OsString = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Parse `path` as JSON. `Ok(None)` if it does not exist.
fn parse_json(path: &Path) -> Result<Option<Value>, String> {
    match fs::read(path) {
        Ok(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| format!("{}: {e}", path.display())),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(format!("{}: {e}", path.display())),
    }
}

// ============================================================================
// StateFileIntegrity
// ============================================================================

/// Every existing state file parses as JSON.
pub struct StateFileIntegrity {
    files: Vec<PathBuf>,
}

impl StateFileIntegrity {
    pub const NAME: &'static str = "state_file_integrity";

    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }

    fn corrupt_files(&self) -> Vec<(PathBuf, String)> {
        self.files
            .iter()
            .filter_map(|f| parse_json(f).err().map(|e| (f.clone(), e)))
            .collect()
    }
}

impl HealthCheck for StateFileIntegrity {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self) -> HealthCheckResult {
        let corrupt = self.corrupt_files();
        if corrupt.is_empty() {
            return HealthCheckResult::healthy(
                Self::NAME,
                format!("{} state file(s) readable", self.files.len()),
            );
        }
        let detail: Vec<String> = corrupt.into_iter().map(|(_, e)| e).collect();
        HealthCheckResult::unhealthy(Self::NAME, format!("corrupt: {}", detail.join("; ")))
    }
}

/// Restores corrupt state files from their `.bak` copy. The corrupt file
/// is kept as `.corrupt`.
pub struct RestoreFromBackup {
    files: Vec<PathBuf>,
}

impl RestoreFromBackup {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files }
    }
}

impl crate::healer::Remediation for RestoreFromBackup {
    fn apply(&self) -> HealthResult<String> {
        let mut restored = Vec::new();
        let mut unrecoverable = Vec::new();

        for file in &self.files {
            if parse_json(file).is_ok() {
                continue;
            }
            let backup = backup_path(file);
            let bytes = match fs::read(&backup) {
                Ok(bytes) if serde_json::from_slice::<Value>(&bytes).is_ok() => bytes,
                _ => {
                    unrecoverable.push(file.display().to_string());
                    continue;
                }
            };
            if let Ok(current) = fs::read(file) {
                write_atomic(&with_suffix(file, ".corrupt"), &current)?;
            }
            write_atomic(file, &bytes)?;
            warn!(file = %file.display(), backup = %backup.display(), "Restored state file from backup");
            restored.push(file.display().to_string());
        }

        if restored.is_empty() && !unrecoverable.is_empty() {
            return Err(HealthError::HealCheckFailure {
                check: StateFileIntegrity::NAME.to_string(),
                reason: format!("no valid backup for {}", unrecoverable.join(", ")),
            });
        }
        Ok(format!("restored from backup: {}", restored.join(", ")))
    }
}

// ============================================================================
// RequiredFields
// ============================================================================

/// A JSON state file carries all required top-level keys.
pub struct RequiredFields {
    name: String,
    path: PathBuf,
    fields: Vec<String>,
}

impl RequiredFields {
    pub fn new(path: PathBuf, fields: Vec<String>) -> Self {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name: format!("required_fields:{file}"),
            path,
            fields,
        }
    }
}

impl HealthCheck for RequiredFields {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> HealthCheckResult {
        let value = match parse_json(&self.path) {
            Ok(Some(value)) => value,
            Ok(None) => {
                return HealthCheckResult::degraded(
                    &self.name,
                    format!("{} not present", self.path.display()),
                )
            }
            Err(e) => return HealthCheckResult::unhealthy(&self.name, e),
        };
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| value.get(f.as_str()).is_none())
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            HealthCheckResult::healthy(&self.name, "all required fields present")
        } else {
            HealthCheckResult::unhealthy(&self.name, format!("missing fields: {}", missing.join(", ")))
        }
    }
}

// ============================================================================
// ConfigCompleteness
// ============================================================================

type EnvLookup = Box<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Required environment variables are set and non-empty.
pub struct ConfigCompleteness {
    vars: Vec<String>,
    lookup: EnvLookup,
}

impl ConfigCompleteness {
    pub const NAME: &'static str = "config_completeness";

    pub fn new(vars: Vec<String>) -> Self {
        Self::with_lookup(vars, Box::new(|key| std::env::var(key).ok()))
    }

    pub fn with_lookup(vars: Vec<String>, lookup: EnvLookup) -> Self {
        Self { vars, lookup }
    }
}

impl HealthCheck for ConfigCompleteness {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn run(&self) -> HealthCheckResult {
        let missing: Vec<&str> = self
            .vars
            .iter()
            .filter(|v| (self.lookup)(v.as_str()).map_or(true, |val| val.trim().is_empty()))
            .map(String::as_str)
            .collect();
        if missing.is_empty() {
            HealthCheckResult::healthy(Self::NAME, format!("{} variable(s) set", self.vars.len()))
        } else {
            HealthCheckResult::unhealthy(Self::NAME, format!("unset: {}", missing.join(", ")))
        }
    }
}

// ============================================================================
// DataStaleness
// ============================================================================

/// A data file was modified within `max_age`.
pub struct DataStaleness {
    name: String,
    path: PathBuf,
    max_age: Duration,
}

impl DataStaleness {
    pub fn new(path: PathBuf, max_age: Duration) -> Self {
        let file = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            name: format!("data_staleness:{file}"),
            path,
            max_age,
        }
    }
}

impl HealthCheck for DataStaleness {
    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self) -> HealthCheckResult {
        let modified = match fs::metadata(&self.path).and_then(|m| m.modified()) {
            Ok(modified) => modified,
            Err(e) => {
                return HealthCheckResult::degraded(
                    &self.name,
                    format!("{}: {e}", self.path.display()),
                )
            }
        };
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        if age > self.max_age {
            HealthCheckResult::degraded(
                &self.name,
                format!("last updated {}s ago (limit {}s)", age.as_secs(), self.max_age.as_secs()),
            )
        } else {
            HealthCheckResult::healthy(&self.name, format!("updated {}s ago", age.as_secs()))
        }
    }
}

// ============================================================================
// PositionCompliance
// ============================================================================

/// Open positions respect the count limit and ticker allow-list.
/// Never auto-fixed: closing positions is a trading decision.
pub struct PositionCompliance {
    snapshot_path: PathBuf,
    max_positions: usize,
    allowed_tickers: Vec<String>,
}

impl PositionCompliance {
    pub const NAME: &'static str = "position_compliance";

    pub fn new(snapshot_path: PathBuf, max_positions: usize, allowed_tickers: Vec<String>) -> Self {
        Self {
            snapshot_path,
            max_positions,
            allowed_tickers,
        }
    }
}

impl HealthCheck for PositionCompliance {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn remediable(&self) -> bool {
        false
    }

    fn run(&self) -> HealthCheckResult {
        let snapshot: AccountSnapshot = match read_json(&self.snapshot_path) {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                return HealthCheckResult::degraded(Self::NAME, "no position snapshot available")
            }
            Err(e) => return HealthCheckResult::unhealthy(Self::NAME, e.to_string()),
        };

        let mut problems = Vec::new();
        let count = snapshot.open_positions().count();
        if count > self.max_positions {
            problems.push(format!("{count} open positions exceed {}", self.max_positions));
        }
        let disallowed: Vec<&str> = snapshot
            .open_positions()
            .map(|p| p.underlying())
            .filter(|u| !self.allowed_tickers.iter().any(|t| t.eq_ignore_ascii_case(u)))
            .collect();
        if !disallowed.is_empty() {
            problems.push(format!("tickers not allowed: {}", disallowed.join(", ")));
        }

        if problems.is_empty() {
            HealthCheckResult::healthy(Self::NAME, format!("{count} open position(s) compliant"))
        } else {
            HealthCheckResult::unhealthy(Self::NAME, problems.join("; "))
        }
    }
}

// ============================================================================
// Wiring
// ============================================================================

impl SelfHealer {
    /// Healer with the built-in checks for `state_dir`.
    pub fn from_config(
        config: &HealthConfig,
        state_dir: &Path,
        max_positions: usize,
        allowed_tickers: &[String],
    ) -> Self {
        let mut healer = SelfHealer::new();

        let state_files: Vec<PathBuf> = config.state_files.iter().map(|f| state_dir.join(f)).collect();
        healer.register_check(Box::new(StateFileIntegrity::new(state_files.clone())));
        if let Err(e) = healer.register_remediation(
            StateFileIntegrity::NAME,
            Box::new(RestoreFromBackup::new(state_files)),
        ) {
            warn!(%e, "Backup restore remediation not registered");
        }

        for spec in &config.required_fields {
            healer.register_check(Box::new(RequiredFields::new(
                state_dir.join(&spec.file),
                spec.fields.clone(),
            )));
        }
        if !config.required_env.is_empty() {
            healer.register_check(Box::new(ConfigCompleteness::new(config.required_env.clone())));
        }
        for spec in &config.staleness {
            healer.register_check(Box::new(DataStaleness::new(
                state_dir.join(&spec.file),
                Duration::from_secs(spec.max_age_secs),
            )));
        }
        if config.position_compliance {
            healer.register_check(Box::new(PositionCompliance::new(
                state_dir.join("positions.json"),
                max_positions,
                allowed_tickers.to_vec(),
            )));
        }

        info!(checks = ?healer.check_names(), "Self-healer configured");
        healer
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::healer::HealthStatus;
    use optguard_core::Position;
    use optguard_persistence::write_json_atomic;
    use rust_decimal_macros::dec;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn tickers() -> Vec<String> {
        vec!["SPY".to_string(), "QQQ".to_string()]
    }

    #[test]
    fn test_corrupt_state_restored_from_backup() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("crisis_log.json");
        fs::write(&file, b"[{\"trunc").unwrap();
        fs::write(with_suffix(&file, ".bak"), b"[]").unwrap();

        let mut healer = SelfHealer::new();
        healer.register_check(Box::new(StateFileIntegrity::new(vec![file.clone()])));
        healer
            .register_remediation(
                StateFileIntegrity::NAME,
                Box::new(RestoreFromBackup::new(vec![file.clone()])),
            )
            .unwrap();

        assert_eq!(healer.run_health_checks().overall, HealthStatus::Unhealthy);
        let report = healer.heal();
        assert_eq!(report.summary.overall, HealthStatus::Healed);
        assert_eq!(fs::read(&file).unwrap(), b"[]");
        assert!(with_suffix(&file, ".corrupt").exists());
    }

    #[test]
    fn test_torn_crisis_log_restored_from_append_backup() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("crisis_log.json");
        let log = optguard_persistence::CrisisLog::new(&file);
        log.append(&serde_json::json!({"seq": 1})).unwrap();
        log.append(&serde_json::json!({"seq": 2})).unwrap();
        fs::write(&file, b"[{\"seq\": 1}, {\"se").unwrap();

        let mut healer = SelfHealer::new();
        healer.register_check(Box::new(StateFileIntegrity::new(vec![file.clone()])));
        healer
            .register_remediation(
                StateFileIntegrity::NAME,
                Box::new(RestoreFromBackup::new(vec![file.clone()])),
            )
            .unwrap();

        let report = healer.heal();
        assert_eq!(report.summary.overall, HealthStatus::Healed);
        assert_eq!(log.entries().unwrap(), vec![serde_json::json!({"seq": 1})]);
    }

    #[test]
    fn test_corrupt_without_backup_stays_unhealthy() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("state.json");
        fs::write(&file, b"nope").unwrap();

        let mut healer = SelfHealer::new();
        healer.register_check(Box::new(StateFileIntegrity::new(vec![file.clone()])));
        healer
            .register_remediation(
                StateFileIntegrity::NAME,
                Box::new(RestoreFromBackup::new(vec![file])),
            )
            .unwrap();

        let report = healer.heal();
        assert_eq!(report.summary.overall, HealthStatus::Unhealthy);
        assert!(report.healed.is_empty());
    }

    #[test]
    fn test_missing_state_file_is_not_corruption() {
        let dir = TempDir::new().unwrap();
        let check = StateFileIntegrity::new(vec![dir.path().join("absent.json")]);
        assert_eq!(check.run().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_required_fields() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("positions.json");
        let check = RequiredFields::new(file.clone(), vec!["equity".into(), "positions".into()]);
        assert_eq!(check.run().status, HealthStatus::Degraded);

        fs::write(&file, br#"{"equity": "1000"}"#).unwrap();
        let result = check.run();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.message.contains("positions"));

        fs::write(&file, br#"{"equity": "1000", "positions": []}"#).unwrap();
        assert_eq!(check.run().status, HealthStatus::Healthy);
    }

    #[test]
    fn test_config_completeness_uses_lookup() {
        let env: HashMap<String, String> =
            [("BROKER_KEY".to_string(), "abc".to_string()), ("EMPTY".to_string(), " ".to_string())]
                .into_iter()
                .collect();
        let check = ConfigCompleteness::with_lookup(
            vec!["BROKER_KEY".into(), "EMPTY".into(), "MISSING".into()],
            Box::new(move |k| env.get(k).cloned()),
        );
        let result = check.run();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.message.contains("EMPTY"));
        assert!(result.message.contains("MISSING"));
        assert!(!result.message.contains("BROKER_KEY"));
    }

    #[test]
    fn test_stale_file_is_degraded() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("positions.json");
        fs::write(&file, b"{}").unwrap();
        let check = DataStaleness::new(file.clone(), Duration::from_secs(60));
        assert_eq!(check.run().status, HealthStatus::Healthy);

        let old = SystemTime::now() - Duration::from_secs(3600);
        fs::File::options()
            .write(true)
            .open(&file)
            .unwrap()
            .set_modified(old)
            .unwrap();
        assert_eq!(check.run().status, HealthStatus::Degraded);
    }

    #[test]
    fn test_position_compliance_never_auto_fixed() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("positions.json");
        write_json_atomic(
            &path,
            &AccountSnapshot::new(
                dec!(10000),
                vec![
                    Position::new("SPY", dec!(1), dec!(0), dec!(100)),
                    Position::new("TSLA", dec!(1), dec!(0), dec!(100)),
                ],
            ),
        )
        .unwrap();

        let mut healer = SelfHealer::new();
        healer.register_check(Box::new(PositionCompliance::new(path, 4, tickers())));
        let report = healer.heal();
        let result = report.summary.get(PositionCompliance::NAME).unwrap();
        assert_eq!(result.status, HealthStatus::Unhealthy);
        assert!(result.message.contains("TSLA"));
        assert!(!result.auto_fixed);
    }

    #[test]
    fn test_from_config_registers_builtin_checks() {
        let dir = TempDir::new().unwrap();
        let config = HealthConfig {
            required_env: vec!["OPTGUARD_TEST_UNLIKELY_VAR".to_string()],
            ..Default::default()
        };
        let healer = SelfHealer::from_config(&config, dir.path(), 4, &tickers());
        let names = healer.check_names();
        assert!(names.contains(&StateFileIntegrity::NAME));
        assert!(names.contains(&ConfigCompleteness::NAME));
        assert!(names.contains(&PositionCompliance::NAME));
        assert!(names.contains(&"required_fields:positions.json"));
        assert!(names.contains(&"data_staleness:positions.json"));
    }
}
