//! Application configuration.

use crate::error::{AppError, AppResult};
use optguard_core::RiskThresholds;
use optguard_gate::GateThresholds;
use optguard_health::HealthConfig;
use optguard_lock::LockConfig;
use optguard_position::AutoCloseConfig;
use optguard_resilience::{BreakerConfig, RetryConfig};
use optguard_risk::ChecklistConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "OPTGUARD_CONFIG";

/// Config file used when neither `--config` nor `OPTGUARD_CONFIG` is set.
pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Monitoring loop configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Crisis evaluation interval (seconds). Default: 60.
    #[serde(default = "default_monitor_interval_secs")]
    pub interval_secs: u64,
    /// Hand recommendations to the auto-close engine on breach. Default: true.
    #[serde(default = "default_auto_close_on_crisis")]
    pub auto_close_on_crisis: bool,
    /// Execute those closes instead of a dry run. Default: false.
    #[serde(default)]
    pub execute_closures: bool,
    /// Apply remediations in the health loop. Default: true.
    #[serde(default = "default_auto_heal")]
    pub auto_heal: bool,
}

fn default_monitor_interval_secs() -> u64 {
    60
}

fn default_auto_close_on_crisis() -> bool {
    true
}

fn default_auto_heal() -> bool {
    true
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_monitor_interval_secs(),
            auto_close_on_crisis: default_auto_close_on_crisis(),
            execute_closures: false,
            auto_heal: default_auto_heal(),
        }
    }
}

/// Top-level configuration (`config/default.toml`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Directory holding the lock, halt marker, logs and snapshots.
    #[serde(default = "default_state_dir")]
    pub state_dir: PathBuf,
    #[serde(default)]
    pub thresholds: RiskThresholds,
    #[serde(default)]
    pub checklist: ChecklistConfig,
    #[serde(default)]
    pub lock: LockConfig,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub auto_close: AutoCloseConfig,
    #[serde(default)]
    pub health: HealthConfig,
    #[serde(default)]
    pub gate: GateThresholds,
    #[serde(default)]
    pub monitor: MonitorConfig,
}

fn default_state_dir() -> PathBuf {
    PathBuf::from("./state")
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            thresholds: RiskThresholds::default(),
            checklist: ChecklistConfig::default(),
            lock: LockConfig::default(),
            breaker: BreakerConfig::default(),
            retry: RetryConfig::default(),
            auto_close: AutoCloseConfig::default(),
            health: HealthConfig::default(),
            gate: GateThresholds::default(),
            monitor: MonitorConfig::default(),
        }
    }
}

impl AppConfig {
    /// Resolve and load: `--config` > `OPTGUARD_CONFIG` > `config/default.toml`
    /// > built-in defaults.
    ///
    /// An explicitly named file must exist; only the implicit default path
    /// may be absent.
    pub fn load(cli_path: Option<&str>) -> AppResult<Self> {
        let explicit = cli_path
            .map(str::to_string)
            .or_else(|| std::env::var(CONFIG_ENV).ok().filter(|p| !p.is_empty()));

        let config = match explicit {
            Some(path) => {
                info!(config_path = %path, "Loading configuration");
                Self::from_file(Path::new(&path))?
            }
            None if Path::new(DEFAULT_CONFIG_PATH).exists() => {
                info!(config_path = DEFAULT_CONFIG_PATH, "Loading configuration");
                Self::from_file(Path::new(DEFAULT_CONFIG_PATH))?
            }
            None => {
                warn!(path = DEFAULT_CONFIG_PATH, "Config file not found, using defaults");
                Self::default()
            }
        };
        config.validate()?;
        Ok(config)
    }

    /// Load from a specific file.
    pub fn from_file(path: &Path) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read {}: {e}", path.display())))?;

        toml::from_str(&content)
            .map_err(|e| AppError::Config(format!("Failed to parse {}: {e}", path.display())))
    }

    /// Reject values that would disable a guard.
    pub fn validate(&self) -> AppResult<()> {
        self.thresholds.validate()?;
        if self.checklist.min_dte > self.checklist.max_dte {
            return Err(AppError::Config(format!(
                "checklist.min_dte ({}) exceeds max_dte ({})",
                self.checklist.min_dte, self.checklist.max_dte
            )));
        }
        if self.breaker.failure_threshold == 0 || self.breaker.success_threshold == 0 {
            return Err(AppError::Config(
                "breaker thresholds must be at least 1".to_string(),
            ));
        }
        if self.retry.max_attempts == 0 {
            return Err(AppError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.monitor.interval_secs == 0 {
            return Err(AppError::Config("monitor.interval_secs must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn reports_dir(&self) -> PathBuf {
        self.state_dir.join("reports")
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.state_dir.join("positions.json")
    }

    pub fn history_path(&self) -> PathBuf {
        self.state_dir.join("fills.json")
    }

    pub fn metrics_path(&self) -> PathBuf {
        self.state_dir.join("metrics.prom")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.thresholds.max_positions, 4);
        assert!(!config.monitor.execute_closures);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("optguard.toml");
        std::fs::write(
            &path,
            r#"
state_dir = "/var/lib/optguard"

[thresholds]
max_positions = 6
crisis_loss_pct = "0.20"

[monitor]
interval_secs = 15
"#,
        )
        .unwrap();

        let config = AppConfig::from_file(&path).unwrap();
        assert_eq!(config.state_dir, PathBuf::from("/var/lib/optguard"));
        assert_eq!(config.thresholds.max_positions, 6);
        assert_eq!(config.thresholds.crisis_loss_pct, dec!(0.20));
        assert_eq!(config.thresholds.single_position_loss_pct, dec!(0.50));
        assert_eq!(config.monitor.interval_secs, 15);
        assert!(config.monitor.auto_close_on_crisis);
        assert_eq!(config.lock.timeout_secs, 30);
    }

    #[test]
    fn test_explicit_missing_file_is_an_error() {
        let result = AppConfig::load(Some("/definitely/not/here.toml"));
        assert!(matches!(result, Err(AppError::Config(_))));
    }

    #[test]
    fn test_invalid_thresholds_rejected() {
        let mut config = AppConfig::default();
        config.thresholds.max_positions = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.checklist.min_dte = 90;
        assert!(matches!(config.validate(), Err(AppError::Config(_))));
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        assert!(toml_str.contains("state_dir"));
        assert!(toml_str.contains("[thresholds]"));
    }
}
