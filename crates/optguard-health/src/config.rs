//! Health check configuration (`[health]` table).

use serde::{Deserialize, Serialize};

/// Keys that must be present in a JSON state file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequiredFieldsSpec {
    /// Path relative to the state directory.
    pub file: String,
    pub fields: Vec<String>,
}

/// Maximum age of a data file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StalenessSpec {
    pub file: String,
    pub max_age_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// JSON files (relative to the state directory) that must parse.
    #[serde(default = "default_state_files")]
    pub state_files: Vec<String>,
    #[serde(default = "default_required_fields")]
    pub required_fields: Vec<RequiredFieldsSpec>,
    /// Environment variables that must be set and non-empty.
    #[serde(default)]
    pub required_env: Vec<String>,
    #[serde(default = "default_staleness")]
    pub staleness: Vec<StalenessSpec>,
    #[serde(default = "default_position_compliance")]
    pub position_compliance: bool,
    /// Interval of the health loop in the monitor (seconds).
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

fn default_state_files() -> Vec<String> {
    vec!["positions.json".to_string(), "crisis_log.json".to_string()]
}

fn default_required_fields() -> Vec<RequiredFieldsSpec> {
    vec![RequiredFieldsSpec {
        file: "positions.json".to_string(),
        fields: vec!["equity".to_string(), "positions".to_string()],
    }]
}

fn default_staleness() -> Vec<StalenessSpec> {
    vec![StalenessSpec {
        file: "positions.json".to_string(),
        max_age_secs: 900,
    }]
}

fn default_position_compliance() -> bool {
    true
}

fn default_interval_secs() -> u64 {
    300
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            state_files: default_state_files(),
            required_fields: default_required_fields(),
            required_env: Vec::new(),
            staleness: default_staleness(),
            position_compliance: default_position_compliance(),
            interval_secs: default_interval_secs(),
        }
    }
}
