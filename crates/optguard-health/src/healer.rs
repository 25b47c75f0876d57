//! SelfHealer: check runner and remediation registry.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::error::{HealthError, HealthResult};

/// Check outcome, ordered by severity:
/// `Healthy < Healed < Degraded < Unhealthy`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HealthStatus {
    Healthy,
    Healed,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "HEALTHY",
            Self::Healed => "HEALED",
            Self::Degraded => "DEGRADED",
            Self::Unhealthy => "UNHEALTHY",
        }
    }

    /// Healthy or healed.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Healthy | Self::Healed)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthCheckResult {
    pub name: String,
    pub status: HealthStatus,
    pub message: String,
    pub auto_fixed: bool,
}

impl HealthCheckResult {
    pub fn healthy(name: &str, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Healthy, message)
    }

    pub fn degraded(name: &str, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Degraded, message)
    }

    pub fn unhealthy(name: &str, message: impl Into<String>) -> Self {
        Self::with_status(name, HealthStatus::Unhealthy, message)
    }

    fn with_status(name: &str, status: HealthStatus, message: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            status,
            message: message.into(),
            auto_fixed: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthSummary {
    pub overall: HealthStatus,
    pub checks: Vec<HealthCheckResult>,
    pub checked_at: DateTime<Utc>,
}

impl HealthSummary {
    fn from_checks(checks: Vec<HealthCheckResult>) -> Self {
        let overall = checks
            .iter()
            .map(|c| c.status)
            .max()
            .unwrap_or(HealthStatus::Healthy);
        Self {
            overall,
            checks,
            checked_at: Utc::now(),
        }
    }

    pub fn get(&self, name: &str) -> Option<&HealthCheckResult> {
        self.checks.iter().find(|c| c.name == name)
    }
}

/// A check that was repaired by its remediation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealedCheck {
    pub name: String,
    pub action: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealReport {
    pub summary: HealthSummary,
    pub healed: Vec<HealedCheck>,
}

/// One independent health check.
pub trait HealthCheck: Send + Sync {
    fn name(&self) -> &str;

    fn run(&self) -> HealthCheckResult;

    /// False for checks that must only ever be resolved by an operator.
    fn remediable(&self) -> bool {
        true
    }
}

/// Auto-fix for one check. Returns a description of what was done.
pub trait Remediation: Send + Sync {
    fn apply(&self) -> HealthResult<String>;
}

/// Runs checks and, on request, their registered remediations.
#[derive(Default)]
pub struct SelfHealer {
    checks: Vec<Box<dyn HealthCheck>>,
    remediations: HashMap<String, Box<dyn Remediation>>,
}

impl SelfHealer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_check(&mut self, check: Box<dyn HealthCheck>) {
        debug!(check = check.name(), "Health check registered");
        self.checks.push(check);
    }

    /// Attach a remediation to the check called `name`.
    pub fn register_remediation(
        &mut self,
        name: &str,
        remediation: Box<dyn Remediation>,
    ) -> HealthResult<()> {
        if let Some(check) = self.checks.iter().find(|c| c.name() == name) {
            if !check.remediable() {
                return Err(HealthError::NotRemediable(name.to_string()));
            }
        }
        self.remediations.insert(name.to_string(), remediation);
        Ok(())
    }

    pub fn check_names(&self) -> Vec<&str> {
        self.checks.iter().map(|c| c.name()).collect()
    }

    pub fn run_health_checks(&self) -> HealthSummary {
        let results: Vec<HealthCheckResult> = self.checks.iter().map(|c| c.run()).collect();
        for r in results.iter().filter(|r| !r.status.is_ok()) {
            warn!(check = %r.name, status = %r.status, message = %r.message, "Health check not healthy");
        }
        HealthSummary::from_checks(results)
    }

    /// Run checks, attempt one remediation per failing check that has one,
    /// and re-run that check.
    pub fn heal(&self) -> HealReport {
        let mut healed = Vec::new();
        let mut results = Vec::with_capacity(self.checks.len());

        for check in &self.checks {
            let first = check.run();
            if first.status == HealthStatus::Healthy {
                results.push(first);
                continue;
            }

            let remediation = match self.remediations.get(check.name()) {
                Some(r) if check.remediable() => r,
                _ => {
                    warn!(
                        check = check.name(),
                        status = %first.status,
                        message = %first.message,
                        "No remediation registered, surfacing"
                    );
                    results.push(first);
                    continue;
                }
            };

            match remediation.apply() {
                Ok(action) => {
                    let after = check.run();
                    if after.status == HealthStatus::Healthy {
                        warn!(check = check.name(), %action, "Remediation applied");
                        healed.push(HealedCheck {
                            name: check.name().to_string(),
                            action: action.clone(),
                        });
                        results.push(HealthCheckResult {
                            name: check.name().to_string(),
                            status: HealthStatus::Healed,
                            message: action,
                            auto_fixed: true,
                        });
                    } else {
                        let err = HealthError::HealCheckFailure {
                            check: check.name().to_string(),
                            reason: after.message.clone(),
                        };
                        error!(%err, "Remediation did not resolve check");
                        results.push(HealthCheckResult {
                            message: format!("{} (after remediation: {action})", after.message),
                            ..after
                        });
                    }
                }
                Err(e) => {
                    error!(check = check.name(), %e, "Remediation failed");
                    results.push(HealthCheckResult {
                        message: format!("{} (remediation failed: {e})", first.message),
                        ..first
                    });
                }
            }
        }

        let summary = HealthSummary::from_checks(results);
        info!(
            overall = %summary.overall,
            healed = healed.len(),
            "Self-heal pass complete"
        );
        HealReport { summary, healed }
    }
}
