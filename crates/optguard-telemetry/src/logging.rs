//! Structured logging initialization.

use crate::error::{TelemetryError, TelemetryResult};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Workspace crates logged at debug by default, `optguard` being the
/// binary. Targets are crate names with underscores, so each is listed.
const DEBUG_TARGETS: &[&str] = &[
    "optguard",
    "optguard_bot",
    "optguard_core",
    "optguard_gate",
    "optguard_health",
    "optguard_lock",
    "optguard_persistence",
    "optguard_position",
    "optguard_resilience",
    "optguard_risk",
    "optguard_telemetry",
];

/// Filter used when `RUST_LOG` is unset.
pub fn default_filter() -> String {
    let mut directives = vec!["info".to_string()];
    directives.extend(DEBUG_TARGETS.iter().map(|t| format!("{t}=debug")));
    directives.join(",")
}

/// Initialize structured logging.
///
/// `RUST_LOG` overrides the default filter. `RUST_ENV=production` selects
/// JSON output, anything else the pretty development format. Logs go to
/// stderr so CLI summaries on stdout stay machine-readable.
pub fn init_logging() -> TelemetryResult<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter()));

    let is_production = std::env::var("RUST_ENV")
        .map(|v| v == "production")
        .unwrap_or(false);

    let result = if is_production {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_current_span(true)
                    .with_span_list(true),
            )
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .pretty()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_thread_names(true),
            )
            .try_init()
    };

    result.map_err(|e| TelemetryError::LoggingInit(e.to_string()))
}
