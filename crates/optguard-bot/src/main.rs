//! optguard - risk-control plane entry point.
//!
//! Every subcommand prints a structured summary on stdout and exits 0 on
//! pass, 1 on fail, so commands compose in CI and cron.

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use optguard_bot::{AppConfig, ControlPlane};
use optguard_core::TradeProposal;
use optguard_gate::{GateThresholds, MetricSummary, PromotionGate};
use optguard_health::HealthStatus;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

/// Risk-control plane for an automated options-trading bot
#[derive(Parser, Debug)]
#[command(name = "optguard", version, about, long_about = None)]
struct Cli {
    /// Configuration file path (can also be set via OPTGUARD_CONFIG env var)
    #[arg(short, long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the crisis monitor and health loop until interrupted
    Monitor {
        /// Run a single crisis pass and exit (1 if halted)
        #[arg(long)]
        once: bool,
    },
    /// Evaluate crisis conditions once; exit 1 if trading is halted
    CheckCrisis,
    /// Remove the halt marker after operator review
    ClearHalt {
        /// Why it is safe to resume trading (recorded in the backup)
        #[arg(long)]
        reason: String,
    },
    /// Halt state, lock holder, breakers and current positions
    Status,
    /// Compute forced-close recommendations (dry run unless --execute)
    AutoClose {
        #[arg(long)]
        execute: bool,
    },
    /// Run health checks; exit 1 if any check is unhealthy
    HealthCheck {
        /// Apply registered remediations
        #[arg(long)]
        heal: bool,
    },
    /// Compare live and backtest metrics against promotion thresholds
    PromotionGate {
        /// Live/paper metrics summary (JSON)
        #[arg(long)]
        live: PathBuf,
        /// Backtest metrics summary (JSON)
        #[arg(long)]
        backtest: PathBuf,
        /// Threshold overrides (JSON); defaults to the [gate] config table
        #[arg(long)]
        thresholds: Option<PathBuf>,
    },
    /// Show the trade lock holder and age
    LockStatus,
    /// Emergency override: remove the trade lock regardless of holder
    ForceReleaseLock {
        #[arg(long)]
        reason: String,
    },
    /// Evaluate a trade proposal (inline JSON or @file) against the checklist
    Checklist {
        #[arg(long)]
        proposal: String,
    },
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn exit_code(pass: bool) -> ExitCode {
    if pass {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn load_proposal(arg: &str) -> Result<TradeProposal> {
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read proposal file {path}"))?,
        None => arg.to_string(),
    };
    serde_json::from_str(&text).context("Invalid trade proposal JSON")
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    optguard_telemetry::init_logging()?;
    info!("Starting optguard v{}", env!("CARGO_PKG_VERSION"));

    let config = AppConfig::load(cli.config.as_deref())?;

    match cli.command {
        // The gate runs offline and needs no state directory.
        Command::PromotionGate {
            live,
            backtest,
            thresholds,
        } => run_gate(&config.gate, &live, &backtest, thresholds.as_deref()),
        command => run_command(ControlPlane::paper(config)?, command).await,
    }
}

fn run_gate(
    defaults: &GateThresholds,
    live: &Path,
    backtest: &Path,
    thresholds: Option<&Path>,
) -> Result<ExitCode> {
    let thresholds = match thresholds {
        Some(path) => GateThresholds::from_file(path)?,
        None => defaults.clone(),
    };
    let live = MetricSummary::from_file(live)?;
    let backtest = MetricSummary::from_file(backtest)?;
    let decision = PromotionGate::new(thresholds).evaluate_from_env(&live, &backtest);
    print!("{}", decision.render_text());
    Ok(exit_code(decision.passed))
}

async fn run_command(plane: ControlPlane, command: Command) -> Result<ExitCode> {
    let code = match command {
        Command::Monitor { once: true } | Command::CheckCrisis => {
            let pass = plane.monitor_once().await?;
            print_json(&pass)?;
            exit_code(!pass.report.halted)
        }
        Command::Monitor { once: false } => {
            let cancel = CancellationToken::new();
            let on_signal = cancel.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    on_signal.cancel();
                }
            });
            plane.run_monitor(cancel).await?;
            ExitCode::SUCCESS
        }
        Command::ClearHalt { reason } => match plane.clear_halt(&reason)? {
            Some(backup) => {
                println!("Halt cleared. Marker backed up to {}", backup.display());
                ExitCode::SUCCESS
            }
            None => {
                println!("No halt marker present.");
                ExitCode::SUCCESS
            }
        },
        Command::Status => {
            let status = plane.status().await?;
            print_json(&status)?;
            ExitCode::SUCCESS
        }
        Command::AutoClose { execute } => {
            let run = plane.auto_close(execute).await?;
            print_json(&run)?;
            if let Some(paths) = &run.report {
                info!(json = %paths.json.display(), markdown = %paths.markdown.display(), "Audit report written");
            }
            exit_code(!run.has_failures() && run.report_error.is_none())
        }
        Command::HealthCheck { heal } => {
            let summary = if heal {
                let report = plane.healer().heal();
                for healed in &report.healed {
                    warn!(check = %healed.name, action = %healed.action, "Auto-fixed");
                }
                report.summary
            } else {
                plane.healer().run_health_checks()
            };
            print_json(&summary)?;
            exit_code(summary.overall != HealthStatus::Unhealthy)
        }
        Command::LockStatus => {
            print_json(&plane.lock_status()?)?;
            ExitCode::SUCCESS
        }
        Command::ForceReleaseLock { reason } => {
            plane.force_release_lock(&reason)?;
            println!("Trade lock released.");
            ExitCode::SUCCESS
        }
        Command::Checklist { proposal } => {
            let proposal = load_proposal(&proposal)?;
            let result = plane.evaluate_checklist(&proposal);
            print_json(&result)?;
            exit_code(result.passed)
        }
        Command::PromotionGate {
            live,
            backtest,
            thresholds,
        } => run_gate(&plane.config().gate, &live, &backtest, thresholds.as_deref())?,
    };
    Ok(code)
}
