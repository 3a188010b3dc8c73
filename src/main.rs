//! regdaemon CLI entry point

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{info, warn};

use regdaemon::automation::{HttpAutomation, HttpOpenProbe};
use regdaemon::cli::{Cli, Command, OutputFormat};
use regdaemon::clocksync::HttpClockSync;
use regdaemon::config::Config;
use regdaemon::daemon::Daemon;
use regdaemon::domain::RegistrationPlan;
use regdaemon::notify::LogNotifier;
use regdaemon::store::{FileCheckpointStore, MemoryStore};
use regdaemon::telemetry::{JsonlTelemetrySink, TelemetryEvent};

/// Checkpoints retained per workflow when compacting at startup
const KEEP_CHECKPOINTS_PER_WORKFLOW: usize = 50;

fn setup_logging(verbose: bool) -> Result<()> {
    let log_path = regdaemon::cli::get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    // Setup tracing subscriber - write to log file, not stdout/stderr
    let level = if verbose { tracing::Level::DEBUG } else { tracing::Level::INFO };
    let log_file = fs::File::create(&log_path).context("Failed to create log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (verbose: {})", verbose);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    match cli.command {
        Command::Run { plan_file } => cmd_run(&config, &plan_file).await,
        Command::Preflight { plan_file } => cmd_preflight(&plan_file),
        Command::Status { plan, format } => cmd_status(&config, plan.as_deref(), format).await,
    }
}

/// Load one plan or a list of plans from a YAML file
fn load_plans(plan_file: &PathBuf) -> Result<Vec<RegistrationPlan>> {
    let content = fs::read_to_string(plan_file)
        .context(format!("Failed to read plan file {}", plan_file.display()))?;

    // Accept either a single plan document or a list
    if let Ok(plans) = serde_yaml::from_str::<Vec<RegistrationPlan>>(&content) {
        return Ok(plans);
    }
    let plan: RegistrationPlan =
        serde_yaml::from_str(&content).context("Failed to parse plan file")?;
    Ok(vec![plan])
}

/// Validate plans without arming anything
fn cmd_preflight(plan_file: &PathBuf) -> Result<()> {
    let plans = load_plans(plan_file)?;
    let mut failed = false;

    for mut plan in plans {
        let problems = plan.preflight();
        if problems.is_empty() {
            println!("✓ {} ({} / {})", plan.id, plan.session_id, plan.user_id);
        } else {
            failed = true;
            println!("✗ {} ({} / {})", plan.id, plan.session_id, plan.user_id);
            for problem in problems {
                println!("    {}", problem);
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
    Ok(())
}

/// Arm the plans and run the daemon in the foreground
async fn cmd_run(config: &Config, plan_file: &PathBuf) -> Result<()> {
    let plans = load_plans(plan_file)?;
    if plans.is_empty() {
        return Err(eyre::eyre!("Plan file contains no plans"));
    }

    let data_dir = config.storage.data_dir.clone();
    fs::create_dir_all(&data_dir).context("Failed to create data directory")?;

    // Trim checkpoint history from earlier runs before taking new ones
    let checkpoints = FileCheckpointStore::new(&data_dir);
    match checkpoints.compact(KEEP_CHECKPOINTS_PER_WORKFLOW).await {
        Ok(removed) if removed > 0 => info!(removed, "compacted old checkpoints"),
        Ok(_) => {}
        Err(e) => warn!(error = %e, "checkpoint compaction failed"),
    }

    let (daemon, mut events_rx) = Daemon::new(
        config.clone(),
        Arc::new(HttpClockSync::new(config.probe.timeout())?),
        Arc::new(HttpOpenProbe::new(config.probe.timeout())?),
        Arc::new(HttpAutomation::new(
            config.automation.endpoint.clone(),
            config.automation.timeout(),
        )?),
        Arc::new(MemoryStore::new()),
        Arc::new(checkpoints),
        Arc::new(LogNotifier),
        Arc::new(JsonlTelemetrySink::new(&data_dir)),
    );

    for plan in plans {
        let id = daemon.register_plan(plan).await?;
        println!("Armed plan {}", id);
    }

    // Surface workflow events on stdout while the daemon runs
    let event_printer = tokio::spawn(async move {
        while let Some((key, event)) = events_rx.recv().await {
            match serde_json::to_string(&event) {
                Ok(json) => println!("[{}] {}", key, json),
                Err(e) => warn!(error = %e, "failed to render workflow event"),
            }
        }
    });

    println!("Daemon running. Press Ctrl+C to stop.");
    tokio::select! {
        result = daemon.run() => result?,
        _ = tokio::signal::ctrl_c() => {
            info!("Ctrl+C received, shutting down");
        }
    }

    event_printer.abort();
    Ok(())
}

/// Per-plan rollup of recorded telemetry
#[derive(Default)]
struct PlanRollup {
    attempts: usize,
    last_outcome: String,
    last_drift_ms: Option<i64>,
    last_latency_ms: Option<i64>,
}

/// Summarize attempts from the telemetry file
async fn cmd_status(config: &Config, plan_filter: Option<&str>, format: OutputFormat) -> Result<()> {
    let telemetry_file = config.storage.data_dir.join("telemetry.jsonl");
    if !telemetry_file.exists() {
        println!("No telemetry recorded yet at {}", telemetry_file.display());
        return Ok(());
    }

    let content = fs::read_to_string(&telemetry_file).context("Failed to read telemetry file")?;
    let mut rollups: BTreeMap<String, PlanRollup> = BTreeMap::new();

    for line in content.lines().filter(|l| !l.trim().is_empty()) {
        let event: TelemetryEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "skipping corrupt telemetry line");
                continue;
            }
        };
        if plan_filter.is_some_and(|p| p != event.plan_id) {
            continue;
        }
        let rollup = rollups.entry(event.plan_id.clone()).or_default();
        rollup.attempts += 1;
        rollup.last_outcome = event.outcome;
        rollup.last_drift_ms = event.drift_ms;
        rollup.last_latency_ms = event.latency_ms;
    }

    match format {
        OutputFormat::Json => {
            let json: Vec<_> = rollups
                .iter()
                .map(|(plan_id, r)| {
                    serde_json::json!({
                        "plan-id": plan_id,
                        "attempts": r.attempts,
                        "last-outcome": r.last_outcome,
                        "last-drift-ms": r.last_drift_ms,
                        "last-latency-ms": r.last_latency_ms,
                    })
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&json)?);
        }
        OutputFormat::Text => {
            if rollups.is_empty() {
                println!("No matching attempts recorded.");
                return Ok(());
            }
            println!("Plan attempts");
            println!("-------------");
            for (plan_id, r) in &rollups {
                println!("{}", plan_id);
                println!("  Attempts:     {}", r.attempts);
                println!("  Last outcome: {}", r.last_outcome);
                if let Some(drift) = r.last_drift_ms {
                    println!("  Last drift:   {} ms", drift);
                }
                if let Some(latency) = r.last_latency_ms {
                    println!("  Last latency: {} ms", latency);
                }
            }
        }
    }

    Ok(())
}
