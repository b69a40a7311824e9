// ─────────────────────────────────────────────────────────────────────
// Tanks MPC — CLI
// © 1998–2026 Miroslav Šotek. All rights reserved.
// Contact: www.anulum.li | protoscience@anulum.li
// ORCID: https://orcid.org/0009-0009-3560-0851
// License: GNU AGPL v3 | Commercial licensing available
// ─────────────────────────────────────────────────────────────────────
//! Run a real-time session on the terminal.
//!
//! ```text
//! tanks-cli run --duration 120 --sampling 1 --step tank_c:level:1.7@10
//! ```
//!
//! Telemetry frames go to stdout, one JSON object per line; logs go to
//! stderr (`RUST_LOG`, default `info`).

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::io::Write;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tanks_control::realtime::{
    run_session, Command, RealtimeOrchestrator, SessionConfig, SetpointCommand,
};
use tanks_types::config::PlantConfig;
use tokio::sync::mpsc;

#[derive(Parser, Debug)]
#[command(
    name = "tanks-cli",
    version,
    about = "Five-tank mixing process: real-time MPC session driver"
)]
struct Cli {
    #[command(subcommand)]
    command: CliCommand,
}

#[derive(Subcommand, Debug)]
enum CliCommand {
    /// Run a session at the configured equilibrium and stream telemetry.
    Run(RunArgs),
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Wall-clock session length in seconds
    #[arg(long, default_value_t = 60.0)]
    duration: f64,

    /// Telemetry period in seconds
    #[arg(long, default_value_t = 1.0)]
    sampling: f64,

    /// Plant configuration JSON (defaults to the built-in parameter set)
    #[arg(long)]
    config: Option<String>,

    /// Relative measurement noise level; enables noise when given
    #[arg(long)]
    noise: Option<f64>,

    /// RNG seed for reproducible noise
    #[arg(long)]
    seed: Option<u64>,

    /// Scheduled setpoint change `tank:variable:value@seconds`, repeatable
    #[arg(long = "step")]
    steps: Vec<ScheduledSetpoint>,
}

/// Setpoint command to send at a fixed offset after session start.
#[derive(Debug, Clone, PartialEq)]
struct ScheduledSetpoint {
    at: Duration,
    command: SetpointCommand,
}

impl FromStr for ScheduledSetpoint {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (spec, at) = s
            .split_once('@')
            .ok_or_else(|| format!("expected tank:variable:value@seconds, got '{s}'"))?;
        let seconds: f64 = at
            .trim()
            .parse()
            .map_err(|e| format!("bad offset '{at}': {e}"))?;
        let at = Duration::try_from_secs_f64(seconds)
            .map_err(|e| format!("bad offset '{seconds}': {e}"))?;
        let mut parts = spec.split(':');
        let (Some(tank_id), Some(variable), Some(value), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(format!("expected tank:variable:value, got '{spec}'"));
        };
        let value: f64 = value
            .trim()
            .parse()
            .map_err(|e| format!("bad value '{value}': {e}"))?;
        Ok(ScheduledSetpoint {
            at,
            command: SetpointCommand {
                tank_id: tank_id.trim().to_string(),
                variable: variable.trim().to_string(),
                value,
            },
        })
    }
}

fn load_config(path: Option<&str>) -> Result<PlantConfig> {
    match path {
        Some(p) => PlantConfig::from_file(p).with_context(|| format!("loading {p}")),
        None => Ok(PlantConfig::default()),
    }
}

async fn run(args: RunArgs) -> Result<()> {
    let duration = Duration::try_from_secs_f64(args.duration)
        .ok()
        .filter(|d| !d.is_zero())
        .with_context(|| format!("duration must be > 0, got {}", args.duration))?;
    let config = Arc::new(load_config(args.config.as_deref())?);
    let mut session = SessionConfig::canonical(&config, args.sampling);
    if let Some(level) = args.noise {
        session.enable_noise = true;
        session.noise_level = level;
        session.seed = args.seed;
    }

    let mut orchestrator = RealtimeOrchestrator::new(Arc::clone(&config))?;
    let start = tokio::time::Instant::now();
    let id = orchestrator.initialize(session, start.into_std())?;
    log::info!("session {id} running for {}s", args.duration);

    let cancel = orchestrator.cancel_handle();
    let (command_tx, command_rx) = mpsc::unbounded_channel();
    let (telemetry_tx, mut telemetry_rx) = mpsc::channel(256);
    let session_task = tokio::spawn(run_session(orchestrator, command_rx, telemetry_tx));

    let mut steps = args.steps;
    steps.sort_by_key(|s| s.at);
    let scheduler_tx = command_tx.clone();
    tokio::spawn(async move {
        for step in steps {
            tokio::time::sleep_until(start + step.at).await;
            log::info!(
                "t={:?}: setpoint {}_{} -> {}",
                step.at,
                step.command.tank_id,
                step.command.variable,
                step.command.value
            );
            if scheduler_tx.send(Command::Setpoint(step.command)).is_err() {
                break;
            }
        }
    });

    let timer_cancel = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep_until(start + duration).await;
        timer_cancel.cancel();
    });

    let stdout = std::io::stdout();
    while let Some(frame) = telemetry_rx.recv().await {
        let line = serde_json::to_string(&frame)?;
        if writeln!(stdout.lock(), "{line}").is_err() {
            log::warn!("stdout closed, stopping session");
            cancel.cancel();
            break;
        }
    }

    let orchestrator = session_task.await.context("session task failed")?;
    drop(command_tx);
    let snapshot = orchestrator.snapshot();
    log::info!(
        "session {} ended in {:?} after {:.1}s of plant time",
        snapshot.session_id.as_deref().unwrap_or("-"),
        snapshot.phase,
        orchestrator.plant().map_or(0.0, |p| p.elapsed())
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
    let cli = Cli::parse();
    match cli.command {
        CliCommand::Run(args) => run(args).await,
    }
}
