//! geosim: deterministic simulator for a profile/proximity server network
//!
//! Parses a scenario file, spins up the child servers it declares, wires
//! them through embedded LOC servers, seeds identities and activities over
//! the real client protocols, and verifies every test query against the
//! ground-truth model. Exits non-zero on the first failed command.

use anyhow::{Context, Result};
use clap::Parser;
use geosim_engine::Simulation;
use geosim_scenario::parse_scenario;
use geosim_supervisor::SimPaths;
use std::path::PathBuf;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "geosim")]
#[command(about = "Deterministic P2P social/location network simulator", long_about = None)]
struct Cli {
    /// Scenario file to execute
    scenario: PathBuf,

    /// Working directory holding bin/, images/, instances/ and snapshots/
    #[arg(long, default_value = ".")]
    work_dir: PathBuf,

    /// RNG seed for reproducible runs (random when omitted)
    #[arg(long)]
    seed: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Enable JSON logging
    #[arg(long)]
    json_logs: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = cli
        .log_level
        .parse::<Level>()
        .context("invalid log level")?;
    if cli.json_logs {
        let subscriber = FmtSubscriber::builder()
            .with_max_level(level)
            .json()
            .finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }

    let text = std::fs::read_to_string(&cli.scenario)
        .with_context(|| format!("cannot read scenario {}", cli.scenario.display()))?;
    let commands = parse_scenario(&text).context("scenario parse failed")?;
    info!(
        scenario = %cli.scenario.display(),
        commands = commands.len(),
        "scenario parsed"
    );

    let mut simulation = Simulation::new(SimPaths::new(&cli.work_dir), cli.seed);
    let outcome = simulation.run(&commands).await;
    simulation.shutdown().await;

    match outcome {
        Ok(summary) => {
            info!(
                commands = summary.commands_executed,
                skipped_queries = summary.queries_skipped,
                "scenario passed"
            );
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "scenario failed");
            Err(e.into())
        }
    }
}
