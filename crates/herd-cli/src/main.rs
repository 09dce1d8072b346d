//! Herd Forecast CLI
//!
//! The `herd` command runs dairy herd forecasts from JSON inputs.
//!
//! ## Commands
//!
//! - `validate`: Check a scenario against a roster
//! - `simulate`: Run a single realization and print snapshots and tallies
//! - `run`: Run a full Monte Carlo forecast job and write the result

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use herd_forecast::{
    init_tracing, ForecastConfig, JobId, JobManager, JobStatus, ProgressEvent, RequestContext,
    METRICS,
};
use herd_sim::{simulate, Animal, HerdRoster, Scenario, ScenarioParams};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn, Level};

#[derive(Parser)]
#[command(name = "herd")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Agent-based dairy herd forecasting", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate scenario parameters against a roster
    Validate {
        /// Scenario parameters (JSON)
        #[arg(short, long)]
        scenario: PathBuf,

        /// Herd roster (JSON object with report_date and animals, or an animal array)
        #[arg(short, long)]
        roster: PathBuf,
    },

    /// Run one realization and print its snapshots and tallies
    Simulate {
        #[arg(short, long)]
        scenario: PathBuf,

        #[arg(short, long)]
        roster: PathBuf,

        /// Seed for this realization (default: the scenario seed)
        #[arg(long)]
        seed: Option<u64>,

        /// Write the run to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Run a Monte Carlo forecast job
    Run {
        #[arg(short, long)]
        scenario: PathBuf,

        #[arg(short, long)]
        roster: PathBuf,

        /// Write the forecast result to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Stream progress events to stdout as NDJSON
        #[arg(long)]
        events: bool,

        /// Worker threads for simulation runs
        #[arg(long, env = "HERD_MC_MAX_WORKERS")]
        workers: Option<usize>,

        /// Runs dispatched per batch
        #[arg(long, env = "HERD_MC_BATCH_SIZE")]
        batch_size: Option<usize>,

        /// Recorded on the job as the requester
        #[arg(long, env = "USER")]
        requested_by: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    match cli.command {
        Commands::Validate { scenario, roster } => cmd_validate(&scenario, &roster),
        Commands::Simulate {
            scenario,
            roster,
            seed,
            output,
        } => cmd_simulate(&scenario, &roster, seed, output.as_deref()),
        Commands::Run {
            scenario,
            roster,
            output,
            events,
            workers,
            batch_size,
            requested_by,
        } => {
            let mut config = ForecastConfig::from_env();
            if let Some(workers) = workers {
                config = config.with_workers(workers);
            }
            if let Some(batch_size) = batch_size {
                config = config.with_batch_size(batch_size);
            }
            let context = RequestContext {
                requested_by,
                locale: None,
            };
            cmd_run(&scenario, &roster, config, context, events, output.as_deref()).await
        }
    }
}

fn load_roster(path: &Path) -> Result<HerdRoster> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read roster: {:?}", path))?;
    if let Ok(roster) = serde_json::from_str::<HerdRoster>(&raw) {
        return Ok(roster);
    }
    let animals: Vec<Animal> = serde_json::from_str(&raw)
        .with_context(|| format!("Roster is neither a roster object nor an animal list: {:?}", path))?;
    HerdRoster::with_inferred_report_date(animals)
        .with_context(|| format!("Cannot infer a report date from an empty roster: {:?}", path))
}

fn load_params(path: &Path) -> Result<ScenarioParams> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read scenario: {:?}", path))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid scenario parameters: {:?}", path))
}

fn load_scenario(scenario: &Path, roster: &Path) -> Result<(HerdRoster, Scenario)> {
    let roster = load_roster(roster)?;
    let params = load_params(scenario)?;
    let limits = ForecastConfig::from_env().limits;
    let scenario = Scenario::new(params, &roster, &limits).context("Scenario rejected")?;
    Ok((roster, scenario))
}

fn write_output(output: Option<&Path>, json: &str, what: &str) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, json).with_context(|| format!("Failed to write to {:?}", path))?;
            info!("Wrote {} to {:?}", what, path);
        }
        None => println!("{}", json),
    }
    Ok(())
}

/// Validate a scenario against a roster
fn cmd_validate(scenario: &Path, roster: &Path) -> Result<()> {
    let (roster, scenario) = load_scenario(scenario, roster)?;
    println!(
        "OK: {} live animals on {}, {} months, {} runs, digest {}",
        roster.live_count(),
        scenario.report_date(),
        scenario.months().len(),
        scenario.mc_runs(),
        &scenario.digest()[..12]
    );
    Ok(())
}

/// Run a single realization
fn cmd_simulate(
    scenario: &Path,
    roster: &Path,
    seed: Option<u64>,
    output: Option<&Path>,
) -> Result<()> {
    let (roster, scenario) = load_scenario(scenario, roster)?;
    let seed = seed.unwrap_or_else(|| scenario.seed());
    let run = simulate(&roster, &scenario, seed).context("Simulation failed")?;
    for warning in &run.warnings {
        warn!("{}", warning);
    }
    let json = serde_json::to_string_pretty(&run)?;
    write_output(output, &json, "simulation run")
}

/// Request cancellation, logging a refused request. Returns whether the
/// manager accepted it.
async fn cancel_job(manager: &JobManager, id: &JobId) -> bool {
    match manager.cancel(id).await {
        Ok(snapshot) => {
            debug!(job_id = %id, status = %snapshot.status, "Cancel accepted");
            true
        }
        Err(e) => {
            warn!(job_id = %id, error = %e, "Cancel request failed");
            false
        }
    }
}

/// Submit a forecast job, follow its progress and write the result
async fn cmd_run(
    scenario: &Path,
    roster: &Path,
    config: ForecastConfig,
    context: RequestContext,
    events: bool,
    output: Option<&Path>,
) -> Result<()> {
    let roster = Arc::new(load_roster(roster)?);
    let params = load_params(scenario)?;

    let manager = JobManager::new(config).context("Invalid forecast configuration")?;
    let id = manager
        .submit(roster, params, context)
        .await
        .context("Scenario rejected")?;
    info!(job_id = %id, "Forecast job submitted");

    let canceller = {
        let manager = manager.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!(job_id = %id, "Interrupted; canceling job");
                cancel_job(&manager, &id).await;
            }
        })
    };

    let mut sub = manager.subscribe(&id)?;
    while let Some(event) = sub.next().await {
        if events {
            println!("{}", serde_json::to_string(&*event)?);
            continue;
        }
        match &*event {
            ProgressEvent::Progress {
                status,
                completed_runs,
                total_runs,
                ..
            } => info!("{}: {}/{} runs", status, completed_runs, total_runs),
            ProgressEvent::Heartbeat { completed_runs, .. } => {
                debug!("still running at {} runs", completed_runs)
            }
            _ => {}
        }
    }
    canceller.abort();
    METRICS.flush();

    let snapshot = manager.status(&id)?;
    match snapshot.status {
        JobStatus::Succeeded => {
            let result = manager.result(&id)?;
            for warning in &result.meta.warnings {
                warn!("{}", warning);
            }
            let json = serde_json::to_string_pretty(&*result)?;
            write_output(output, &json, "forecast result")
        }
        JobStatus::Failed => {
            let message = snapshot
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown error".to_string());
            anyhow::bail!("Forecast job {} failed: {}", id, message)
        }
        status => anyhow::bail!("Forecast job {} ended as {}", id, status),
    }
}
