use anyhow::{Context, Result};
use clap::Parser;
use log::{error, info};
use std::fs::File;
use std::path::PathBuf;

use intervention_sim::simulation::{self, Scenario};

#[derive(Parser)]
#[command(name = "intervention_sim")]
#[command(about = "Intervention vehicle routing and traffic signal preemption")]
struct Cli {
    /// Scenario file; the built-in grid demo runs when omitted
    #[arg(long)]
    scenario: Option<PathBuf>,

    /// Apply the preemption and reset modes of this vehicle mode to every vehicle
    #[arg(long, conflicts_with = "parallel")]
    vehicle_mode: Option<usize>,

    /// Run every vehicle mode of the scenario side by side
    #[arg(long)]
    parallel: bool,

    /// Override the scenario's step limit
    #[arg(long)]
    max_steps: Option<u64>,

    /// Override the scenario's seed
    #[arg(long)]
    seed: Option<u64>,

    /// Write the route report to this file as JSON lines
    #[arg(long)]
    report: Option<PathBuf>,
}

fn main() {
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or("warn,intervention_sim=info"),
    )
    .target(env_logger::Target::Stderr)
    .init();

    if let Err(e) = run(Cli::parse()) {
        error!("Error: {:#}", e);
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut scenario = match &cli.scenario {
        Some(path) => Scenario::load(path)?,
        None => {
            info!("No scenario given, running the built-in grid demo");
            simulation::demo_scenario()
        }
    };

    if let Some(max_steps) = cli.max_steps {
        scenario.general.max_steps = max_steps;
    }
    if let Some(seed) = cli.seed {
        scenario.general.seed = seed;
    }
    if let Some(report) = cli.report {
        let report = std::env::current_dir()
            .context("Failed to resolve the working directory")?
            .join(report);
        scenario.general.report = Some(report);
    }

    // Runs append to the report, so start from an empty file
    if let Some(report) = &scenario.general.report {
        let path = scenario.base_dir.join(report);
        File::create(&path).with_context(|| format!("Failed to create report {}", path.display()))?;
    }

    if cli.parallel {
        let summaries = simulation::run_parallel(&scenario)?;
        info!("Finished {} parallel runs", summaries.len());
    } else {
        let mode = cli
            .vehicle_mode
            .map(|id| scenario.vehicle_mode(id))
            .transpose()?;
        simulation::run_scenario(&scenario, mode)?;
    }
    Ok(())
}
