use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;

use rangeland::{
    raster::DirectoryRasterStore,
    runner::{RayonRunner, SequentialRunner, TaskRunner},
    scenario::{Scenario, ScenarioLoader},
};

#[derive(Debug, Parser)]
#[command(author, version, about = "Monthly rangeland forage and grazing simulation")]
struct Cli {
    /// Path to the scenario YAML file
    #[arg(long, default_value = "scenarios/single_pixel.yaml")]
    scenario: PathBuf,

    /// Override the number of months simulated from the scenario start
    #[arg(long)]
    months: Option<u32>,

    /// Directory receiving input, output and state bands
    #[arg(long, default_value = "output")]
    output_dir: PathBuf,

    /// Fixed worker thread count (defaults to one per core)
    #[arg(long)]
    threads: Option<usize>,

    /// Process chunks on the calling thread
    #[arg(long)]
    sequential: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let cli = Cli::parse();
    let loader = ScenarioLoader::new(".");
    let scenario = loader.load(&cli.scenario)?.with_months(cli.months);
    let run_dir = cli.output_dir.join(&scenario.name);

    if cli.sequential {
        execute(&scenario, run_dir, SequentialRunner)
    } else {
        let runner = match cli.threads {
            Some(threads) => RayonRunner::with_threads(threads)
                .with_context(|| format!("Failed to build a pool of {threads} threads"))?,
            None => RayonRunner::new(),
        };
        log::info!("Running on {} worker thread(s)", runner.threads());
        execute(&scenario, run_dir, runner)
    }
}

fn execute(scenario: &Scenario, run_dir: PathBuf, runner: impl TaskRunner) -> Result<()> {
    let started = Instant::now();
    let mut store = DirectoryRasterStore::new(&run_dir)
        .with_context(|| format!("Failed to open output directory {}", run_dir.display()))?;
    scenario.seed_store(&mut store)?;

    let mut simulation = scenario.build_simulation(store, runner)?;
    let outcome = simulation.run();
    let summary = simulation.run_summary(started.elapsed().as_secs_f64() * 1_000.0);
    let summary_path = summary.write(&run_dir)?;
    outcome.with_context(|| format!("Scenario '{}' did not complete", scenario.name))?;

    println!(
        "Scenario '{}' {} after {} month(s). Summary: {}",
        scenario.name,
        summary.final_state,
        summary.months.len(),
        summary_path.display()
    );
    Ok(())
}
