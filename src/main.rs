//! Reserve Engine CLI
//!
//! Runs a JSON scenario: reads sheets and text tables into the registry,
//! builds policy, expense and output tables, and dumps each one to the
//! diagnostics directory.

use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use log::error;

use reserve_engine::config::default_workers;
use reserve_engine::tables::names;
use reserve_engine::{ExecutionMode, PipelineConfig, Scenario, ScenarioRunner};

#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Scenario file; relative paths inside it resolve against its directory
    #[arg(long, default_value = "scenario.json")]
    scenario: PathBuf,

    /// Ingestion worker threads (defaults to available parallelism)
    #[arg(long)]
    workers: Option<usize>,

    /// Start in single-threaded mode
    #[arg(long)]
    single_thread: bool,

    /// Where per-table dumps are written
    #[arg(long, default_value = reserve_engine::config::DEFAULT_DIAGNOSTICS_DIR)]
    diagnostics_dir: PathBuf,

    /// Skip the per-table dumps
    #[arg(long)]
    no_print: bool,
}

fn main() {
    env_logger::init();
    let args = Args::parse();

    if let Err(e) = run(args) {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> Result<()> {
    let start = Instant::now();

    let scenario = Scenario::from_path(&args.scenario)
        .with_context(|| format!("failed to load scenario {}", args.scenario.display()))?;
    let base_dir = args
        .scenario
        .parent()
        .map(PathBuf::from)
        .unwrap_or_default();

    let config = PipelineConfig {
        mode: if args.single_thread {
            ExecutionMode::SingleThread
        } else {
            ExecutionMode::MultiThread
        },
        workers: args.workers.unwrap_or_else(default_workers),
        diagnostics_dir: args.diagnostics_dir,
        print_after_ingest: !args.no_print,
    };

    println!("Reserve Engine v{}", env!("CARGO_PKG_VERSION"));
    println!("Scenario: {}", args.scenario.display());
    println!("Mode: {:?}, workers: {}", config.mode, config.effective_workers());
    println!();

    let mut runner = ScenarioRunner::new(config)
        .context("failed to start the ingestion pool")?
        .with_base_dir(base_dir);
    let report = runner.run(&scenario).context("scenario aborted")?;

    let registry = runner.registry();
    for name in registry.names() {
        println!("  {}", name);
    }
    if let Some(outputs) = registry.context(names::INSURANCE_OUTPUT) {
        if let Ok(outputs) = outputs.read().as_outputs() {
            println!("Assembled {} policy outputs", outputs.len());
        }
    }
    println!(
        "Completed {} commands ({} aborted) in {:?}",
        report.commands,
        report.failed,
        start.elapsed()
    );
    Ok(())
}
