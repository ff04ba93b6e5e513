//! ECL Engine CLI
//!
//! Loads a portfolio from CSV, runs every stage for one as-of date and writes
//! the resulting reporting lines.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context};
use chrono::NaiveDate;
use clap::Parser;

use ecl_engine::ecl::total_final_ecl;
use ecl_engine::{
    EclMethod, EclStore, EngineConfig, InMemoryStore, InterpolationMethod, Pipeline, PortfolioInputs,
};

/// Batch IFRS9 expected credit loss engine
#[derive(Parser)]
#[command(name = "ecl-engine", version, about = "Batch IFRS9 expected credit loss engine")]
struct Cli {
    /// Directory holding accounts.csv, stage_determination.csv and the PD structure CSVs
    #[arg(long, default_value = "data")]
    data: PathBuf,

    /// Reporting date (YYYY-MM-DD)
    #[arg(long)]
    as_of: NaiveDate,

    /// ECL method: simple_ead, cash_flow or forward_exposure
    #[arg(long)]
    method: Option<String>,

    /// PD interpolation: poisson, geometric, arithmetic or exponential_decay
    #[arg(long)]
    interpolation: Option<String>,

    /// JSON engine configuration; flags above override it
    #[arg(long)]
    config: Option<PathBuf>,

    /// Register a new run key before running
    #[arg(long)]
    new_run: bool,

    /// Write reporting lines to this CSV
    #[arg(long)]
    output: Option<PathBuf>,
}

fn load_config(cli: &Cli) -> anyhow::Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_json_path(path)
            .with_context(|| format!("reading config {}", path.display()))?,
        None => EngineConfig::default(),
    };
    if let Some(method) = &cli.method {
        config.ecl_method = EclMethod::parse(method)?;
    }
    if let Some(interpolation) = &cli.interpolation {
        config.interpolation_method = InterpolationMethod::parse(interpolation)?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    println!("ECL Engine v{}", env!("CARGO_PKG_VERSION"));
    println!("==================\n");

    let start = Instant::now();
    let inputs = PortfolioInputs::load_dir(&cli.data)
        .with_context(|| format!("loading portfolio from {}", cli.data.display()))?;
    println!(
        "Loaded {} accounts, {} stage records in {:?}",
        inputs.accounts.len(),
        inputs.stages.len(),
        start.elapsed()
    );

    let store = Arc::new(InMemoryStore::from_inputs(inputs));
    let pipeline = Pipeline::new(store.clone(), config);
    if cli.new_run {
        let run = pipeline.start_run().await?;
        println!("Registered run {}", run);
    }

    let report = pipeline.run(cli.as_of).await;

    println!("\n{:<26} {:>8} {:>10} {:>9}", "Stage", "Status", "Processed", "Failures");
    println!("{}", "-".repeat(56));
    for outcome in &report.outcomes {
        println!(
            "{:<26} {:>8} {:>10} {:>9}",
            outcome.stage,
            if outcome.succeeded { "ok" } else { "FAILED" },
            outcome.processed,
            outcome.failures.len()
        );
        for failure in outcome.failures.iter().take(5) {
            println!("    {}: {}", failure.entity_id, failure.reason);
        }
        if outcome.failures.len() > 5 {
            println!("    ... ({} more)", outcome.failures.len() - 5);
        }
    }

    if let Some(failed) = report.failed_stage() {
        bail!(
            "stage {} failed: {}",
            failed.stage,
            failed.error.as_deref().unwrap_or("unknown error")
        );
    }

    let run = ecl_engine::persistence::resolve_run_key(store.as_ref()).await?;
    let lines = store.reporting_lines(cli.as_of, run).await?;
    let total = total_final_ecl(&lines)?;
    println!(
        "\nRun {}: {} reporting lines, total ECL {:.2} ({}) in {:?}",
        run,
        lines.len(),
        total,
        pipeline.config().ecl_method.as_str(),
        start.elapsed()
    );

    if let Some(path) = &cli.output {
        let mut writer = csv::Writer::from_path(path)
            .with_context(|| format!("creating {}", path.display()))?;
        for line in &lines {
            writer.serialize(line)?;
        }
        writer.flush()?;
        println!("Reporting lines written to: {}", path.display());
    }

    Ok(())
}
