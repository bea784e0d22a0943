//! Binary entry point for the casita batch pipeline.
#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use casita::cli::import_export;
use casita::logging::init_logging;
use casita::model::{normalize_address, PhaseId};
use casita::phases::RunMode;
use casita::{Pipeline, PipelineConfig, PipelineError, Result};

#[derive(Parser, Debug)]
#[command(
    name = "casita",
    version,
    about = "Residential property analysis pipeline",
    disable_help_subcommand = true
)]
struct Cli {
    /// Analyze a single property by address (must appear in the roster)
    address: Option<String>,

    /// Process every property in the roster
    #[arg(long, conflicts_with = "address")]
    all: bool,

    /// Process only the first five roster properties
    #[arg(long, conflicts_with_all = ["address", "all"])]
    test: bool,

    /// Abort a property on any failure and omit failed rows from the
    /// ranked CSV
    #[arg(long)]
    strict: bool,

    /// Skip a phase by id, repeatable (e.g. --skip-phase P1_map)
    #[arg(long = "skip-phase", value_name = "PHASE")]
    skip_phase: Vec<String>,

    /// Resume from existing checkpoints (the default)
    #[arg(long, conflicts_with = "fresh")]
    resume: bool,

    /// Clear phase checkpoints before running
    #[arg(long)]
    fresh: bool,

    /// Properties roster CSV
    #[arg(long, value_name = "FILE", default_value = "properties.csv")]
    csv: PathBuf,

    /// Config file (default: <config dir>/casita/config.toml)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "casita=debug"
    #[arg(long, default_value = "info")]
    log: String,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the cross-layer contract checks against existing state
    Validate,
}

fn main() {
    process::exit(run());
}

fn run() -> i32 {
    let cli = Cli::parse();
    if let Err(err) = init_logging(&cli.log) {
        eprintln!("error: {err}");
        return 1;
    }
    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            eprintln!("error: failed to start runtime: {err}");
            return 1;
        }
    };
    match runtime.block_on(drive(cli)) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("error: {err}");
            err.exit_code()
        }
    }
}

async fn drive(cli: Cli) -> Result<i32> {
    let config = PipelineConfig::load(cli.config.as_deref())?;
    tracing::debug!(resume = cli.resume, fresh = cli.fresh, "checkpoint handling");
    if cli.fresh {
        Pipeline::clear_checkpoints(&config)?;
    }
    let pipeline = Arc::new(Pipeline::open(config)?);

    if let Some(Command::Validate) = cli.command {
        return validate(&pipeline);
    }

    let roster = import_export::read_properties(&cli.csv)?;
    let selected: Vec<_> = if let Some(address) = &cli.address {
        let wanted = normalize_address(address);
        roster
            .into_iter()
            .filter(|p| p.full_address == wanted)
            .collect()
    } else if cli.test {
        roster.into_iter().take(5).collect()
    } else if cli.all {
        roster
    } else {
        return Err(PipelineError::InvalidArgument(
            "pass an address, --all, or --test".to_string(),
        ));
    };
    if selected.is_empty() {
        return Err(PipelineError::InvalidArgument(
            "no matching properties in the roster".to_string(),
        ));
    }

    let mut skip = Vec::new();
    for name in &cli.skip_phase {
        skip.push(PhaseId::parse(name).ok_or_else(|| {
            PipelineError::InvalidArgument(format!("unknown phase {name:?}"))
        })?);
    }
    let mode = if cli.strict { RunMode::Strict } else { RunMode::Lenient };

    {
        let pipeline = Arc::clone(&pipeline);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("interrupt received, stopping at next checkpoint...");
                pipeline.cancel();
            }
        });
    }

    let progress = (selected.len() > 1).then(|| {
        let bar = ProgressBar::new(selected.len() as u64);
        if let Ok(style) =
            ProgressStyle::with_template("[{elapsed_precise}] {bar:40} {pos}/{len}")
        {
            bar.set_style(style);
        }
        bar
    });

    let summary = pipeline
        .run_batch(selected.clone(), mode, skip, progress)
        .await?;
    let entries = pipeline.ranked_entries(&selected, cli.strict);
    let ranked_path = pipeline.write_ranked_csv(&entries)?;
    pipeline.export_run_outputs()?;

    println!();
    println!(
        "Batch complete: {} attempted, {} completed, {} failed, {} locked, {} cancelled",
        summary.attempted,
        summary.completed,
        summary.failed,
        summary.skipped_locked,
        summary.cancelled
    );
    if !summary.tiers.is_empty() {
        println!("Tier distribution:");
        for (tier, count) in &summary.tiers {
            println!("  {tier:<10} {count}");
        }
    }
    println!("Ranked CSV: {} ({} rows)", ranked_path.display(), entries.len());

    Ok(if cli.strict && summary.failed > 0 { 1 } else { 0 })
}

fn validate(pipeline: &Pipeline) -> Result<i32> {
    let report = pipeline.validate()?;
    println!("records checked: {}", report.records_checked);
    println!(
        "round trip:      {}",
        if report.round_trip_ok { "ok" } else { "FAILED" }
    );
    for (address, gaps) in &report.provenance_gaps {
        println!("missing provenance on {address}: {}", gaps.join(", "));
    }
    Ok(if report.is_clean() { 0 } else { 1 })
}
