//! Concordia batch fusion tool.
//!
//! ```text
//! concordia [OPTIONS] IMAGE WEIGHT [IMAGE WEIGHT]... MARKER THRESHOLD OUTPUT
//! ```

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use common::SerdeFormat;
use common::log_setup::setup_logging;
use concordia::io::{ImageWriter, load_label_image};
use concordia::job::JobSpec;
use concordia::{FusionAlgorithm, Policy, RunConfig};

/// Number of finished images allowed to wait for the writer.
const WRITE_QUEUE_LIMIT: usize = 4;

/// Command-line arguments for concordia
#[derive(Parser, Debug)]
#[command(name = "concordia")]
#[command(about = "Fuse several instance segmentations guided by a marker image")]
#[command(version)]
struct Args {
    /// YAML or JSON file with `policy`, `fusion` and `simple` sections
    #[arg(long)]
    config: Option<PathBuf>,

    /// Voting policy (overrides the config file)
    #[arg(long, value_enum)]
    policy: Option<Policy>,

    /// Colliding-voxel ratio above which an object is removed
    #[arg(long)]
    collision_threshold: Option<f64>,

    /// Fraction of an object a candidate label must exceed to match
    #[arg(long)]
    min_overlap: Option<f64>,

    /// Remove objects touching the image border
    #[arg(long)]
    remove_bordering: bool,

    /// Restore unmatched and colliding objects from the raw marker
    #[arg(long)]
    marker_fallback: bool,

    /// Write the run report as JSON or YAML (by extension)
    #[arg(long)]
    report: Option<PathBuf>,

    /// Base log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Also log to daily rolling files in this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Background threads saving the output
    #[arg(
        long,
        default_value = "2",
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new().range(1..)
    )]
    writer_threads: usize,

    /// IMAGE WEIGHT [IMAGE WEIGHT]... MARKER THRESHOLD OUTPUT
    #[arg(value_name = "ARGS", allow_negative_numbers = true)]
    job: Vec<String>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    setup_logging(&args.log_level, args.log_dir.as_deref())?;

    let job = JobSpec::parse(&args.job)?;
    let config = load_config(&args)?;
    run(&args, &job, config)
}

fn load_config(args: &Args) -> Result<RunConfig> {
    let mut config = match &args.config {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config {}", path.display()))?;
            let format = SerdeFormat::from_path(path)?;
            common::deserialize(&text, format)
                .with_context(|| format!("Failed to parse config {}", path.display()))?
        }
        None => RunConfig::default(),
    };

    if let Some(policy) = args.policy {
        config.policy = policy;
    }
    if let Some(threshold) = args.collision_threshold {
        config.fusion.collision_threshold = threshold;
    }
    if let Some(min_overlap) = args.min_overlap {
        config.fusion.min_overlap = min_overlap;
    }
    config.fusion.remove_bordering |= args.remove_bordering;
    config.fusion.marker_fallback |= args.marker_fallback;

    config.validate()?;
    Ok(config)
}

fn run(args: &Args, job: &JobSpec, config: RunConfig) -> Result<()> {
    tracing::info!(
        "Fusing {} candidates with policy {} into {}",
        job.candidates.len(),
        config.policy,
        job.output.display()
    );

    let marker = load_label_image(&job.marker)?;
    let candidates = job
        .candidates
        .iter()
        .map(|candidate| load_label_image(&candidate.path))
        .collect::<Result<Vec<_>, _>>()?;

    let algorithm =
        FusionAlgorithm::<u16, u16>::for_policy(config.policy, config.fusion, config.simple)?;
    let views: Vec<_> = candidates.iter().map(|c| c.view()).collect();
    let result = algorithm
        .fuse(&views, &job.weights(), marker.view(), job.threshold)
        .context("Fusion failed")?;

    let writer = ImageWriter::new(args.writer_threads, WRITE_QUEUE_LIMIT)?;
    writer.write(job.output.clone(), result.output)?;

    if let Some(path) = &args.report {
        let format = SerdeFormat::from_path(path)?;
        let text = common::serialize(&result.report, format)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write report {}", path.display()))?;
        tracing::info!("Report written to {}", path.display());
    }

    writer
        .finish()
        .with_context(|| format!("Failed to save {}", job.output.display()))?;

    println!("{}", result.report);
    Ok(())
}
