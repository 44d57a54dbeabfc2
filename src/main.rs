use anyhow::Context;
use clap::{ArgAction, Parser};
use crabcount_core::Roster;
use crabcount_cv::{CrabDetector, DetectionConfig, DetectionMode, ReferenceLibrary};
use env_logger::{Builder, Env};
use log::{error, info, warn, LevelFilter};
use std::path::PathBuf;
use std::sync::Arc;

mod batch;

use batch::BatchOptions;

#[derive(Parser)]
#[command(name = "crabcount")]
#[command(about = "Count target crabs photographed on a reference board")]
struct Cli {
    /// Directory holding the three reference photos
    #[arg(long)]
    references: PathBuf,

    /// Directory of images to process
    #[arg(long)]
    samples: PathBuf,

    /// Directory for annotated images and reports
    #[arg(long)]
    out: PathBuf,

    /// Species manifest replacing the built-in roster
    #[arg(long)]
    roster: Option<PathBuf>,

    /// JSON detection config; missing fields take defaults
    #[arg(long)]
    config: Option<PathBuf>,

    /// board, features or auto
    #[arg(long)]
    mode: Option<DetectionMode>,

    /// Also write <stem>_detections.json
    #[arg(long)]
    json: bool,

    /// Print match scores next to boxes
    #[arg(long)]
    show_scores: bool,

    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,

    #[arg(short, long, action = ArgAction::Count, conflicts_with = "verbose")]
    quiet: u8,
}

fn init_logging(verbose: u8, quiet: u8) {
    // RUST_LOG wins unless -v/-q was given
    let mut logger = if verbose == 0 && quiet == 0 {
        Builder::from_env(Env::default().default_filter_or("info"))
    } else {
        let level = match (verbose, quiet) {
            (0, 1) => LevelFilter::Warn,
            (0, _) => LevelFilter::Error,
            (1, _) => LevelFilter::Debug,
            _ => LevelFilter::Trace,
        };
        let mut b = Builder::new();
        b.filter_level(level);
        b
    };
    logger.init();
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let roster = match &cli.roster {
        Some(path) => Roster::load(path)?,
        None => Roster::default(),
    };

    let mut config = match &cli.config {
        Some(path) => {
            DetectionConfig::from_json_file(path)
                .with_context(|| format!("Failed to load config {:?}", path))?
        }
        None => DetectionConfig::default(),
    };
    if let Some(mode) = cli.mode {
        config.mode = mode;
    }
    if cli.show_scores {
        config.visualization.show_scores = true;
    }

    let library = ReferenceLibrary::load(&cli.references, &roster, &config.features)
        .context("Failed to load reference library")?;
    info!("Mode: {} | references: {:?}", config.mode, cli.references);
    let detector = CrabDetector::new(config, Arc::new(library))?;

    let images = batch::discover_images(&cli.samples)?;
    if images.is_empty() {
        warn!("No supported images found in {:?}", cli.samples);
    }
    std::fs::create_dir_all(&cli.out)
        .with_context(|| format!("Failed to create output directory {:?}", cli.out))?;

    let options = BatchOptions {
        out_dir: cli.out.clone(),
        write_json: cli.json,
    };
    let summary = batch::run_batch(&detector, &images, &options);

    println!(
        "Processed {} image(s), {} failed, {} green crab(s) in total",
        summary.processed, summary.failed, summary.total_targets
    );
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);

    if let Err(e) = run(cli) {
        error!("{e:#}");
        std::process::exit(1);
    }
}
