//! Volseg CLI - memory-bounded 3D instance segmentation
//!
//! Segments folders of volumetric TIFF images and scores the predictions
//! against ground-truth masks.

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};
use rayon::ThreadPoolBuilder;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

mod commands;

use commands::predict::PredictCommand;
use commands::validate::ValidateCommand;

#[derive(Parser)]
#[command(
    name = "volseg",
    version,
    about = "Memory-bounded 3D instance segmentation",
    long_about = "Segment volumetric images with an ONNX network, optionally block by block\n\
                  under a memory budget, and validate predictions against ground-truth masks.",
    after_help = "EXAMPLES:\n  \
                  # Predict every .tif in a folder with the nuclei model\n  \
                  volseg predict -i images/ -m nuclei -n models/ -o predictions/\n\n  \
                  # Process blocks of 50% of each axis to bound memory\n  \
                  volseg predict -i images/ -m nuclei -r 50\n\n  \
                  # Validate against masks with matching file names\n  \
                  volseg validate -i images/ --mask-dir masks/ -m nuclei --results scores.csv"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Segment every image and write the label volumes
    Predict(PredictCommand),

    /// Segment every image and score it against its ground-truth mask
    Validate(ValidateCommand),
}

fn main() -> Result<()> {
    // Size the global pool used by the metric passes
    if let Ok(threads_str) = std::env::var(volseg_onnx::session::THREADS_ENV) {
        if let Ok(num_threads) = threads_str.parse::<usize>() {
            ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .build_global()
                .ok();
        }
    }

    let cli = Cli::parse();

    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    match cli.command {
        Commands::Predict(cmd) => cmd.execute(),
        Commands::Validate(cmd) => cmd.execute(),
    }
}
