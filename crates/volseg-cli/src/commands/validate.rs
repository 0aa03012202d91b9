//! Validate command: segment every image and score it against its mask

use super::{collect_files, report, CommonArgs};
use anyhow::{Context as _, Result};
use clap::Args;
use std::path::PathBuf;
use tracing::info;

#[derive(Args, Debug)]
pub struct ValidateCommand {
    #[command(flatten)]
    common: CommonArgs,

    /// Folder of ground-truth masks, named like their images
    #[arg(long)]
    mask_dir: PathBuf,

    /// CSV file for the scores [default: <output-dir>/scores.csv]
    #[arg(long)]
    results: Option<PathBuf>,
}

impl ValidateCommand {
    pub fn execute(self) -> Result<()> {
        info!("=== Volseg Validate ===");
        let images = self.common.images()?;
        let masks = collect_files(&self.mask_dir, &self.common.ext)?;
        if masks.is_empty() {
            anyhow::bail!("No masks found in {}", self.mask_dir.display());
        }
        info!("Found {} masks", masks.len());

        let mut orchestrator = self.common.orchestrator()?;
        let table = orchestrator
            .validate(&images, &masks)
            .context("Validation run failed")?;

        let results = self
            .results
            .clone()
            .unwrap_or_else(|| self.common.output_dir.join("scores.csv"));
        table
            .write_csv_file(&results)
            .with_context(|| format!("Failed to write {}", results.display()))?;
        info!("Scores written to {}", results.display());

        report(&table, self.common.format)
    }
}
