//! Predict command: segment every image in a folder

use super::{report, CommonArgs};
use anyhow::{Context as _, Result};
use clap::Args;
use tracing::info;

#[derive(Args, Debug)]
pub struct PredictCommand {
    #[command(flatten)]
    common: CommonArgs,
}

impl PredictCommand {
    pub fn execute(self) -> Result<()> {
        info!("=== Volseg Predict ===");
        let images = self.common.images()?;
        let mut orchestrator = self.common.orchestrator()?;
        info!(
            "Memory usage: {}%, output: {}",
            orchestrator.config().memory_usage,
            self.common.output_dir.display()
        );

        let table = orchestrator.predict(&images).context("Prediction run failed")?;
        report(&table, self.common.format)
    }
}
