//! Batch orchestration over a folder of volumes
//!
//! Runs inference image by image in sorted path order. A failing image turns
//! into a failure row and the batch moves on. Only a run with nothing to do
//! (no images, or no masks in validation mode) or an unusable output directory
//! aborts with a [`RunFailure`].

use crate::config::InferenceConfig;
use crate::error::Result;
use crate::matching::{display_name, pair_mask};
use crate::metrics::score;
use crate::results::{ImageFailure, ResultRow, ResultsTable, RowOutcome};
use crate::scheduler::infer;
use crate::segment::Segmenter;
use crate::volume_io::VolumeCodec;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

/// Conditions that abort a whole run
#[derive(Error, Debug)]
pub enum RunFailure {
    #[error("No images found")]
    NoImages,

    #[error("No masks found")]
    NoMasks,

    #[error("Cannot create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub struct BatchOrchestrator<S, C> {
    segmenter: S,
    codec: C,
    config: InferenceConfig,
    output_dir: Option<PathBuf>,
}

impl<S: Segmenter, C: VolumeCodec> BatchOrchestrator<S, C> {
    pub fn new(segmenter: S, codec: C, config: InferenceConfig) -> Self {
        Self {
            segmenter,
            codec,
            config,
            output_dir: None,
        }
    }

    /// Write every prediction to `dir/<image file name>`
    #[must_use]
    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn config(&self) -> &InferenceConfig {
        &self.config
    }

    /// Predict every image
    pub fn predict(&mut self, images: &[PathBuf]) -> std::result::Result<ResultsTable, RunFailure> {
        self.run(images, None)
    }

    /// Predict and score every image against its mask
    pub fn validate(
        &mut self,
        images: &[PathBuf],
        masks: &[PathBuf],
    ) -> std::result::Result<ResultsTable, RunFailure> {
        self.run(images, Some(masks))
    }

    /// Process `images`; validation mode when `masks` is given
    pub fn run(
        &mut self,
        images: &[PathBuf],
        masks: Option<&[PathBuf]>,
    ) -> std::result::Result<ResultsTable, RunFailure> {
        if images.is_empty() {
            return Err(RunFailure::NoImages);
        }
        let masks = match masks {
            Some([]) => return Err(RunFailure::NoMasks),
            Some(masks) => {
                let mut sorted = masks.to_vec();
                sorted.sort();
                Some(sorted)
            }
            None => None,
        };

        if let Some(dir) = &self.output_dir {
            std::fs::create_dir_all(dir).map_err(|source| RunFailure::OutputDir {
                path: dir.clone(),
                source,
            })?;
        }

        let mut images = images.to_vec();
        images.sort();

        let total = images.len();
        let start = Instant::now();
        let mut table = ResultsTable::new();

        for (index, image) in images.iter().enumerate() {
            let name = display_name(image);
            let image_start = Instant::now();

            let outcome = match self.process(image, masks.as_deref()) {
                Ok(outcome) => {
                    info!(
                        "✓ [{}/{}] {} - {:.2}s",
                        index + 1,
                        total,
                        name,
                        image_start.elapsed().as_secs_f64()
                    );
                    outcome
                }
                Err(err) => {
                    warn!("✗ [{}/{}] {} - FAILED: {}", index + 1, total, name, err);
                    RowOutcome::Failed(ImageFailure::from(err))
                }
            };

            table.push(ResultRow {
                image: image.clone(),
                name,
                outcome,
            });
        }

        info!(
            "Processed {} images in {:.2}s ({} succeeded, {} failed)",
            total,
            start.elapsed().as_secs_f64(),
            table.succeeded(),
            table.failed()
        );
        Ok(table)
    }

    fn process(&mut self, image: &Path, masks: Option<&[PathBuf]>) -> Result<RowOutcome> {
        // Resolve the mask first so a bad pairing costs no inference
        let mask = masks.map(|masks| pair_mask(image, masks)).transpose()?;

        let volume = self.codec.read_volume(image)?;
        let prediction = infer(volume, &self.config, &mut self.segmenter)?;

        let output = match &self.output_dir {
            Some(dir) => {
                let path = dir.join(image.file_name().unwrap_or(image.as_os_str()));
                self.codec.write_labels(&path, &prediction)?;
                Some(path)
            }
            None => None,
        };

        let Some(mask) = mask else {
            return Ok(RowOutcome::Predicted { output });
        };

        let ground_truth = self.codec.read_labels(mask)?;
        let metrics = score(display_name(image), &ground_truth, &prediction)?;
        Ok(RowOutcome::Scored {
            output,
            mask: mask.to_path_buf(),
            metrics,
        })
    }
}
