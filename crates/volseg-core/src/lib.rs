//! Volseg Core - memory-bounded 3D instance segmentation
//!
//! This crate segments volumetric microscopy images either in one pass or block
//! by block under a memory budget. Blockwise labels are stitched into a
//! disk-backed staging buffer so the full-resolution label volume never has to
//! be assembled from in-memory tiles. Predictions can be scored against
//! ground-truth masks with voxel-level overlap metrics.
//!
//! # Example
//! ```no_run
//! use std::path::PathBuf;
//! use volseg_core::{BatchOrchestrator, InferenceConfig, InstanceSegmenter, IntensityModel, TiffCodec};
//!
//! # fn main() -> anyhow::Result<()> {
//! let config = InferenceConfig::default().with_memory_usage(50.0);
//! let segmenter = InstanceSegmenter::new(IntensityModel, config.probability_threshold);
//! let mut batch = BatchOrchestrator::new(segmenter, TiffCodec::new(), config)
//!     .with_output_dir("predictions");
//!
//! let table = batch.predict(&[PathBuf::from("images/cells.tif")])?;
//! println!("{} succeeded, {} failed", table.succeeded(), table.failed());
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod components;
pub mod config;
pub mod error;
pub mod matching;
pub mod metrics;
pub mod normalize;
pub mod partition;
pub mod results;
pub mod scheduler;
pub mod segment;
pub mod staging;
pub mod volume;
pub mod volume_io;

pub use batch::{BatchOrchestrator, RunFailure};
pub use config::{InferenceConfig, FULL_MEMORY};
pub use error::{Error, ErrorCategory, Result};
pub use matching::pair_mask;
pub use metrics::{score, ConfusionCounts, MetricsRecord};
pub use normalize::{Normalizer, PercentileNormalizer};
pub use partition::{BlockWindow, PartitionPlan};
pub use results::{ImageFailure, MetricsSummary, ResultRow, ResultsTable, RowOutcome};
pub use scheduler::infer;
pub use segment::{ForegroundModel, InstanceSegmenter, IntensityModel, Segmenter};
pub use staging::StagingBuffer;
pub use volume::{LabelVolume, Shape, Volume};
pub use volume_io::{TiffCodec, VolumeCodec};
