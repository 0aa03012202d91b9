//! Block inference scheduling
//!
//! [`infer`] chooses between the whole-volume path (memory usage 100%) and the
//! blockwise path. The blockwise path plans the partition, stages the labels on
//! disk and reads them back once the segmenter returns.

use crate::config::InferenceConfig;
use crate::error::{Error, Result};
use crate::normalize::{Normalizer, PercentileNormalizer};
use crate::partition::PartitionPlan;
use crate::segment::Segmenter;
use crate::staging::StagingBuffer;
use crate::volume::{LabelVolume, Shape, Volume};
use std::time::Instant;
use tracing::info;

/// Segment `volume` under the memory budget in `config`
///
/// The returned label volume always has the shape of `volume`. When a staging
/// buffer is used it no longer exists once this function returns, whether it
/// succeeded or not.
pub fn infer<S>(volume: Volume, config: &InferenceConfig, segmenter: &mut S) -> Result<LabelVolume>
where
    S: Segmenter + ?Sized,
{
    config.validate()?;

    let shape = Shape::of(&volume);
    if !shape.is_positive() {
        return Err(Error::Codec(format!("volume has an empty axis: {shape}")));
    }

    let normalizer = PercentileNormalizer::new(config.lower_percentile, config.upper_percentile);
    let start = Instant::now();

    let labels = if config.is_whole_volume() {
        info!("Using the whole memory without tiles {}", shape);
        let normalized = normalizer.normalize(volume.view())?;
        drop(volume);
        segmenter.segment_volume(normalized.view())?
    } else {
        infer_blockwise(volume, config, &normalizer, segmenter)?
    };

    let actual = Shape::of(&labels);
    if actual != shape {
        return Err(Error::ShapeMismatch {
            expected: shape,
            actual,
        });
    }

    info!(
        "Inference for {} finished in {:.2}s",
        shape,
        start.elapsed().as_secs_f64()
    );
    Ok(labels)
}

fn infer_blockwise<S>(
    volume: Volume,
    config: &InferenceConfig,
    normalizer: &dyn Normalizer,
    segmenter: &mut S,
) -> Result<LabelVolume>
where
    S: Segmenter + ?Sized,
{
    let shape = Shape::of(&volume);
    info!(
        "Computing with memory reduction usage {}% of original size",
        config.memory_usage
    );

    let plan = PartitionPlan::for_shape(shape, config.memory_usage)?;
    info!(
        "min_overlap = {:?} context = {:?}, block_size = {:?}, size = {}",
        plan.min_overlap(),
        plan.context(),
        plan.block_size(),
        shape
    );

    let mut staging = match &config.staging_dir {
        Some(dir) => StagingBuffer::create_in(dir, shape)?,
        None => StagingBuffer::create(shape)?,
    };

    segmenter.segment_blocks(volume.view(), &plan, normalizer, &mut staging)?;
    drop(volume);

    staging.into_labels()
}
