//! Segmentation capability
//!
//! [`Segmenter`] is the boundary between the scheduler and whatever produces
//! instance labels. It has two call shapes:
//!
//! - whole volume: a normalized volume in, a label volume out
//! - blockwise: a validated [`PartitionPlan`], a per-block [`Normalizer`] and a
//!   [`StagingBuffer`] sink. The implementation iterates the blocks, predicts
//!   each one and stitches the results into the sink.
//!
//! [`InstanceSegmenter`] is the bundled implementation. It thresholds the
//! per-voxel foreground probability from a [`ForegroundModel`] and labels
//! 6-connected components. Blockwise results are stitched across seams so they
//! match whole-volume labeling up to label permutation.

use crate::components::{compact_labels, label_components, union_adjacent, LabelUnion};
use crate::error::{Error, Result};
use crate::normalize::Normalizer;
use crate::partition::PartitionPlan;
use crate::staging::StagingBuffer;
use crate::volume::{LabelVolume, Shape};
use ndarray::{Array3, ArrayView3, Zip};
use tracing::{debug, info};

pub trait Segmenter {
    /// Segment a whole, already normalized volume in one call
    fn segment_volume(&mut self, volume: ArrayView3<'_, f32>) -> Result<LabelVolume>;

    /// Segment `volume` block by block according to `plan`, writing global labels into `sink`
    fn segment_blocks(
        &mut self,
        volume: ArrayView3<'_, f32>,
        plan: &PartitionPlan,
        normalizer: &dyn Normalizer,
        sink: &mut StagingBuffer,
    ) -> Result<()>;
}

impl<S: Segmenter + ?Sized> Segmenter for Box<S> {
    fn segment_volume(&mut self, volume: ArrayView3<'_, f32>) -> Result<LabelVolume> {
        (**self).segment_volume(volume)
    }

    fn segment_blocks(
        &mut self,
        volume: ArrayView3<'_, f32>,
        plan: &PartitionPlan,
        normalizer: &dyn Normalizer,
        sink: &mut StagingBuffer,
    ) -> Result<()> {
        (**self).segment_blocks(volume, plan, normalizer, sink)
    }
}

/// Per-voxel foreground probability for a normalized block
pub trait ForegroundModel {
    fn predict(&mut self, block: ArrayView3<'_, f32>) -> Result<Array3<f32>>;
}

impl<M: ForegroundModel + ?Sized> ForegroundModel for Box<M> {
    fn predict(&mut self, block: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        (**self).predict(block)
    }
}

/// Uses the normalized intensity itself as foreground probability
#[derive(Debug, Clone, Copy, Default)]
pub struct IntensityModel;

impl ForegroundModel for IntensityModel {
    fn predict(&mut self, block: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        Ok(block.to_owned())
    }
}

/// Threshold + connected-component instance segmenter
#[derive(Debug, Clone)]
pub struct InstanceSegmenter<M> {
    model: M,
    threshold: f32,
}

impl<M: ForegroundModel> InstanceSegmenter<M> {
    pub fn new(model: M, threshold: f32) -> Self {
        Self { model, threshold }
    }

    #[must_use]
    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    fn foreground(&mut self, block: ArrayView3<'_, f32>) -> Result<Array3<bool>> {
        let probabilities = self.model.predict(block)?;
        if probabilities.dim() != block.dim() {
            return Err(Error::ShapeMismatch {
                expected: Shape::of(&block),
                actual: Shape::of(&probabilities),
            });
        }
        let threshold = self.threshold;
        Ok(probabilities.mapv(|p| p > threshold))
    }
}

impl<M: ForegroundModel> Segmenter for InstanceSegmenter<M> {
    fn segment_volume(&mut self, volume: ArrayView3<'_, f32>) -> Result<LabelVolume> {
        let mask = self.foreground(volume)?;
        let (labels, count) = label_components(mask.view());
        info!("Segmented {} instances in {}", count, Shape::of(&volume));
        Ok(labels)
    }

    fn segment_blocks(
        &mut self,
        volume: ArrayView3<'_, f32>,
        plan: &PartitionPlan,
        normalizer: &dyn Normalizer,
        sink: &mut StagingBuffer,
    ) -> Result<()> {
        let shape = Shape::of(&volume);
        if sink.shape() != shape {
            return Err(Error::ShapeMismatch {
                expected: shape,
                actual: sink.shape(),
            });
        }

        let blocks = plan.block_grid(shape);
        info!("Processing {} blocks for volume {}", blocks.len(), shape);

        let mut union = LabelUnion::new();
        let mut offset: u32 = 0;
        let mut output = sink.view_mut()?;

        for (index, block) in blocks.iter().enumerate() {
            let window = volume.slice(block.window_slice());
            let normalized = normalizer.normalize(window)?;
            let mask = self.foreground(normalized.view())?;
            // Context voxels belong to neighbouring cores and never join labels here
            let (local, count) = label_components(mask.slice(block.core_in_window()));
            let next = next_offset(offset, count)?;

            let mut core_out = output.slice_mut(block.core_slice());
            Zip::from(&mut core_out).and(&local).for_each(|global, &label| {
                if label == 0 {
                    return;
                }
                let id = offset + label as u32;
                if *global > 0 {
                    union.union(*global as u32, id);
                } else {
                    union.reserve_to(id);
                    *global = id as i32;
                }
            });

            debug!(
                "Block {}/{}: window {:?}, {} local instances",
                index + 1,
                blocks.len(),
                block.window_shape(),
                count
            );
            offset = next;
        }

        // Objects that only touch across a core seam are still one instance
        union_adjacent(output.view(), &mut union);
        let count = compact_labels(output.view_mut(), &mut union);
        info!("Stitched {} instances across {} blocks", count, blocks.len());

        Ok(())
    }
}

/// First provisional id after a block with `count` labels; ids must stay in `i32`
fn next_offset(offset: u32, count: u32) -> Result<u32> {
    offset
        .checked_add(count)
        .filter(|&next| next <= i32::MAX as u32)
        .ok_or_else(|| Error::Capability("instance ids exceed i32 range".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::PercentileNormalizer;
    use std::collections::HashMap;

    /// Normalizer that leaves intensities untouched
    struct Identity;

    impl Normalizer for Identity {
        fn normalize(&self, volume: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
            Ok(volume.to_owned())
        }
    }

    /// Bars along X in two Z groups; a slab joins the bars of the first group only
    fn blobs(shape: (usize, usize, usize)) -> Array3<f32> {
        Array3::from_shape_fn(shape, |(z, y, x)| {
            let in_bar = y % 9 < 3 && z % 7 < 4;
            let in_slab = x > 20 && x < 24 && z < 5;
            if in_bar || in_slab {
                1.0
            } else {
                0.0
            }
        })
    }

    /// True when two label volumes describe the same partition of the foreground
    fn same_partition(a: &LabelVolume, b: &LabelVolume) -> bool {
        let mut forward: HashMap<i32, i32> = HashMap::new();
        let mut backward: HashMap<i32, i32> = HashMap::new();
        a.iter().zip(b.iter()).all(|(&la, &lb)| {
            if (la == 0) != (lb == 0) {
                return false;
            }
            if la == 0 {
                return true;
            }
            *forward.entry(la).or_insert(lb) == lb && *backward.entry(lb).or_insert(la) == la
        })
    }

    #[test]
    fn test_whole_volume_labels_components() {
        let volume = blobs((14, 27, 30));
        let mut segmenter = InstanceSegmenter::new(IntensityModel, 0.5);
        let labels = segmenter.segment_volume(volume.view()).unwrap();

        assert_eq!(labels.dim(), volume.dim());
        // one slab-joined group plus three free bars
        assert_eq!(labels.iter().copied().max(), Some(4));
        assert_eq!(
            labels.iter().filter(|&&l| l > 0).count(),
            volume.iter().filter(|&&v| v > 0.5).count()
        );
    }

    #[test]
    fn test_blockwise_matches_whole_volume() {
        let volume = blobs((14, 27, 30));
        let shape = Shape::of(&volume);
        let scratch = tempfile::tempdir().unwrap();

        let mut segmenter = InstanceSegmenter::new(IntensityModel, 0.5);
        let whole = segmenter.segment_volume(volume.view()).unwrap();

        for fraction in [40.0, 60.0, 90.0] {
            let plan = PartitionPlan::for_shape(shape, fraction).unwrap();
            let mut sink = StagingBuffer::create_in(scratch.path(), shape).unwrap();
            segmenter
                .segment_blocks(volume.view(), &plan, &Identity, &mut sink)
                .unwrap();
            let blockwise = sink.into_labels().unwrap();

            assert!(
                same_partition(&whole, &blockwise),
                "blockwise labels differ at {fraction}%"
            );
        }
    }

    #[test]
    fn test_blockwise_with_percentile_normalizer() {
        let volume = blobs((10, 20, 30)).mapv(|v| v * 200.0 + 10.0);
        let shape = Shape::of(&volume);
        let scratch = tempfile::tempdir().unwrap();
        let plan = PartitionPlan::for_shape(shape, 70.0).unwrap();

        let mut segmenter = InstanceSegmenter::new(IntensityModel, 0.5);
        let mut sink = StagingBuffer::create_in(scratch.path(), shape).unwrap();
        segmenter
            .segment_blocks(
                volume.view(),
                &plan,
                &PercentileNormalizer::new(0.0, 100.0),
                &mut sink,
            )
            .unwrap();
        let labels = sink.into_labels().unwrap();

        assert_eq!(labels.dim(), volume.dim());
        assert!(labels.iter().any(|&l| l > 0));
    }

    /// Uniform noise from a fixed-seed LCG
    fn noise(shape: (usize, usize, usize), seed: u64) -> Array3<f32> {
        let mut state = seed;
        Array3::from_shape_simple_fn(shape, || {
            state = state
                .wrapping_mul(6_364_136_223_846_793_005)
                .wrapping_add(1_442_695_040_888_963_407);
            (state >> 40) as f32 / (1u64 << 24) as f32
        })
    }

    #[test]
    fn test_blockwise_labels_are_connected_under_per_block_normalization() {
        let shape = Shape::new(12, 20, 30);
        let plan = PartitionPlan::for_shape(shape, 60.0).unwrap();
        let normalizer = PercentileNormalizer::new(1.0, 99.8);
        let scratch = tempfile::tempdir().unwrap();
        let mut segmenter = InstanceSegmenter::new(IntensityModel, 0.5);

        for seed in 0..40 {
            let volume = noise(shape.as_tuple(), seed);
            let mut sink = StagingBuffer::create_in(scratch.path(), shape).unwrap();
            segmenter
                .segment_blocks(volume.view(), &plan, &normalizer, &mut sink)
                .unwrap();
            let labels = sink.into_labels().unwrap();

            // Relabeling the stitched foreground must give back the same instances
            let (components, _) = label_components(labels.mapv(|l| l > 0).view());
            assert!(
                same_partition(&labels, &components),
                "a label spans disconnected objects for seed {seed}"
            );
        }
    }

    #[test]
    fn test_id_overflow_is_rejected_before_writing() {
        assert_eq!(next_offset(10, 5).unwrap(), 15);
        assert_eq!(next_offset(i32::MAX as u32 - 3, 3).unwrap(), i32::MAX as u32);

        let err = next_offset(i32::MAX as u32 - 3, 4).unwrap_err();
        assert_eq!(err.category(), crate::error::ErrorCategory::Capability);
        assert!(next_offset(u32::MAX, 1).is_err());
    }

    #[test]
    fn test_sink_shape_mismatch() {
        let volume = Array3::<f32>::zeros((4, 4, 4));
        let scratch = tempfile::tempdir().unwrap();
        let plan = PartitionPlan::for_shape(Shape::new(4, 4, 4), 50.0).unwrap();
        let mut sink = StagingBuffer::create_in(scratch.path(), Shape::new(4, 4, 5)).unwrap();

        let mut segmenter = InstanceSegmenter::new(IntensityModel, 0.5);
        let result = segmenter.segment_blocks(volume.view(), &plan, &Identity, &mut sink);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }
}
