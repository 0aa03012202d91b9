//! Partition planning for memory-bounded blockwise inference
//!
//! A [`PartitionPlan`] splits a volume into blocks of `block_size` voxels per
//! axis. Adjacent blocks share `min_overlap` voxels, and each block reads an
//! extra `context` margin on every side. Per axis the plan guarantees
//!
//! ```text
//! 0 <= min_overlap + 2 * context < block_size <= size,  block_size > 0
//! ```
//!
//! so the overlap and context never consume a whole block. Plans can only be
//! built through [`PartitionPlan::for_shape`] or [`PartitionPlan::new`], which
//! validate that inequality.

use crate::config::validate_memory_fraction;
use crate::error::{Error, Result};
use crate::volume::Shape;
use ndarray::{s, Ix3, SliceInfo, SliceInfoElem};
use serde::Serialize;
use std::ops::Range;

const OVERLAP_RATIO: f64 = 0.1;
const CONTEXT_RATIO: f64 = 0.3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PartitionPlan {
    block_size: [usize; 3],
    min_overlap: [usize; 3],
    context: [usize; 3],
}

impl PartitionPlan {
    /// Derive a plan from the volume shape and a memory usage percentage
    ///
    /// `block_size = floor(memory_fraction / 100 * size)`, `min_overlap = floor(0.1 * block_size)`
    /// and `context = floor(0.3 * block_size)` on every axis.
    pub fn for_shape(shape: Shape, memory_fraction: f64) -> Result<Self> {
        validate_memory_fraction(memory_fraction)?;

        let reduction = memory_fraction / 100.0;
        let mut block_size = [0usize; 3];
        let mut min_overlap = [0usize; 3];
        let mut context = [0usize; 3];

        for axis in 0..3 {
            let block = (reduction * shape.0[axis] as f64).floor() as usize;
            block_size[axis] = block;
            min_overlap[axis] = (OVERLAP_RATIO * block as f64).floor() as usize;
            context[axis] = (CONTEXT_RATIO * block as f64).floor() as usize;
        }

        Self::new(shape, block_size, min_overlap, context)
    }

    /// Build a plan from explicit per-axis values, validating it against `shape`
    pub fn new(
        shape: Shape,
        block_size: [usize; 3],
        min_overlap: [usize; 3],
        context: [usize; 3],
    ) -> Result<Self> {
        for axis in 0..3 {
            let size = shape.0[axis];
            let margin = min_overlap[axis].checked_add(context[axis].saturating_mul(2));
            let valid = block_size[axis] > 0
                && block_size[axis] <= size
                && margin.is_some_and(|m| m < block_size[axis]);

            if !valid {
                return Err(Error::InvalidPlan {
                    axis,
                    size,
                    block_size: block_size[axis],
                    min_overlap: min_overlap[axis],
                    context: context[axis],
                });
            }
        }

        Ok(Self {
            block_size,
            min_overlap,
            context,
        })
    }

    #[must_use]
    pub fn block_size(&self) -> [usize; 3] {
        self.block_size
    }

    #[must_use]
    pub fn min_overlap(&self) -> [usize; 3] {
        self.min_overlap
    }

    #[must_use]
    pub fn context(&self) -> [usize; 3] {
        self.context
    }

    /// Distance between the core origins of neighbouring blocks
    #[must_use]
    pub fn stride(&self) -> [usize; 3] {
        let mut stride = [0usize; 3];
        for axis in 0..3 {
            stride[axis] = self.block_size[axis] - self.min_overlap[axis] - 2 * self.context[axis];
        }
        stride
    }

    /// Enumerate the block windows covering `shape`, Z-major
    #[must_use]
    pub fn block_grid(&self, shape: Shape) -> Vec<BlockWindow> {
        let per_axis: Vec<Vec<(Range<usize>, Range<usize>)>> = (0..3)
            .map(|axis| self.axis_blocks(axis, shape.0[axis]))
            .collect();

        let mut blocks =
            Vec::with_capacity(per_axis[0].len() * per_axis[1].len() * per_axis[2].len());
        for (wz, cz) in &per_axis[0] {
            for (wy, cy) in &per_axis[1] {
                for (wx, cx) in &per_axis[2] {
                    blocks.push(BlockWindow {
                        window: [wz.clone(), wy.clone(), wx.clone()],
                        core: [cz.clone(), cy.clone(), cx.clone()],
                    });
                }
            }
        }
        blocks
    }

    /// (window, core) ranges along one axis
    fn axis_blocks(&self, axis: usize, size: usize) -> Vec<(Range<usize>, Range<usize>)> {
        let stride = self.stride()[axis];
        let overlap = self.min_overlap[axis];
        let context = self.context[axis];

        let mut ranges = Vec::new();
        let mut start = 0;
        loop {
            let core_end = (start + stride + overlap).min(size);
            let window = start.saturating_sub(context)..(core_end + context).min(size);
            ranges.push((window, start..core_end));
            if core_end >= size {
                break;
            }
            start += stride;
        }
        ranges
    }
}

/// One block of a partition: the region read (window) and the region it owns (core)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockWindow {
    pub window: [Range<usize>; 3],
    pub core: [Range<usize>; 3],
}

impl BlockWindow {
    #[must_use]
    pub fn window_shape(&self) -> Shape {
        Shape(self.window.clone().map(|r| r.len()))
    }

    /// Slice selecting the window in volume coordinates
    #[must_use]
    pub fn window_slice(&self) -> SliceInfo<[SliceInfoElem; 3], Ix3, Ix3> {
        let [z, y, x] = &self.window;
        s![z.clone(), y.clone(), x.clone()]
    }

    /// Slice selecting the core in volume coordinates
    #[must_use]
    pub fn core_slice(&self) -> SliceInfo<[SliceInfoElem; 3], Ix3, Ix3> {
        let [z, y, x] = &self.core;
        s![z.clone(), y.clone(), x.clone()]
    }

    /// Slice selecting the core relative to the window origin
    #[must_use]
    pub fn core_in_window(&self) -> SliceInfo<[SliceInfoElem; 3], Ix3, Ix3> {
        let local = |axis: usize| {
            let offset = self.window[axis].start;
            (self.core[axis].start - offset)..(self.core[axis].end - offset)
        };
        s![local(0), local(1), local(2)]
    }
}
