//! Volume and label volume types
//!
//! All volumes are 3D arrays indexed (Z, Y, X).

use ndarray::{Array3, ArrayBase, Data, Ix3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Intensity volume
pub type Volume = Array3<f32>;

/// Instance label volume: 0 is background, each positive value one instance
pub type LabelVolume = Array3<i32>;

/// Per-axis extents of a volume (Z, Y, X)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape(pub [usize; 3]);

impl Shape {
    #[must_use]
    pub const fn new(z: usize, y: usize, x: usize) -> Self {
        Self([z, y, x])
    }

    /// Shape of any 3D ndarray
    #[must_use]
    pub fn of<S: Data>(array: &ArrayBase<S, Ix3>) -> Self {
        let (z, y, x) = array.dim();
        Self([z, y, x])
    }

    #[must_use]
    pub fn voxel_count(&self) -> usize {
        self.0.iter().product()
    }

    /// True when every axis has a positive extent
    #[must_use]
    pub fn is_positive(&self) -> bool {
        self.0.iter().all(|&s| s > 0)
    }

    #[must_use]
    pub fn as_tuple(&self) -> (usize, usize, usize) {
        (self.0[0], self.0[1], self.0[2])
    }
}

impl fmt::Display for Shape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.0[0], self.0[1], self.0[2])
    }
}

impl From<(usize, usize, usize)> for Shape {
    fn from((z, y, x): (usize, usize, usize)) -> Self {
        Self([z, y, x])
    }
}
