//! Percentile-based intensity normalization
//!
//! Intensities are mapped with `(x - p_low) / (p_high - p_low + eps)` where the
//! percentiles are computed over all voxels of the input (all three axes). Values
//! are not clipped, so voxels outside the percentile range map outside [0, 1].

use crate::error::{Error, Result};
use ndarray::{Array3, ArrayView3};

const EPS: f32 = 1e-20;

/// Normalization applied to a volume or block before prediction
pub trait Normalizer: Send + Sync {
    fn normalize(&self, volume: ArrayView3<'_, f32>) -> Result<Array3<f32>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PercentileNormalizer {
    pub lower: f32,
    pub upper: f32,
}

impl Default for PercentileNormalizer {
    fn default() -> Self {
        Self {
            lower: 1.0,
            upper: 99.8,
        }
    }
}

impl PercentileNormalizer {
    #[must_use]
    pub const fn new(lower: f32, upper: f32) -> Self {
        Self { lower, upper }
    }
}

impl Normalizer for PercentileNormalizer {
    fn normalize(&self, volume: ArrayView3<'_, f32>) -> Result<Array3<f32>> {
        if volume.is_empty() {
            return Err(Error::Capability(
                "cannot normalize an empty volume".to_string(),
            ));
        }

        let mut values: Vec<f32> = volume.iter().copied().collect();
        if values.iter().any(|v| v.is_nan()) {
            return Err(Error::Capability(
                "volume contains NaN intensities".to_string(),
            ));
        }

        let low = percentile(&mut values, self.lower);
        let high = percentile(&mut values, self.upper);
        let scale = high - low + EPS;

        Ok(volume.mapv(|v| (v - low) / scale))
    }
}

/// Percentile with linear interpolation between the two nearest ranks
///
/// Reorders `values` in place. `values` must be non-empty and NaN free.
fn percentile(values: &mut [f32], q: f32) -> f32 {
    let last = values.len() - 1;
    let rank = f64::from(q.clamp(0.0, 100.0)) / 100.0 * last as f64;
    let lo = rank.floor() as usize;
    let frac = (rank - lo as f64) as f32;

    let (_, &mut lo_value, above) = values.select_nth_unstable_by(lo, f32::total_cmp);
    if frac == 0.0 || above.is_empty() {
        return lo_value;
    }

    let hi_value = above.iter().copied().fold(f32::INFINITY, f32::min);
    lo_value + (hi_value - lo_value) * frac
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    #[test]
    fn test_percentile_interpolates() {
        let mut values: Vec<f32> = (0..=10).map(|v| v as f32).collect();
        assert_eq!(percentile(&mut values, 50.0), 5.0);
        assert_eq!(percentile(&mut values, 0.0), 0.0);
        assert_eq!(percentile(&mut values, 100.0), 10.0);
        assert!((percentile(&mut values, 25.0) - 2.5).abs() < 1e-6);
        assert!((percentile(&mut values, 99.8) - 9.98).abs() < 1e-4);
    }

    #[test]
    fn test_percentile_single_value() {
        let mut values = vec![3.0f32];
        assert_eq!(percentile(&mut values, 99.8), 3.0);
    }

    #[test]
    fn test_normalize_maps_range() {
        let volume = Array3::from_shape_fn((2, 5, 10), |(z, y, x)| (z * 50 + y * 10 + x) as f32);
        let normalizer = PercentileNormalizer::new(0.0, 100.0);
        let normalized = normalizer.normalize(volume.view()).unwrap();

        assert_eq!(normalized.dim(), volume.dim());
        assert!(normalized[[0, 0, 0]].abs() < 1e-6);
        assert!((normalized[[1, 4, 9]] - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_normalize_constant_volume() {
        let volume = Array3::from_elem((2, 2, 2), 7.0f32);
        let normalized = PercentileNormalizer::default()
            .normalize(volume.view())
            .unwrap();
        assert!(normalized.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_normalize_rejects_nan() {
        let mut volume = Array3::zeros((1, 2, 2));
        volume[[0, 1, 1]] = f32::NAN;
        assert!(PercentileNormalizer::default()
            .normalize(volume.view())
            .is_err());
    }
}
