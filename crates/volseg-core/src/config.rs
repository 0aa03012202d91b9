//! Inference configuration

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Whole-volume processing: no tiling, no staging buffer
pub const FULL_MEMORY: f64 = 100.0;

/// Configuration shared by every image of a run
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Percentage of the volume extent processed per block, in (0, 100]
    pub memory_usage: f64,
    /// Lower percentile for intensity normalization
    pub lower_percentile: f32,
    /// Upper percentile for intensity normalization
    pub upper_percentile: f32,
    /// Foreground probability cut-off used by the bundled segmenters
    pub probability_threshold: f32,
    /// Parent directory for staging buffers (system temp dir when unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staging_dir: Option<PathBuf>,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            memory_usage: FULL_MEMORY,
            lower_percentile: 1.0,
            upper_percentile: 99.8,
            probability_threshold: 0.5,
            staging_dir: None,
        }
    }
}

impl InferenceConfig {
    /// Load configuration from a YAML file; missing keys take their defaults
    pub fn from_yaml(yaml_path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(yaml_path.as_ref())?;
        let config: Self = serde_yaml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    #[must_use]
    pub fn with_memory_usage(mut self, memory_usage: f64) -> Self {
        self.memory_usage = memory_usage;
        self
    }

    #[must_use]
    pub fn with_probability_threshold(mut self, threshold: f32) -> Self {
        self.probability_threshold = threshold;
        self
    }

    #[must_use]
    pub fn with_staging_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.staging_dir = Some(dir.into());
        self
    }

    /// True when the whole volume is processed in one call
    #[must_use]
    pub fn is_whole_volume(&self) -> bool {
        self.memory_usage == FULL_MEMORY
    }

    pub fn validate(&self) -> Result<()> {
        validate_memory_fraction(self.memory_usage)?;

        if !(0.0..=100.0).contains(&self.lower_percentile)
            || !(0.0..=100.0).contains(&self.upper_percentile)
            || self.lower_percentile >= self.upper_percentile
        {
            return Err(Error::Config(format!(
                "percentiles must satisfy 0 <= lower < upper <= 100 (lower={}, upper={})",
                self.lower_percentile, self.upper_percentile
            )));
        }

        if !(0.0..=1.0).contains(&self.probability_threshold) {
            return Err(Error::Config(format!(
                "probability_threshold must be in [0, 1], got {}",
                self.probability_threshold
            )));
        }

        Ok(())
    }
}

pub(crate) fn validate_memory_fraction(memory_fraction: f64) -> Result<()> {
    if memory_fraction.is_finite() && memory_fraction > 0.0 && memory_fraction <= FULL_MEMORY {
        Ok(())
    } else {
        Err(Error::InvalidMemoryFraction(memory_fraction))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = InferenceConfig::default();
        assert_eq!(config.memory_usage, 100.0);
        assert_eq!(config.lower_percentile, 1.0);
        assert_eq!(config.upper_percentile, 99.8);
        assert!(config.is_whole_volume());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_memory_fraction_bounds() {
        for bad in [0.0, -5.0, 100.5, f64::NAN, f64::INFINITY] {
            let config = InferenceConfig::default().with_memory_usage(bad);
            assert!(
                matches!(config.validate(), Err(Error::InvalidMemoryFraction(_))),
                "{bad} should be rejected"
            );
        }
        assert!(InferenceConfig::default()
            .with_memory_usage(0.5)
            .validate()
            .is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "memory_usage: 50\nprobability_threshold: 0.4").unwrap();

        let config = InferenceConfig::from_yaml(file.path()).unwrap();
        assert_eq!(config.memory_usage, 50.0);
        assert_eq!(config.probability_threshold, 0.4);
        assert_eq!(config.upper_percentile, 99.8);
        assert!(!config.is_whole_volume());
    }

    #[test]
    fn test_from_yaml_rejects_bad_percentiles() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "lower_percentile: 99\nupper_percentile: 1").unwrap();

        let result = InferenceConfig::from_yaml(file.path());
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
