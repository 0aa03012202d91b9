//! Error types for the inference and validation pipeline

use crate::volume::Shape;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid memory usage: {0}% (expected a value in (0, 100])")]
    InvalidMemoryFraction(f64),

    #[error(
        "Invalid partition on axis {axis}: 0 <= min_overlap + 2 * context < block_size <= size \
         violated (min_overlap={min_overlap}, context={context}, block_size={block_size}, size={size})"
    )]
    InvalidPlan {
        axis: usize,
        size: usize,
        block_size: usize,
        min_overlap: usize,
        context: usize,
    },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: Shape, actual: Shape },

    #[error("Expected exactly one mask for {image}, found {matches}")]
    MaskMatch { image: String, matches: usize },

    #[error("Staging buffer error at {path}: {source}")]
    Staging {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Segmentation failed: {0}")]
    Capability(String),

    #[error("Volume codec error: {0}")]
    Codec(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

/// Coarse error classes recorded in the results table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Configuration,
    DataIntegrity,
    Resource,
    Capability,
    Codec,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::DataIntegrity => "data_integrity",
            ErrorCategory::Resource => "resource",
            ErrorCategory::Capability => "capability",
            ErrorCategory::Codec => "codec",
        };
        f.write_str(name)
    }
}

impl Error {
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::InvalidMemoryFraction(_)
            | Error::InvalidPlan { .. }
            | Error::Config(_)
            | Error::Yaml(_) => ErrorCategory::Configuration,
            Error::ShapeMismatch { .. } | Error::MaskMatch { .. } => ErrorCategory::DataIntegrity,
            Error::Staging { .. } => ErrorCategory::Resource,
            Error::Capability(_) => ErrorCategory::Capability,
            Error::Codec(_) | Error::Io(_) => ErrorCategory::Codec,
        }
    }
}

impl From<tiff::TiffError> for Error {
    fn from(err: tiff::TiffError) -> Self {
        Error::Codec(err.to_string())
    }
}

/// Result type for pipeline operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categories() {
        assert_eq!(
            Error::InvalidMemoryFraction(0.0).category(),
            ErrorCategory::Configuration
        );
        assert_eq!(
            Error::MaskMatch {
                image: "a.tif".to_string(),
                matches: 0
            }
            .category(),
            ErrorCategory::DataIntegrity
        );
        assert_eq!(
            Error::Capability("model missing".to_string()).category(),
            ErrorCategory::Capability
        );
    }

    #[test]
    fn test_plan_error_names_axis() {
        let err = Error::InvalidPlan {
            axis: 2,
            size: 5,
            block_size: 0,
            min_overlap: 0,
            context: 0,
        };
        let message = err.to_string();
        assert!(message.contains("axis 2"));
        assert!(message.contains("size=5"));
    }
}
