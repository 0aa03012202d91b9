//! ONNX foreground model for volseg
//!
//! Wraps a 3D segmentation network exported to ONNX as a
//! [`volseg_core::ForegroundModel`]. The network takes one normalized block as a
//! `[1, 1, Z, Y, X]` f32 tensor and returns foreground probabilities shaped
//! either `[1, 1, Z, Y, X]` or `[1, 2, Z, Y, X]` (background, foreground).
//!
//! # Example
//! ```no_run
//! use volseg_core::{InstanceSegmenter, InferenceConfig};
//! use volseg_onnx::OnnxForegroundModel;
//!
//! let model = OnnxForegroundModel::new("models/nuclei/model.onnx");
//! let segmenter = InstanceSegmenter::new(model, InferenceConfig::default().probability_threshold);
//! ```

pub mod session;

use ndarray::{Array3, ArrayView, ArrayView3, Axis};
use once_cell::sync::OnceCell;
use ort::session::Session;
use ort::value::TensorRef;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::{debug, info};
use volseg_core::ForegroundModel;

pub use session::{create_session, OnnxError};

/// Foreground network backed by ONNX Runtime
///
/// The session is created on the first prediction and reused for every block
/// after that.
pub struct OnnxForegroundModel {
    model_path: PathBuf,
    cached_session: OnceCell<Mutex<Session>>,
}

impl OnnxForegroundModel {
    /// Point at an ONNX model file; nothing is loaded until the first prediction
    pub fn new(model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_path: model_path.into(),
            cached_session: OnceCell::new(),
        }
    }

    /// `<models_dir>/<model_name>/model.onnx`
    pub fn from_models_dir(models_dir: impl AsRef<Path>, model_name: &str) -> Self {
        Self::new(models_dir.as_ref().join(model_name).join("model.onnx"))
    }

    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    fn get_or_load_session(&self) -> Result<&Mutex<Session>, OnnxError> {
        self.cached_session.get_or_try_init(|| {
            info!("Loading model from {} (first block only)", self.model_path.display());
            create_session(&self.model_path).map(Mutex::new)
        })
    }

    fn run(&self, block: ArrayView3<'_, f32>) -> Result<Array3<f32>, OnnxError> {
        let dims = block.dim();
        let input = block
            .as_standard_layout()
            .into_owned()
            .insert_axis(Axis(0))
            .insert_axis(Axis(0));

        let mut session = self
            .get_or_load_session()?
            .lock()
            .map_err(|_| OnnxError::LockPoisoned)?;

        let input_tensor = TensorRef::from_array_view(input.view())?;
        let outputs = session.run(ort::inputs![input_tensor])?;
        let (shape, data) = outputs[0].try_extract_tensor::<f32>()?;

        foreground_probabilities(shape, data, dims)
    }
}

impl ForegroundModel for OnnxForegroundModel {
    fn predict(&mut self, block: ArrayView3<'_, f32>) -> volseg_core::Result<Array3<f32>> {
        debug!("Running model on block {:?}", block.dim());
        Ok(self.run(block)?)
    }
}

/// Select the foreground channel from a `[1, C, Z, Y, X]` output with C in {1, 2}
fn foreground_probabilities(
    shape: &[i64],
    data: &[f32],
    block: (usize, usize, usize),
) -> Result<Array3<f32>, OnnxError> {
    let invalid = || OnnxError::InvalidOutputShape {
        block,
        actual: shape.to_vec(),
    };

    let dims: Vec<usize> = shape
        .iter()
        .map(|&d| usize::try_from(d).map_err(|_| invalid()))
        .collect::<Result<_, _>>()?;
    let (z, y, x) = block;
    let channels = match dims.as_slice() {
        [1, c @ (1 | 2), dz, dy, dx] if (*dz, *dy, *dx) == (z, y, x) => *c,
        _ => return Err(invalid()),
    };

    let output = ArrayView::from_shape((1, channels, z, y, x), data).map_err(|_| invalid())?;
    Ok(output
        .index_axis_move(Axis(0), 0)
        .index_axis_move(Axis(0), channels - 1)
        .to_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_model_fails_prediction() {
        let mut model = OnnxForegroundModel::from_models_dir("/nonexistent", "nuclei");
        assert_eq!(
            model.model_path(),
            Path::new("/nonexistent/nuclei/model.onnx")
        );

        let block = Array3::<f32>::zeros((2, 2, 2));
        let err = model.predict(block.view()).unwrap_err();
        assert_eq!(err.category(), volseg_core::ErrorCategory::Capability);
        assert!(err.to_string().contains("Model file not found"));
    }

    #[test]
    fn test_single_channel_output() {
        let data: Vec<f32> = (0..24).map(|v| v as f32 / 24.0).collect();
        let probs = foreground_probabilities(&[1, 1, 2, 3, 4], &data, (2, 3, 4)).unwrap();
        assert_eq!(probs.dim(), (2, 3, 4));
        assert_eq!(probs[[1, 2, 3]], 23.0 / 24.0);
    }

    #[test]
    fn test_two_channel_output_takes_foreground() {
        let mut data = vec![0.25f32; 8];
        data.extend(vec![0.75f32; 8]);
        let probs = foreground_probabilities(&[1, 2, 2, 2, 2], &data, (2, 2, 2)).unwrap();
        assert!(probs.iter().all(|&p| p == 0.75));
    }

    #[test]
    fn test_mismatched_output_is_rejected() {
        let data = vec![0.0f32; 27];
        let result = foreground_probabilities(&[1, 1, 3, 3, 3], &data, (2, 3, 3));
        assert!(matches!(result, Err(OnnxError::InvalidOutputShape { .. })));
    }

    #[test]
    #[ignore] // Requires a model at models/nuclei/model.onnx
    fn test_model_predicts_block_shape() {
        let mut model = OnnxForegroundModel::from_models_dir("models", "nuclei");
        let block = Array3::<f32>::zeros((16, 32, 32));
        let probs = model.predict(block.view()).unwrap();
        assert_eq!(probs.dim(), (16, 32, 32));
    }
}
