//! ONNX Runtime session construction
//!
//! Sessions are built with full graph optimization and the accelerated
//! execution providers available on the host. When CoreML cannot compile the
//! model the session is rebuilt with CUDA and CPU only.

use ort::execution_providers::{
    CPUExecutionProvider, CUDAExecutionProvider, CoreMLExecutionProvider,
};
use ort::session::builder::{GraphOptimizationLevel, SessionBuilder};
use ort::session::Session;
use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tracing::{debug, warn};

/// Overrides the ONNX Runtime intra-op thread count
pub const THREADS_ENV: &str = "VOLSEG_THREADS";

#[derive(Debug, Error)]
pub enum OnnxError {
    #[error("Failed to create session builder: {0}")]
    SessionBuilder(String),

    #[error("Failed to load ONNX model from {path}: {error}")]
    ModelLoad { path: String, error: String },

    #[error("Model file not found: {0}")]
    ModelNotFound(String),

    #[error("ONNX Runtime error: {0}")]
    Ort(#[from] ort::Error),

    #[error("Invalid model output shape for block {block:?}: got {actual:?}")]
    InvalidOutputShape {
        block: (usize, usize, usize),
        actual: Vec<i64>,
    },

    #[error("Session lock poisoned")]
    LockPoisoned,
}

impl From<OnnxError> for volseg_core::Error {
    fn from(err: OnnxError) -> Self {
        volseg_core::Error::Capability(err.to_string())
    }
}

/// Thread count from `VOLSEG_THREADS`, falling back to the physical core count
#[must_use]
pub fn thread_count() -> usize {
    std::env::var(THREADS_ENV)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or_else(num_cpus::get_physical)
}

fn builder(num_threads: usize) -> Result<SessionBuilder, OnnxError> {
    Session::builder()
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_optimization_level(GraphOptimizationLevel::Level3)
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_intra_threads(num_threads)
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .with_memory_pattern(true)
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))
}

/// Create an optimized session for the model at `model_path`
pub fn create_session(model_path: &Path) -> Result<Session, OnnxError> {
    if !model_path.exists() {
        return Err(OnnxError::ModelNotFound(model_path.display().to_string()));
    }

    let num_threads = thread_count();
    let start = Instant::now();

    let session = builder(num_threads)?
        .with_execution_providers([
            CoreMLExecutionProvider::default().with_subgraphs(true).build(),
            CUDAExecutionProvider::default().build(),
            CPUExecutionProvider::default().build(),
        ])
        .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
        .commit_from_file(model_path);

    let session = match session {
        Ok(session) => session,
        Err(e) if e.to_string().contains("CoreML") => {
            warn!("CoreML rejected {}: {}; retrying with CUDA/CPU", model_path.display(), e);
            builder(num_threads)?
                .with_execution_providers([
                    CUDAExecutionProvider::default().build(),
                    CPUExecutionProvider::default().build(),
                ])
                .map_err(|e| OnnxError::SessionBuilder(e.to_string()))?
                .commit_from_file(model_path)
                .map_err(|e| OnnxError::ModelLoad {
                    path: model_path.display().to_string(),
                    error: e.to_string(),
                })?
        }
        Err(e) => {
            return Err(OnnxError::ModelLoad {
                path: model_path.display().to_string(),
                error: e.to_string(),
            })
        }
    };

    debug!(
        "Session for {} created in {:.3}s with {} threads",
        model_path.display(),
        start.elapsed().as_secs_f64(),
        num_threads
    );
    Ok(session)
}
