//! Subcommands and the options they share

pub mod predict;
pub mod validate;

use anyhow::{Context as _, Result};
use clap::{Args, ValueEnum};
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use volseg_core::{
    BatchOrchestrator, ForegroundModel, InferenceConfig, InstanceSegmenter, IntensityModel,
    ResultsTable, TiffCodec,
};
use volseg_onnx::OnnxForegroundModel;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// ONNX network from `<models-dir>/<model-name>/model.onnx`
    Onnx,
    /// Threshold the normalized intensity directly (no network)
    Intensity,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Jsonl,
}

pub type Orchestrator = BatchOrchestrator<InstanceSegmenter<Box<dyn ForegroundModel>>, TiffCodec>;

#[derive(Args, Debug)]
pub struct CommonArgs {
    /// Image folder, or a single image file
    #[arg(short, long)]
    pub input_dir: PathBuf,

    /// Model name (folder under --models-dir)
    #[arg(short = 'm', long)]
    pub model_name: Option<String>,

    /// Folder holding one sub-folder per model
    #[arg(short = 'n', long, default_value = "models")]
    pub models_dir: PathBuf,

    /// Folder receiving the predicted label volumes
    #[arg(short, long, default_value = "predictions")]
    pub output_dir: PathBuf,

    /// Image file extension
    #[arg(long, default_value = ".tif")]
    pub ext: String,

    /// Percentage of each axis processed per block [default: 100, whole volume]
    #[arg(short = 'r', long)]
    pub memory_usage: Option<f64>,

    /// Foreground model backend
    #[arg(long, value_enum, default_value = "onnx")]
    pub backend: Backend,

    /// Foreground probability threshold [default: 0.5]
    #[arg(long)]
    pub threshold: Option<f32>,

    /// YAML file with inference settings; flags take precedence
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Output format
    #[arg(long, value_enum, default_value = "text")]
    pub format: OutputFormat,
}

impl CommonArgs {
    pub fn inference_config(&self) -> Result<InferenceConfig> {
        let mut config = match &self.config {
            Some(path) => InferenceConfig::from_yaml(path)
                .with_context(|| format!("Failed to load config {}", path.display()))?,
            None => InferenceConfig::default(),
        };
        if let Some(memory_usage) = self.memory_usage {
            config = config.with_memory_usage(memory_usage);
        }
        if let Some(threshold) = self.threshold {
            config = config.with_probability_threshold(threshold);
        }
        config.validate().context("Invalid inference settings")?;
        Ok(config)
    }

    pub fn foreground_model(&self) -> Result<Box<dyn ForegroundModel>> {
        match self.backend {
            Backend::Intensity => Ok(Box::new(IntensityModel)),
            Backend::Onnx => {
                let Some(name) = &self.model_name else {
                    anyhow::bail!("--model-name is required with the onnx backend");
                };
                let model = OnnxForegroundModel::from_models_dir(&self.models_dir, name);
                if model.model_path().is_file() {
                    info!("Model: {}", model.model_path().display());
                } else {
                    warn!("Model file not found: {}", model.model_path().display());
                }
                Ok(Box::new(model))
            }
        }
    }

    pub fn orchestrator(&self) -> Result<Orchestrator> {
        let config = self.inference_config()?;
        let segmenter =
            InstanceSegmenter::new(self.foreground_model()?, config.probability_threshold);
        Ok(BatchOrchestrator::new(segmenter, TiffCodec::new(), config)
            .with_output_dir(&self.output_dir))
    }

    pub fn images(&self) -> Result<Vec<PathBuf>> {
        let images = collect_files(&self.input_dir, &self.ext)?;
        if images.is_empty() {
            anyhow::bail!(
                "No images found in {} matching *{}",
                self.input_dir.display(),
                normalized_ext(&self.ext)
            );
        }
        info!("Found {} images", images.len());
        Ok(images)
    }
}

fn normalized_ext(ext: &str) -> String {
    if ext.starts_with('.') {
        ext.to_string()
    } else {
        format!(".{ext}")
    }
}

/// Files in `dir` ending in `ext`, sorted; a file path is returned as-is
pub fn collect_files(dir: &Path, ext: &str) -> Result<Vec<PathBuf>> {
    if dir.is_file() {
        return Ok(vec![dir.to_path_buf()]);
    }

    let pattern = dir.join(format!("*{}", normalized_ext(ext)));
    let pattern_str = pattern.to_string_lossy();
    let matches =
        glob::glob(&pattern_str).with_context(|| format!("Invalid glob pattern: {pattern_str}"))?;

    let mut files = Vec::new();
    for entry in matches {
        let path = entry.with_context(|| "Failed to read glob entry")?;
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Print per-image results and the run summary
pub fn report(table: &ResultsTable, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Jsonl => {
            let stdout = std::io::stdout();
            table
                .write_jsonl(stdout.lock())
                .context("Failed to write results")?;
            println!(
                "{}",
                serde_json::json!({
                    "type": "summary",
                    "total_files": table.len(),
                    "completed": table.succeeded(),
                    "failed": table.failed(),
                    "metrics": table.summary(),
                })
            );
        }
        OutputFormat::Text => {
            for row in table.rows() {
                if let Some(failure) = row.failure() {
                    warn!("{}: {}", row.name, failure);
                }
            }
            info!("=== Processing Complete ===");
            info!("Total files: {}", table.len());
            info!("Completed: {}", table.succeeded());
            info!("Failed: {}", table.failed());
            if let Some(summary) = table.summary() {
                let show =
                    |v: Option<f64>| v.map_or_else(|| "NA".to_string(), |v| format!("{v:.4}"));
                info!(
                    "Mean over {} scored images: iou={} precision={} recall={} accuracy={} dice={} auc={}",
                    summary.images,
                    show(summary.iou),
                    show(summary.precision),
                    show(summary.recall),
                    show(summary.accuracy),
                    show(summary.dice),
                    show(summary.auc)
                );
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collect_files_filters_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["b.tif", "a.tif", "c.png", "d.tiff"] {
            std::fs::write(dir.path().join(name), b"").unwrap();
        }
        std::fs::create_dir(dir.path().join("sub.tif")).unwrap();

        let files = collect_files(dir.path(), ".tif").unwrap();
        let names: Vec<_> = files
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, ["a.tif", "b.tif"]);

        assert_eq!(collect_files(dir.path(), "tiff").unwrap().len(), 1);
    }

    #[test]
    fn test_single_file_input() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("volume.tif");
        std::fs::write(&file, b"").unwrap();
        assert_eq!(collect_files(&file, ".png").unwrap(), vec![file]);
    }
}
