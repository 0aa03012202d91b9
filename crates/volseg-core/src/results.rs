//! Per-image results of a batch run

use crate::error::{Error, ErrorCategory};
use crate::metrics::MetricsRecord;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};
use thiserror::Error as ThisError;

/// Rendering of an undefined metric in CSV output
pub const NOT_APPLICABLE: &str = "NA";

/// An image that could not be processed; the batch continues
#[derive(ThisError, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[error("{category} error: {message}")]
pub struct ImageFailure {
    pub category: ErrorCategory,
    pub message: String,
}

impl From<&Error> for ImageFailure {
    fn from(err: &Error) -> Self {
        Self {
            category: err.category(),
            message: err.to_string(),
        }
    }
}

impl From<Error> for ImageFailure {
    fn from(err: Error) -> Self {
        Self::from(&err)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RowOutcome {
    /// Prediction finished (prediction mode)
    Predicted { output: Option<PathBuf> },
    /// Prediction finished and was scored against its mask
    Scored {
        output: Option<PathBuf>,
        mask: PathBuf,
        metrics: MetricsRecord,
    },
    Failed(ImageFailure),
}

impl RowOutcome {
    #[must_use]
    pub fn status(&self) -> &'static str {
        match self {
            RowOutcome::Predicted { .. } => "predicted",
            RowOutcome::Scored { .. } => "scored",
            RowOutcome::Failed(_) => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRow {
    pub image: PathBuf,
    pub name: String,
    #[serde(flatten)]
    pub outcome: RowOutcome,
}

impl ResultRow {
    #[must_use]
    pub fn is_failure(&self) -> bool {
        matches!(self.outcome, RowOutcome::Failed(_))
    }

    #[must_use]
    pub fn metrics(&self) -> Option<&MetricsRecord> {
        match &self.outcome {
            RowOutcome::Scored { metrics, .. } => Some(metrics),
            _ => None,
        }
    }

    #[must_use]
    pub fn failure(&self) -> Option<&ImageFailure> {
        match &self.outcome {
            RowOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Mean of every metric over the rows where it is defined
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricsSummary {
    pub images: usize,
    pub iou: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub accuracy: Option<f64>,
    pub dice: Option<f64>,
    pub auc: Option<f64>,
}

/// Flat CSV rendering of a row
#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    image_name: &'a str,
    status: &'static str,
    iou: String,
    precision: String,
    recall: String,
    accuracy: String,
    dice: String,
    auc: String,
    output: String,
    error: String,
}

fn render(metric: Option<f64>) -> String {
    metric.map_or_else(|| NOT_APPLICABLE.to_string(), |v| v.to_string())
}

/// Rows in processing order
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResultsTable {
    rows: Vec<ResultRow>,
}

impl ResultsTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, row: ResultRow) {
        self.rows.push(row);
    }

    #[must_use]
    pub fn rows(&self) -> &[ResultRow] {
        &self.rows
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    #[must_use]
    pub fn failed(&self) -> usize {
        self.rows.iter().filter(|row| row.is_failure()).count()
    }

    #[must_use]
    pub fn succeeded(&self) -> usize {
        self.len() - self.failed()
    }

    /// Scored rows in order
    pub fn metrics(&self) -> impl Iterator<Item = &MetricsRecord> {
        self.rows.iter().filter_map(ResultRow::metrics)
    }

    /// `None` when no row was scored
    #[must_use]
    pub fn summary(&self) -> Option<MetricsSummary> {
        let records: Vec<&MetricsRecord> = self.metrics().collect();
        if records.is_empty() {
            return None;
        }

        let mean = |pick: fn(&MetricsRecord) -> Option<f64>| {
            let values: Vec<f64> = records.iter().filter_map(|r| pick(r)).collect();
            (!values.is_empty()).then(|| values.iter().sum::<f64>() / values.len() as f64)
        };

        Some(MetricsSummary {
            images: records.len(),
            iou: mean(|r| r.iou),
            precision: mean(|r| r.precision),
            recall: mean(|r| r.recall),
            accuracy: mean(|r| Some(r.accuracy)),
            dice: mean(|r| r.dice),
            auc: mean(|r| r.auc),
        })
    }

    /// Write one CSV line per row; undefined metrics are written as `NA`
    pub fn write_csv<W: Write>(&self, writer: W) -> Result<(), csv::Error> {
        let mut csv_writer = csv::Writer::from_writer(writer);
        for row in &self.rows {
            let (metrics, output, error) = match &row.outcome {
                RowOutcome::Predicted { output } => (None, output.as_deref(), String::new()),
                RowOutcome::Scored {
                    output, metrics, ..
                } => (Some(metrics), output.as_deref(), String::new()),
                RowOutcome::Failed(failure) => (None, None, failure.to_string()),
            };
            let field = |pick: fn(&MetricsRecord) -> Option<f64>| {
                metrics.map(|m| render(pick(m))).unwrap_or_default()
            };

            csv_writer.serialize(CsvRow {
                image_name: &row.name,
                status: row.outcome.status(),
                iou: field(|m| m.iou),
                precision: field(|m| m.precision),
                recall: field(|m| m.recall),
                accuracy: field(|m| Some(m.accuracy)),
                dice: field(|m| m.dice),
                auc: field(|m| m.auc),
                output: output.map(|p| p.display().to_string()).unwrap_or_default(),
                error,
            })?;
        }
        csv_writer.flush()?;
        Ok(())
    }

    pub fn write_csv_file(&self, path: &Path) -> Result<(), csv::Error> {
        let file = std::fs::File::create(path)?;
        self.write_csv(std::io::BufWriter::new(file))
    }

    /// Write one JSON object per row; undefined metrics are `null`
    pub fn write_jsonl<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        for row in &self.rows {
            serde_json::to_writer(&mut writer, row)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()
    }
}
