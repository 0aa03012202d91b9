//! Voxel-level overlap metrics between a prediction and a ground-truth mask
//!
//! Both label volumes are binarized (`label > 0` is foreground) and compared in a
//! single pass. Metrics whose denominator is zero are reported as `None`
//! ("not applicable") rather than 0 or 1:
//!
//! | metric    | undefined when                                          |
//! |-----------|---------------------------------------------------------|
//! | precision | prediction has no foreground                            |
//! | recall    | ground truth has no foreground                          |
//! | iou       | both have no foreground                                 |
//! | dice      | both have no foreground                                 |
//! | auc       | ground truth is single-class, or prediction is empty    |
//!
//! `accuracy` is always defined.
//!
//! The binarized prediction is the ROC score, so the curve has a single
//! operating point and `auc = (1 + TPR - FPR) / 2`.

use crate::error::{Error, Result};
use crate::volume::Shape;
use ndarray::{ArrayBase, Data, Ix3, Zip};
use serde::{Deserialize, Serialize};
use std::ops::Add;

/// Binary confusion counts over all voxels
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionCounts {
    pub true_positive: u64,
    pub false_positive: u64,
    pub false_negative: u64,
    pub true_negative: u64,
}

impl Add for ConfusionCounts {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            true_positive: self.true_positive + other.true_positive,
            false_positive: self.false_positive + other.false_positive,
            false_negative: self.false_negative + other.false_negative,
            true_negative: self.true_negative + other.true_negative,
        }
    }
}

impl ConfusionCounts {
    /// Count agreement between binarized ground truth and prediction
    pub fn from_labels<S1, S2>(
        ground_truth: &ArrayBase<S1, Ix3>,
        prediction: &ArrayBase<S2, Ix3>,
    ) -> Result<Self>
    where
        S1: Data<Elem = i32> + Sync,
        S2: Data<Elem = i32> + Sync,
    {
        let expected = Shape::of(ground_truth);
        let actual = Shape::of(prediction);
        if expected != actual {
            return Err(Error::ShapeMismatch { expected, actual });
        }

        Ok(Zip::from(ground_truth).and(prediction).par_fold(
            ConfusionCounts::default,
            |mut counts, &truth, &predicted| {
                match (truth > 0, predicted > 0) {
                    (true, true) => counts.true_positive += 1,
                    (false, true) => counts.false_positive += 1,
                    (true, false) => counts.false_negative += 1,
                    (false, false) => counts.true_negative += 1,
                }
                counts
            },
            |a, b| a + b,
        ))
    }

    #[must_use]
    pub fn total(&self) -> u64 {
        self.true_positive + self.false_positive + self.false_negative + self.true_negative
    }

    #[must_use]
    pub fn ground_truth_foreground(&self) -> u64 {
        self.true_positive + self.false_negative
    }

    #[must_use]
    pub fn ground_truth_background(&self) -> u64 {
        self.false_positive + self.true_negative
    }

    #[must_use]
    pub fn predicted_foreground(&self) -> u64 {
        self.true_positive + self.false_positive
    }

    #[must_use]
    pub fn accuracy(&self) -> f64 {
        ratio(self.true_positive + self.true_negative, self.total()).unwrap_or(0.0)
    }

    #[must_use]
    pub fn precision(&self) -> Option<f64> {
        ratio(self.true_positive, self.predicted_foreground())
    }

    #[must_use]
    pub fn recall(&self) -> Option<f64> {
        ratio(self.true_positive, self.ground_truth_foreground())
    }

    #[must_use]
    pub fn iou(&self) -> Option<f64> {
        ratio(
            self.true_positive,
            self.true_positive + self.false_positive + self.false_negative,
        )
    }

    #[must_use]
    pub fn dice(&self) -> Option<f64> {
        ratio(
            2 * self.true_positive,
            2 * self.true_positive + self.false_positive + self.false_negative,
        )
    }

    #[must_use]
    pub fn auc(&self) -> Option<f64> {
        if self.predicted_foreground() == 0 {
            return None;
        }
        let tpr = ratio(self.true_positive, self.ground_truth_foreground())?;
        let fpr = ratio(self.false_positive, self.ground_truth_background())?;
        Some((1.0 + tpr - fpr) / 2.0)
    }
}

fn ratio(numerator: u64, denominator: u64) -> Option<f64> {
    (denominator > 0).then(|| numerator as f64 / denominator as f64)
}

/// One row of validation scores
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub name: String,
    pub iou: Option<f64>,
    pub precision: Option<f64>,
    pub recall: Option<f64>,
    pub accuracy: f64,
    pub dice: Option<f64>,
    pub auc: Option<f64>,
}

impl MetricsRecord {
    #[must_use]
    pub fn from_counts(name: impl Into<String>, counts: &ConfusionCounts) -> Self {
        Self {
            name: name.into(),
            iou: counts.iou(),
            precision: counts.precision(),
            recall: counts.recall(),
            accuracy: counts.accuracy(),
            dice: counts.dice(),
            auc: counts.auc(),
        }
    }
}

/// Score `prediction` against `ground_truth`; shapes must match
pub fn score<S1, S2>(
    name: impl Into<String>,
    ground_truth: &ArrayBase<S1, Ix3>,
    prediction: &ArrayBase<S2, Ix3>,
) -> Result<MetricsRecord>
where
    S1: Data<Elem = i32> + Sync,
    S2: Data<Elem = i32> + Sync,
{
    let counts = ConfusionCounts::from_labels(ground_truth, prediction)?;
    Ok(MetricsRecord::from_counts(name, &counts))
}
