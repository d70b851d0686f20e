//! Baseline vs fused evaluation against ground truth.

use std::collections::BTreeSet;

use serde::Serialize;
use tracing::warn;

use crate::types::{FusedRecord, Label};

/// Ground-truth-positive rows surfaced for manual inspection.
pub const DEFAULT_QUALITATIVE_LIMIT: usize = 3;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvaluationError {
    #[error("ground truth has {ground_truth} labels but {records} fused records were given")]
    LengthMismatch { records: usize, ground_truth: usize },
    #[error("{name} has {got} entries, expected {expected}")]
    PredictionLength {
        name: &'static str,
        expected: usize,
        got: usize,
    },
}

// =============================================================================
// Metrics
// =============================================================================

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    pub support: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClassRow {
    pub class: u8,
    #[serde(flatten)]
    pub metrics: ClassMetrics,
}

/// Per-class metrics plus the usual aggregates, for one predictor.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricSet {
    pub predictor: String,
    pub classes: Vec<ClassRow>,
    pub accuracy: f64,
    pub macro_avg: ClassMetrics,
    pub weighted_avg: ClassMetrics,
}

impl MetricSet {
    pub fn class(&self, class: u8) -> ClassMetrics {
        self.classes
            .iter()
            .find(|row| row.class == class)
            .map(|row| row.metrics)
            .unwrap_or_default()
    }

    /// Metrics for the failure class.
    pub fn positive(&self) -> ClassMetrics {
        self.class(1)
    }
}

fn ratio(num: usize, den: usize) -> Option<f64> {
    (den > 0).then(|| num as f64 / den as f64)
}

/// Precision/recall/F1/support per class, one-vs-rest.
///
/// Classes are the union of labels seen in `y_true` and `y_pred`. Ill-defined
/// ratios (zero denominator) are reported as 0.0.
pub fn classification_metrics(
    predictor: &str,
    y_true: &[u8],
    y_pred: &[u8],
) -> Result<MetricSet, EvaluationError> {
    if y_true.len() != y_pred.len() {
        return Err(EvaluationError::PredictionLength {
            name: "predictions",
            expected: y_true.len(),
            got: y_pred.len(),
        });
    }

    let labels: BTreeSet<u8> = y_true.iter().chain(y_pred.iter()).copied().collect();
    let total = y_true.len();
    let mut classes = Vec::with_capacity(labels.len());
    let mut ill_defined = 0usize;

    for &class in &labels {
        let mut tp = 0usize;
        let mut predicted = 0usize;
        let mut support = 0usize;
        for (&t, &p) in y_true.iter().zip(y_pred) {
            if p == class {
                predicted += 1;
            }
            if t == class {
                support += 1;
                if p == class {
                    tp += 1;
                }
            }
        }

        let precision = ratio(tp, predicted).unwrap_or_else(|| {
            ill_defined += 1;
            0.0
        });
        let recall = ratio(tp, support).unwrap_or(0.0);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        classes.push(ClassRow {
            class,
            metrics: ClassMetrics {
                precision,
                recall,
                f1,
                support,
            },
        });
    }

    if ill_defined > 0 {
        warn!(
            predictor,
            classes = ill_defined,
            "Precision is ill-defined for classes with no predicted samples; reporting 0.0"
        );
    }

    let correct = y_true.iter().zip(y_pred).filter(|(t, p)| t == p).count();
    let accuracy = ratio(correct, total).unwrap_or(0.0);

    let k = classes.len().max(1) as f64;
    let macro_avg = ClassMetrics {
        precision: classes.iter().map(|c| c.metrics.precision).sum::<f64>() / k,
        recall: classes.iter().map(|c| c.metrics.recall).sum::<f64>() / k,
        f1: classes.iter().map(|c| c.metrics.f1).sum::<f64>() / k,
        support: total,
    };

    let weighted = |f: fn(&ClassMetrics) -> f64| -> f64 {
        if total == 0 {
            return 0.0;
        }
        classes
            .iter()
            .map(|c| f(&c.metrics) * c.metrics.support as f64)
            .sum::<f64>()
            / total as f64
    };
    let weighted_avg = ClassMetrics {
        precision: weighted(|m| m.precision),
        recall: weighted(|m| m.recall),
        f1: weighted(|m| m.f1),
        support: total,
    };

    Ok(MetricSet {
        predictor: predictor.to_string(),
        classes,
        accuracy,
        macro_avg,
        weighted_avg,
    })
}

// =============================================================================
// Report
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QualitativeExample {
    pub feedback_id: String,
    pub language: String,
    pub text: String,
    pub label: Label,
    pub log_prob: f64,
    pub fused_risk: f64,
}

impl QualitativeExample {
    fn from_record(r: &FusedRecord) -> Self {
        Self {
            feedback_id: r.feedback_id.clone(),
            language: r.language.clone(),
            text: r.text.clone(),
            label: r.label,
            log_prob: r.log_prob,
            fused_risk: r.fused_risk,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", content = "examples", rename_all = "snake_case")]
pub enum Qualitative {
    Examples(Vec<QualitativeExample>),
    NoPositiveExamples,
}

impl Qualitative {
    pub const NO_POSITIVES_MESSAGE: &'static str = "no positive examples found";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvaluationReport {
    pub log_only: MetricSet,
    pub fused: MetricSet,
    pub qualitative: Qualitative,
    pub records: Vec<FusedRecord>,
}

pub fn evaluate(fused: &[FusedRecord], ground_truth: &[u8]) -> Result<EvaluationReport, EvaluationError> {
    evaluate_with_limit(fused, ground_truth, DEFAULT_QUALITATIVE_LIMIT)
}

/// Score both predictors and pick up to `limit` positive rows, in input order.
pub fn evaluate_with_limit(
    fused: &[FusedRecord],
    ground_truth: &[u8],
    limit: usize,
) -> Result<EvaluationReport, EvaluationError> {
    if fused.len() != ground_truth.len() {
        return Err(EvaluationError::LengthMismatch {
            records: fused.len(),
            ground_truth: ground_truth.len(),
        });
    }

    let log_only_pred: Vec<u8> = fused.iter().map(|r| r.log_only_pred).collect();
    let fused_pred: Vec<u8> = fused.iter().map(|r| r.fused_pred).collect();

    let log_only = classification_metrics("log_only", ground_truth, &log_only_pred)?;
    let fused_metrics = classification_metrics("fused", ground_truth, &fused_pred)?;

    let examples: Vec<QualitativeExample> = fused
        .iter()
        .zip(ground_truth)
        .filter(|(_, truth)| **truth == 1)
        .take(limit)
        .map(|(r, _)| QualitativeExample::from_record(r))
        .collect();
    let qualitative = if examples.is_empty() {
        Qualitative::NoPositiveExamples
    } else {
        Qualitative::Examples(examples)
    };

    Ok(EvaluationReport {
        log_only,
        fused: fused_metrics,
        qualitative,
        records: fused.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn binary_metrics_match_hand_computation() {
        // tp=2 fp=1 fn=1 tn=2
        let y_true = [1, 1, 1, 0, 0, 0];
        let y_pred = [1, 1, 0, 1, 0, 0];
        let m = classification_metrics("x", &y_true, &y_pred).unwrap();
        let pos = m.positive();
        assert!(approx(pos.precision, 2.0 / 3.0));
        assert!(approx(pos.recall, 2.0 / 3.0));
        assert!(approx(pos.f1, 2.0 / 3.0));
        assert_eq!(pos.support, 3);
        assert!(approx(m.accuracy, 4.0 / 6.0));
        assert_eq!(m.classes.len(), 2);
    }

    #[test]
    fn zero_predicted_positives_gives_zero_precision() {
        let m = classification_metrics("x", &[1, 0], &[0, 0]).unwrap();
        let pos = m.positive();
        assert_eq!(pos.precision, 0.0);
        assert_eq!(pos.recall, 0.0);
        assert_eq!(pos.f1, 0.0);
        assert_eq!(pos.support, 1);
    }

    #[test]
    fn weighted_average_uses_support() {
        let m = classification_metrics("x", &[1, 0, 0, 0], &[1, 0, 0, 1]).unwrap();
        // class 0: p=1, r=2/3 ; class 1: p=0.5, r=1
        assert!(approx(m.weighted_avg.recall, (2.0 / 3.0 * 3.0 + 1.0) / 4.0));
        assert!(approx(m.macro_avg.precision, 0.75));
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let err = evaluate(&[], &[1]).unwrap_err();
        assert_eq!(
            err,
            EvaluationError::LengthMismatch {
                records: 0,
                ground_truth: 1
            }
        );
    }
}
