//! Signal fusion: tabular failure probability + feedback signal → fused risk.
//!
//! # Alignment
//!
//! The default is **positional alignment, not identity alignment**: the i-th
//! log record is paired with the i-th classification result and both streams
//! are truncated to the shorter length. Nothing checks that the two streams
//! describe the same deployments; callers must keep them co-ordered upstream.
//!
//! [`Alignment::Keyed`] joins on `LogRecord::record_id == ClassificationResult::id`
//! instead, and falls back to positional alignment (with a warning in the
//! [`AlignmentReport`]) when the log stream carries no keys.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::types::{ClassificationResult, FusedRecord, LogRecord};

pub const DEFAULT_LOG_WEIGHT: f64 = 0.6;
pub const DEFAULT_FEEDBACK_WEIGHT: f64 = 0.4;
pub const DEFAULT_THRESHOLD: f64 = 0.5;

const WEIGHT_SUM_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum FusionError {
    #[error("invalid weights ({log}, {feedback}): must be finite, non-negative and sum to 1")]
    InvalidWeights { log: f64, feedback: f64 },
    #[error("invalid threshold {0}: must lie in [0, 1]")]
    InvalidThreshold(f64),
    #[error("log record {index} has no log_prob; score the log table before fusing")]
    MissingProbability { index: usize },
    #[error("log record {index} has log_prob {value} outside [0, 1]")]
    ProbabilityOutOfRange { index: usize, value: f64 },
}

// =============================================================================
// Configuration
// =============================================================================

/// Convex combination weights for the two signals.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionWeights {
    log: f64,
    feedback: f64,
}

impl FusionWeights {
    pub fn new(log: f64, feedback: f64) -> Result<Self, FusionError> {
        let valid = log.is_finite()
            && feedback.is_finite()
            && log >= 0.0
            && feedback >= 0.0
            && ((log + feedback) - 1.0).abs() <= WEIGHT_SUM_TOLERANCE;
        if !valid {
            return Err(FusionError::InvalidWeights { log, feedback });
        }
        Ok(Self { log, feedback })
    }

    /// Weights where the feedback share is `1 - log`.
    pub fn from_log_weight(log: f64) -> Result<Self, FusionError> {
        Self::new(log, 1.0 - log)
    }

    pub fn log(&self) -> f64 {
        self.log
    }

    pub fn feedback(&self) -> f64 {
        self.feedback
    }
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            log: DEFAULT_LOG_WEIGHT,
            feedback: DEFAULT_FEEDBACK_WEIGHT,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alignment {
    /// Pair by index and truncate to the shorter stream.
    #[default]
    Positional,
    /// Join on the shared record key, positional fallback when logs carry no keys.
    Keyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FusionConfig {
    pub weights: FusionWeights,
    pub threshold: f64,
    pub alignment: Alignment,
}

impl FusionConfig {
    pub fn new(weights: FusionWeights, threshold: f64, alignment: Alignment) -> Result<Self, FusionError> {
        if !threshold.is_finite() || !(0.0..=1.0).contains(&threshold) {
            return Err(FusionError::InvalidThreshold(threshold));
        }
        Ok(Self {
            weights,
            threshold,
            alignment,
        })
    }
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            weights: FusionWeights::default(),
            threshold: DEFAULT_THRESHOLD,
            alignment: Alignment::Positional,
        }
    }
}

// =============================================================================
// Arithmetic
// =============================================================================

pub fn fused_risk(weights: &FusionWeights, log_prob: f64, feedback_signal: u8) -> f64 {
    weights.log * log_prob + weights.feedback * f64::from(feedback_signal)
}

/// Binary decision; a score exactly at the threshold is positive.
pub fn decide(score: f64, threshold: f64) -> u8 {
    u8::from(score >= threshold)
}

// =============================================================================
// Alignment
// =============================================================================

/// How the two streams were paired, and what was left over.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AlignmentReport {
    pub requested: Alignment,
    pub applied: Alignment,
    pub log_records: usize,
    pub classification_results: usize,
    pub aligned: usize,
    pub dropped_logs: usize,
    pub dropped_results: usize,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusionOutput {
    pub records: Vec<FusedRecord>,
    pub alignment: AlignmentReport,
}

impl FusionOutput {
    pub fn ground_truth(&self) -> Vec<u8> {
        self.records.iter().map(|r| r.ground_truth).collect()
    }
}

fn align_positional(logs: usize, results: usize) -> Vec<(usize, usize)> {
    (0..logs.min(results)).map(|i| (i, i)).collect()
}

fn align_keyed(
    logs: &[LogRecord],
    results: &[ClassificationResult],
    warnings: &mut Vec<String>,
) -> Vec<(usize, usize)> {
    let mut by_id: HashMap<&str, usize> = HashMap::with_capacity(results.len());
    let mut duplicates = 0usize;
    for (idx, r) in results.iter().enumerate() {
        if by_id.contains_key(r.id.as_str()) {
            duplicates += 1;
        } else {
            by_id.insert(r.id.as_str(), idx);
        }
    }
    if duplicates > 0 {
        warnings.push(format!(
            "{duplicates} classification result(s) share an id with an earlier result; only the first is joinable"
        ));
    }

    let mut unkeyed = 0usize;
    let mut pairs = Vec::new();
    for (log_idx, log) in logs.iter().enumerate() {
        let Some(key) = log.record_id.as_deref() else {
            unkeyed += 1;
            continue;
        };
        if let Some(result_idx) = by_id.remove(key) {
            pairs.push((log_idx, result_idx));
        }
    }
    if unkeyed > 0 {
        warnings.push(format!("{unkeyed} log record(s) carry no record id and were not joined"));
    }
    pairs
}

// =============================================================================
// Fusion
// =============================================================================

/// Fuse scored log records with classification results.
///
/// Pure and deterministic. Every paired log record must carry a `log_prob` in
/// `[0, 1]`. Absent or non-finite feature cells are written out as zero.
pub fn fuse(
    logs: &[LogRecord],
    results: &[ClassificationResult],
    config: &FusionConfig,
) -> Result<FusionOutput, FusionError> {
    let mut warnings = Vec::new();

    let (applied, pairs) = match config.alignment {
        Alignment::Positional => (
            Alignment::Positional,
            align_positional(logs.len(), results.len()),
        ),
        Alignment::Keyed if logs.iter().all(|l| l.record_id.is_none()) => {
            warnings.push(
                "keyed alignment requested but the log table has no record ids; fell back to positional alignment"
                    .to_string(),
            );
            (
                Alignment::Positional,
                align_positional(logs.len(), results.len()),
            )
        }
        Alignment::Keyed => (Alignment::Keyed, align_keyed(logs, results, &mut warnings)),
    };

    let mut records = Vec::with_capacity(pairs.len());
    for &(log_idx, result_idx) in &pairs {
        let log = &logs[log_idx];
        let result = &results[result_idx];

        let log_prob = log
            .log_prob
            .ok_or(FusionError::MissingProbability { index: log_idx })?;
        if !log_prob.is_finite() || !(0.0..=1.0).contains(&log_prob) {
            return Err(FusionError::ProbabilityOutOfRange {
                index: log_idx,
                value: log_prob,
            });
        }

        let feedback_signal = result.label.signal();
        let risk = fused_risk(&config.weights, log_prob, feedback_signal);

        records.push(FusedRecord {
            log_index: log_idx,
            result_index: result_idx,
            feedback_id: result.id.clone(),
            features: log.features.zero_filled(),
            ground_truth: log.ground_truth,
            log_prob,
            feedback_signal,
            fused_risk: risk,
            fused_pred: decide(risk, config.threshold),
            log_only_pred: decide(log_prob, config.threshold),
            text: result.text.clone(),
            language: result.language.clone(),
            label: result.label,
        });
    }

    let aligned = records.len();
    let alignment = AlignmentReport {
        requested: config.alignment,
        applied,
        log_records: logs.len(),
        classification_results: results.len(),
        aligned,
        dropped_logs: logs.len() - aligned,
        dropped_results: results.len() - aligned,
        warnings,
    };

    if alignment.dropped_logs > 0 || alignment.dropped_results > 0 {
        warn!(
            alignment = ?alignment.applied,
            aligned,
            dropped_logs = alignment.dropped_logs,
            dropped_results = alignment.dropped_results,
            "Streams differ in length or keys; unmatched records were dropped"
        );
    }
    for w in &alignment.warnings {
        warn!("{w}");
    }

    Ok(FusionOutput { records, alignment })
}
