//! Record types shared by the classification, fusion and evaluation stages.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize};

// =============================================================================
// Feedback side
// =============================================================================

/// One piece of citizen feedback, as scraped upstream.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct FeedbackItem {
    /// Opaque identifier. Numeric ids in the source JSON are kept as text.
    #[serde(deserialize_with = "opaque_id")]
    pub id: String,
    pub text: String,
    /// Language tag (`lang` in the feedback collection).
    #[serde(rename = "lang", alias = "language")]
    pub language: String,
}

impl FeedbackItem {
    pub fn new(id: impl Into<String>, text: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            language: language.into(),
        }
    }
}

/// Outcome of asking the model whether a message describes a technical problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Label {
    Yes,
    No,
    /// The model answered but neither token was found.
    Uncertain,
    /// The model could not be invoked (spawn failure, non-zero exit, timeout).
    Error,
}

impl Label {
    pub const ALL: [Label; 4] = [Label::Yes, Label::No, Label::Uncertain, Label::Error];

    pub fn as_str(&self) -> &'static str {
        match self {
            Label::Yes => "YES",
            Label::No => "NO",
            Label::Uncertain => "UNCERTAIN",
            Label::Error => "ERROR",
        }
    }

    /// Binarized feedback signal: only an explicit YES counts.
    pub fn signal(&self) -> u8 {
        match self {
            Label::Yes => 1,
            Label::No | Label::Uncertain | Label::Error => 0,
        }
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown label '{0}' (expected YES, NO, UNCERTAIN or ERROR)")]
pub struct UnknownLabel(pub String);

impl FromStr for Label {
    type Err = UnknownLabel;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "YES" => Ok(Label::Yes),
            "NO" => Ok(Label::No),
            "UNCERTAIN" => Ok(Label::Uncertain),
            "ERROR" => Ok(Label::Error),
            _ => Err(UnknownLabel(s.to_string())),
        }
    }
}

/// One row of the intermediate classification table.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct ClassificationResult {
    pub id: String,
    pub text: String,
    pub language: String,
    /// Read case-insensitively, so `yes` and `Yes` are accepted.
    #[serde(rename = "llm_prediction", deserialize_with = "label_text")]
    pub label: Label,
}

impl ClassificationResult {
    pub fn from_item(item: &FeedbackItem, label: Label) -> Self {
        Self {
            id: item.id.clone(),
            text: item.text.clone(),
            language: item.language.clone(),
            label,
        }
    }
}

// =============================================================================
// Deployment-log side
// =============================================================================

/// Numeric telemetry columns the tabular model is trained on, in column order.
pub const FEATURE_COLUMNS: [&str; FEATURE_COUNT] = [
    "build_duration_sec",
    "error_rate",
    "code_churn_lines",
    "test_coverage_pct",
    "latency_p95_ms",
    "failed_test_cases",
    "time_since_last_deployment_hours",
];

pub const FEATURE_COUNT: usize = 7;

/// Feature values as read from the log table. Cells may be absent.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FeatureVector {
    values: [Option<f64>; FEATURE_COUNT],
}

impl FeatureVector {
    pub fn new(values: [Option<f64>; FEATURE_COUNT]) -> Self {
        Self { values }
    }

    pub fn complete(values: [f64; FEATURE_COUNT]) -> Self {
        Self {
            values: values.map(Some),
        }
    }

    pub fn get(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).copied().flatten()
    }

    pub fn set(&mut self, idx: usize, value: Option<f64>) {
        if let Some(slot) = self.values.get_mut(idx) {
            *slot = value;
        }
    }

    /// Number of cells that are absent or non-finite.
    pub fn missing_count(&self) -> usize {
        self.values
            .iter()
            .filter(|v| !matches!(v, Some(x) if x.is_finite()))
            .count()
    }

    /// Values with absent and non-finite cells replaced by zero.
    pub fn zero_filled(&self) -> [f64; FEATURE_COUNT] {
        self.values.map(|v| match v {
            Some(x) if x.is_finite() => x,
            _ => 0.0,
        })
    }
}

/// One deployment from the telemetry table.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Shared key with the feedback stream, when the table carries one.
    pub record_id: Option<String>,
    pub features: FeatureVector,
    /// 1 when the deployment failed.
    pub ground_truth: u8,
    /// Attached by the tabular classifier; absent until that stage has run.
    pub log_prob: Option<f64>,
}

impl LogRecord {
    pub fn new(features: FeatureVector, ground_truth: u8) -> Self {
        Self {
            record_id: None,
            features,
            ground_truth,
            log_prob: None,
        }
    }

    /// Record that already carries a classifier probability. Features are empty.
    pub fn scored(log_prob: f64, ground_truth: u8) -> Self {
        Self {
            record_id: None,
            features: FeatureVector::default(),
            ground_truth,
            log_prob: Some(log_prob),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.record_id = Some(id.into());
        self
    }
}

// =============================================================================
// Fused side
// =============================================================================

/// One aligned (log record, classification result) pair and the decisions derived from it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FusedRecord {
    /// Index into the log stream this row was taken from.
    pub log_index: usize,
    /// Index into the classification stream this row was taken from.
    pub result_index: usize,
    pub feedback_id: String,
    pub features: [f64; FEATURE_COUNT],
    pub ground_truth: u8,
    pub log_prob: f64,
    pub feedback_signal: u8,
    pub fused_risk: f64,
    pub fused_pred: u8,
    pub log_only_pred: u8,
    pub text: String,
    pub language: String,
    pub label: Label,
}

// =============================================================================
// Serde helpers
// =============================================================================

#[derive(Deserialize)]
#[serde(untagged)]
enum RawId {
    Text(String),
    Int(i64),
    Float(f64),
}

fn opaque_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawId::deserialize(deserializer)? {
        RawId::Text(s) => s,
        RawId::Int(i) => i.to_string(),
        RawId::Float(f) => f.to_string(),
    })
}

fn label_text<'de, D>(deserializer: D) -> Result<Label, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    raw.parse().map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_yes_is_a_positive_signal() {
        assert_eq!(Label::Yes.signal(), 1);
        assert_eq!(Label::No.signal(), 0);
        assert_eq!(Label::Uncertain.signal(), 0);
        assert_eq!(Label::Error.signal(), 0);
    }

    #[test]
    fn label_parses_case_insensitively() {
        assert_eq!("yes".parse::<Label>().unwrap(), Label::Yes);
        assert_eq!(" Uncertain ".parse::<Label>().unwrap(), Label::Uncertain);
        assert!("maybe".parse::<Label>().is_err());
    }

    #[test]
    fn feedback_item_accepts_numeric_ids() {
        let item: FeedbackItem =
            serde_json::from_str(r#"{"id": 17, "text": "site down", "lang": "en"}"#).unwrap();
        assert_eq!(item.id, "17");
        assert_eq!(item.language, "en");
    }

    #[test]
    fn zero_filled_replaces_absent_and_nan() {
        let mut fv = FeatureVector::complete([1.0; FEATURE_COUNT]);
        fv.set(0, None);
        fv.set(3, Some(f64::NAN));
        let filled = fv.zero_filled();
        assert_eq!(filled[0], 0.0);
        assert_eq!(filled[3], 0.0);
        assert_eq!(filled[1], 1.0);
        assert_eq!(fv.missing_count(), 2);
    }
}
