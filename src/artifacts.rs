//! On-disk artifacts: feedback JSON, log table CSV, classification CSV, fused CSV.

use std::fs::{self, File};
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::types::{
    ClassificationResult, FeatureVector, FeedbackItem, FusedRecord, LogRecord, FEATURE_COLUMNS,
};

pub const DEFAULT_FEEDBACK_FILE: &str = "feedback.json";
pub const DEFAULT_RESULTS_FILE: &str = "llm_feedback_results.csv";
pub const DEFAULT_LOGS_FILE: &str = "logs.csv";
pub const DEFAULT_FUSED_FILE: &str = "fused_evaluation_results.csv";

const GROUND_TRUTH_COLUMN: &str = "failure_label";
const LOG_PROB_COLUMN: &str = "log_prob";
const ID_COLUMNS: [&str; 2] = ["id", "record_id"];

#[derive(Debug, thiserror::Error)]
pub enum ArtifactError {
    #[error("{artifact} not found at {}: {hint}", path.display())]
    Missing {
        artifact: Artifact,
        path: PathBuf,
        hint: &'static str,
    },
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{}: {source}", path.display())]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{}: {source}", path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{}: required column '{column}' is missing", path.display())]
    MissingColumn { path: PathBuf, column: &'static str },
    #[error("{}: row {row}, column '{column}': invalid value '{value}'", path.display())]
    InvalidValue {
        path: PathBuf,
        row: usize,
        column: String,
        value: String,
    },
}

impl ArtifactError {
    pub fn code(&self) -> &'static str {
        match self {
            ArtifactError::Missing { .. } => "missing_input",
            ArtifactError::Io { .. } => "io_error",
            ArtifactError::Json { .. } => "invalid_json",
            ArtifactError::Csv { .. } => "invalid_csv",
            ArtifactError::MissingColumn { .. } => "missing_column",
            ArtifactError::InvalidValue { .. } => "invalid_value",
        }
    }

    fn io(path: &Path, source: std::io::Error) -> Self {
        ArtifactError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    fn csv(path: &Path, source: csv::Error) -> Self {
        ArtifactError::Csv {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Input artifacts the pipeline can require.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Artifact {
    Feedback,
    Logs,
    Classifications,
}

impl Artifact {
    pub fn name(&self) -> &'static str {
        match self {
            Artifact::Feedback => "feedback collection",
            Artifact::Logs => "deployment log table",
            Artifact::Classifications => "classification results",
        }
    }

    /// Which step produces this artifact.
    pub fn hint(&self) -> &'static str {
        match self {
            Artifact::Feedback => {
                "produce it with the feedback scraper (JSON array of {id, text, lang})"
            }
            Artifact::Logs => "produce it with the deployment log generator",
            Artifact::Classifications => {
                "run `sigfuse classify` first (columns: id, text, language, llm_prediction)"
            }
        }
    }
}

impl std::fmt::Display for Artifact {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Check every input exists before any work starts.
pub fn require_inputs(inputs: &[(Artifact, &Path)]) -> Result<(), ArtifactError> {
    for (artifact, path) in inputs {
        if !path.is_file() {
            return Err(ArtifactError::Missing {
                artifact: *artifact,
                path: path.to_path_buf(),
                hint: artifact.hint(),
            });
        }
    }
    Ok(())
}

fn open(artifact: Artifact, path: &Path) -> Result<File, ArtifactError> {
    require_inputs(&[(artifact, path)])?;
    File::open(path).map_err(|e| ArtifactError::io(path, e))
}

fn create_parent(path: &Path) -> Result<(), ArtifactError> {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => {
            fs::create_dir_all(parent).map_err(|e| ArtifactError::io(parent, e))
        }
        _ => Ok(()),
    }
}

// =============================================================================
// Feedback
// =============================================================================

pub fn read_feedback(path: &Path) -> Result<Vec<FeedbackItem>, ArtifactError> {
    let file = open(Artifact::Feedback, path)?;
    serde_json::from_reader(BufReader::new(file)).map_err(|source| ArtifactError::Json {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// Classification results
// =============================================================================

pub fn write_classifications(path: &Path, results: &[ClassificationResult]) -> Result<(), ArtifactError> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|e| ArtifactError::csv(path, e))?;
    for r in results {
        writer.serialize(r).map_err(|e| ArtifactError::csv(path, e))?;
    }
    writer.flush().map_err(|e| ArtifactError::io(path, e))
}

pub fn read_classifications(path: &Path) -> Result<Vec<ClassificationResult>, ArtifactError> {
    let file = open(Artifact::Classifications, path)?;
    let mut reader = csv::Reader::from_reader(file);
    reader
        .deserialize()
        .collect::<Result<Vec<ClassificationResult>, _>>()
        .map_err(|e| ArtifactError::csv(path, e))
}

// =============================================================================
// Deployment logs
// =============================================================================

fn parse_cell(path: &Path, row: usize, column: &str, raw: &str) -> Result<Option<f64>, ArtifactError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| ArtifactError::InvalidValue {
            path: path.to_path_buf(),
            row,
            column: column.to_string(),
            value: raw.to_string(),
        })
}

/// Read the telemetry table by header name.
///
/// Missing feature columns and empty cells are kept as absent and read as
/// zero downstream. `failure_label` is required and must be 0 or 1.
pub fn read_logs(path: &Path) -> Result<Vec<LogRecord>, ArtifactError> {
    let file = open(Artifact::Logs, path)?;
    let mut reader = csv::Reader::from_reader(file);
    let headers = reader.headers().map_err(|e| ArtifactError::csv(path, e))?.clone();
    let position = |name: &str| headers.iter().position(|h| h.trim() == name);

    let feature_idx: Vec<Option<usize>> = FEATURE_COLUMNS.iter().map(|c| position(*c)).collect();
    let missing: Vec<&str> = FEATURE_COLUMNS
        .iter()
        .zip(&feature_idx)
        .filter(|(_, idx)| idx.is_none())
        .map(|(c, _)| *c)
        .collect();
    if !missing.is_empty() {
        warn!(path = %path.display(), columns = ?missing, "Feature columns missing; treating as zero");
    }

    let label_idx = position(GROUND_TRUTH_COLUMN).ok_or_else(|| ArtifactError::MissingColumn {
        path: path.to_path_buf(),
        column: GROUND_TRUTH_COLUMN,
    })?;
    let prob_idx = position(LOG_PROB_COLUMN);
    let id_idx = ID_COLUMNS.iter().find_map(|c| position(*c));

    let mut records = Vec::new();
    for (row, rec) in reader.records().enumerate() {
        let rec = rec.map_err(|e| ArtifactError::csv(path, e))?;
        let cell = |idx: usize| rec.get(idx).unwrap_or("");

        let mut features = FeatureVector::default();
        for (j, idx) in feature_idx.iter().enumerate() {
            if let Some(idx) = idx {
                features.set(j, parse_cell(path, row, FEATURE_COLUMNS[j], cell(*idx))?);
            }
        }

        let raw_label = cell(label_idx).trim();
        let ground_truth = match raw_label.parse::<f64>() {
            Ok(v) if v == 0.0 => 0,
            Ok(v) if v == 1.0 => 1,
            _ => {
                return Err(ArtifactError::InvalidValue {
                    path: path.to_path_buf(),
                    row,
                    column: GROUND_TRUTH_COLUMN.to_string(),
                    value: raw_label.to_string(),
                })
            }
        };

        let log_prob = match prob_idx {
            Some(idx) => parse_cell(path, row, LOG_PROB_COLUMN, cell(idx))?,
            None => None,
        };
        let record_id = id_idx
            .map(|idx| cell(idx).trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        records.push(LogRecord {
            record_id,
            features,
            ground_truth,
            log_prob,
        });
    }
    Ok(records)
}

// =============================================================================
// Fused output
// =============================================================================

const FUSED_TAIL_COLUMNS: [&str; 11] = [
    "failure_label",
    "log_prob",
    "feedback_signal",
    "fused_risk",
    "fused_pred",
    "log_only_pred",
    "id",
    "text",
    "language",
    "llm_prediction",
    "log_index",
];

pub fn write_fused(path: &Path, records: &[FusedRecord]) -> Result<(), ArtifactError> {
    create_parent(path)?;
    let mut writer = csv::Writer::from_path(path).map_err(|e| ArtifactError::csv(path, e))?;
    let header: Vec<&str> = FEATURE_COLUMNS.iter().chain(FUSED_TAIL_COLUMNS.iter()).copied().collect();
    writer.write_record(&header).map_err(|e| ArtifactError::csv(path, e))?;

    for r in records {
        let mut row: Vec<String> = r.features.iter().map(|v| v.to_string()).collect();
        row.extend([
            r.ground_truth.to_string(),
            r.log_prob.to_string(),
            r.feedback_signal.to_string(),
            r.fused_risk.to_string(),
            r.fused_pred.to_string(),
            r.log_only_pred.to_string(),
            r.feedback_id.clone(),
            r.text.clone(),
            r.language.clone(),
            r.label.to_string(),
            r.log_index.to_string(),
        ]);
        writer.write_record(&row).map_err(|e| ArtifactError::csv(path, e))?;
    }
    writer.flush().map_err(|e| ArtifactError::io(path, e))
}

pub fn write_text(path: &Path, contents: &str) -> Result<(), ArtifactError> {
    create_parent(path)?;
    fs::write(path, contents).map_err(|e| ArtifactError::io(path, e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Label;

    #[test]
    fn classification_csv_keeps_leading_zero_ids() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        let item = FeedbackItem::new("007", "page is blank, \"again\"", "sw");
        write_classifications(&path, &[ClassificationResult::from_item(&item, Label::Yes)]).unwrap();

        let back = read_classifications(&path).unwrap();
        assert_eq!(back.len(), 1);
        assert_eq!(back[0].id, "007");
        assert_eq!(back[0].text, "page is blank, \"again\"");
        assert_eq!(back[0].label, Label::Yes);

        let raw = fs::read_to_string(&path).unwrap();
        assert!(raw.starts_with("id,text,language,llm_prediction"));
    }

    #[test]
    fn classification_labels_are_read_case_insensitively() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(
            &path,
            "id,text,language,llm_prediction\n1,site down,en,yes\n2,thanks,sw, No \n3,hmm,en,Uncertain\n",
        )
        .unwrap();
        let labels: Vec<Label> = read_classifications(&path)
            .unwrap()
            .into_iter()
            .map(|r| r.label)
            .collect();
        assert_eq!(labels, vec![Label::Yes, Label::No, Label::Uncertain]);
    }

    #[test]
    fn unknown_classification_label_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.csv");
        fs::write(&path, "id,text,language,llm_prediction\n1,x,en,maybe\n").unwrap();
        let err = read_classifications(&path).unwrap_err();
        assert_eq!(err.code(), "invalid_csv");
        assert!(err.to_string().contains("unknown label"));
    }

    #[test]
    fn failure_label_must_be_binary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.csv");
        fs::write(&path, "error_rate,failure_label\n0.1,2\n").unwrap();
        let err = read_logs(&path).unwrap_err();
        assert_eq!(err.code(), "invalid_value");
    }

    #[test]
    fn failure_label_column_is_required() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.csv");
        fs::write(&path, "error_rate\n0.1\n").unwrap();
        assert!(matches!(
            read_logs(&path).unwrap_err(),
            ArtifactError::MissingColumn { column: "failure_label", .. }
        ));
    }

    #[test]
    fn ids_and_probabilities_are_optional_columns() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs.csv");
        fs::write(&path, "id,log_prob,failure_label\nd-1,0.7,1\n,,0\n").unwrap();
        let logs = read_logs(&path).unwrap();
        assert_eq!(logs[0].record_id.as_deref(), Some("d-1"));
        assert_eq!(logs[0].log_prob, Some(0.7));
        assert_eq!(logs[1].record_id, None);
        assert_eq!(logs[1].log_prob, None);
    }
}
