//! End-to-end steps: classify feedback, then fuse with the log table and evaluate.
//!
//! Every step checks its inputs before it computes or writes anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::artifacts::{self, Artifact, ArtifactError};
use crate::batch::{BatchSummary, FeedbackBatchRunner};
use crate::classifier::{ClassificationHarness, ModelBackend};
use crate::config::{ConfigError, RunConfig};
use crate::evaluation::{evaluate_with_limit, EvaluationError};
use crate::fusion::{fuse, FusionError};
use crate::model::{ensure_scored, ModelError};
use crate::report::{build_report, render_report_markdown, ReportStamp, RunReport};
use crate::trace::{JsonlTraceSink, TraceError, TraceSink};

#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Fusion(#[from] FusionError),
    #[error(transparent)]
    Evaluation(#[from] EvaluationError),
    #[error(transparent)]
    Trace(#[from] TraceError),
    #[error("failed to serialize report: {0}")]
    Report(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn code(&self) -> &'static str {
        match self {
            PipelineError::Config(err) => err.code(),
            PipelineError::Artifact(err) => err.code(),
            PipelineError::Model(_) => "model_error",
            PipelineError::Fusion(_) => "fusion_error",
            PipelineError::Evaluation(_) => "evaluation_error",
            PipelineError::Trace(_) => "trace_error",
            PipelineError::Report(_) => "report_error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReportFormat {
    #[default]
    Markdown,
    Json,
}

// =============================================================================
// Classification
// =============================================================================

#[derive(Debug, Clone)]
pub struct ClassifyPaths {
    pub feedback: PathBuf,
    pub out: PathBuf,
    pub trace: Option<PathBuf>,
}

/// Classify the feedback collection with the backend named in `config`.
pub async fn run_classification(
    config: &RunConfig,
    paths: &ClassifyPaths,
) -> Result<BatchSummary, PipelineError> {
    artifacts::require_inputs(&[(Artifact::Feedback, paths.feedback.as_path())])?;
    let backend = config.build_backend()?;
    run_classification_with_backend(config, backend, paths).await
}

pub async fn run_classification_with_backend(
    config: &RunConfig,
    backend: Arc<dyn ModelBackend>,
    paths: &ClassifyPaths,
) -> Result<BatchSummary, PipelineError> {
    artifacts::require_inputs(&[(Artifact::Feedback, paths.feedback.as_path())])?;
    config.validate()?;
    let prompt = config.prompt_template()?;
    let items = artifacts::read_feedback(&paths.feedback)?;
    info!(path = %paths.feedback.display(), items = items.len(), "Loaded feedback");

    let harness = ClassificationHarness::new(backend, prompt, config.harness_config());
    let mut runner = FeedbackBatchRunner::new(harness, config.batch_config());

    let trace_worker = match &paths.trace {
        Some(path) => {
            let (sink, worker) = JsonlTraceSink::new(path)?;
            runner = runner.with_trace(Arc::new(sink) as Arc<dyn TraceSink>);
            Some(worker)
        }
        None => None,
    };

    let results = runner.run(&items).await;
    drop(runner);
    if let Some(worker) = trace_worker {
        worker.join()?;
    }

    artifacts::write_classifications(&paths.out, &results)?;
    info!(path = %paths.out.display(), rows = results.len(), "Wrote classification results");
    Ok(BatchSummary::from_results(&results))
}

// =============================================================================
// Fusion + evaluation
// =============================================================================

#[derive(Debug, Clone)]
pub struct EvaluatePaths {
    pub logs: PathBuf,
    pub results: PathBuf,
    pub out: PathBuf,
    pub report: Option<PathBuf>,
    pub format: ReportFormat,
}

/// Score the log table if needed, fuse it with the classification results,
/// evaluate both predictors and write the fused table (plus optional report).
pub fn run_evaluation(
    config: &RunConfig,
    paths: &EvaluatePaths,
    batch: Option<BatchSummary>,
) -> Result<RunReport, PipelineError> {
    artifacts::require_inputs(&[
        (Artifact::Logs, paths.logs.as_path()),
        (Artifact::Classifications, paths.results.as_path()),
    ])?;
    let fusion = config.fusion_config()?;
    let prompt = config.prompt_template()?;

    let mut logs = artifacts::read_logs(&paths.logs)?;
    let results = artifacts::read_classifications(&paths.results)?;
    info!(
        logs = logs.len(),
        feedback = results.len(),
        "Loaded deployment logs and classification results"
    );

    let scored = ensure_scored(&mut logs, &config.fit)?;
    if scored > 0 {
        info!(scored, "Scored log records with the tabular risk model");
    }

    let fused = fuse(&logs, &results, &fusion)?;
    let evaluation = evaluate_with_limit(
        &fused.records,
        &fused.ground_truth(),
        config.qualitative_examples,
    )?;

    artifacts::write_fused(&paths.out, &fused.records)?;
    info!(path = %paths.out.display(), rows = fused.records.len(), "Wrote fused results");

    let stamp = ReportStamp::new(config.model.clone(), &prompt, &fusion);
    let report = build_report(stamp, fused.alignment, batch, evaluation);

    if let Some(path) = &paths.report {
        write_report(path, &report, paths.format)?;
        info!(path = %path.display(), "Wrote report");
    }
    Ok(report)
}

pub fn write_report(path: &Path, report: &RunReport, format: ReportFormat) -> Result<(), PipelineError> {
    let body = match format {
        ReportFormat::Markdown => render_report_markdown(report),
        ReportFormat::Json => serde_json::to_string_pretty(report)?,
    };
    artifacts::write_text(path, &body)?;
    Ok(())
}

/// Classification followed by evaluation. All inputs are checked up front.
pub async fn run_all(
    config: &RunConfig,
    classify: &ClassifyPaths,
    evaluate: &EvaluatePaths,
) -> Result<RunReport, PipelineError> {
    artifacts::require_inputs(&[
        (Artifact::Feedback, classify.feedback.as_path()),
        (Artifact::Logs, evaluate.logs.as_path()),
    ])?;
    let summary = run_classification(config, classify).await?;
    run_evaluation(config, evaluate, Some(summary))
}
