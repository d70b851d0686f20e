#![forbid(unsafe_code)]

//! # signal-fusion
//!
//! Asks a small local LLM whether each piece of citizen feedback describes a
//! technical problem, then fuses that YES/NO signal with a tabular model's
//! deployment-failure probability and measures whether the fused predictor
//! beats the logs-only one.
//!
//! The stages are independent: [`classifier`] + [`batch`] produce a
//! classification table, [`model`] scores the log table, [`fusion`] pairs the
//! two and [`evaluation`] compares both predictors against ground truth.
//! [`pipeline`] wires them to on-disk [`artifacts`].

pub mod artifacts;
pub mod batch;
pub mod classifier;
pub mod config;
pub mod evaluation;
pub mod fusion;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod report;
pub mod trace;
pub mod types;

pub use artifacts::{Artifact, ArtifactError};
pub use batch::{BatchConfig, BatchSummary, FeedbackBatchRunner};
pub use classifier::{
    parse_reply, ClassificationHarness, ClassificationOutcome, InvocationError, ModelBackend,
    ModelCommand, OllamaHttpBackend, SubprocessBackend, TextClassifier,
};
pub use config::{BackendKind, ConfigError, RunConfig};
pub use evaluation::{evaluate, EvaluationError, EvaluationReport, MetricSet, Qualitative};
pub use fusion::{fuse, Alignment, AlignmentReport, FusionConfig, FusionError, FusionOutput, FusionWeights};
pub use model::{LogisticRiskModel, ModelError, RiskModel};
pub use pipeline::{PipelineError, ReportFormat};
pub use report::{build_report, render_report_markdown, RunReport};
pub use trace::{ClassificationTrace, JsonlTraceSink, TraceError, TraceSink, TraceWorker};
pub use types::{ClassificationResult, FeatureVector, FeedbackItem, FusedRecord, Label, LogRecord};
