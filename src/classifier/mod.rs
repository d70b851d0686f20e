//! Feedback triage harness: one message in, one four-state label out.
//!
//! The harness renders a prompt, makes exactly one backend call under a
//! timeout, and parses the reply. Backend failures never escape; they become
//! [`Label::Error`].

pub mod error;
pub mod http;
pub mod subprocess;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::warn;

use crate::prompts::{PromptTemplate, DEFAULT_PROMPT};
use crate::types::Label;

pub use error::InvocationError;
pub use http::OllamaHttpBackend;
pub use subprocess::{ModelCommand, SubprocessBackend};

pub const DEFAULT_MODEL: &str = "qwen:0.5b";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

// =============================================================================
// Seams
// =============================================================================

/// Something that can turn a prompt into a free-text reply.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, InvocationError>;
}

/// The capability the batch runner depends on: classify text under a timeout.
#[async_trait]
pub trait TextClassifier: Send + Sync {
    async fn triage(&self, text: &str) -> ClassificationOutcome;

    /// Model and prompt identity, stamped into traces.
    fn identity(&self) -> ClassifierIdentity {
        ClassifierIdentity::default()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierIdentity {
    pub model: String,
    pub prompt_template_slug: String,
    pub template_hash: String,
}

impl Default for ClassifierIdentity {
    fn default() -> Self {
        Self {
            model: "unknown".to_string(),
            prompt_template_slug: "unknown".to_string(),
            template_hash: String::new(),
        }
    }
}

// =============================================================================
// Reply parsing
// =============================================================================

/// Map a raw model reply to a label.
///
/// Upper-cases and searches for `YES` before `NO`, so a reply containing both
/// is a YES. Matching is by substring, so "NOT SURE" counts as NO.
pub fn parse_reply(raw: &str) -> Label {
    let upper = raw.trim().to_uppercase();
    if upper.contains("YES") {
        Label::Yes
    } else if upper.contains("NO") {
        Label::No
    } else {
        Label::Uncertain
    }
}

// =============================================================================
// Harness
// =============================================================================

/// Everything known about one classification call.
#[derive(Debug, Clone)]
pub struct ClassificationOutcome {
    pub label: Label,
    /// Raw model reply. `None` when the call failed.
    pub raw_reply: Option<String>,
    pub latency: Duration,
    pub error_code: Option<&'static str>,
    pub error_message: Option<String>,
}

impl ClassificationOutcome {
    pub fn answered(raw: String, latency: Duration) -> Self {
        Self {
            label: parse_reply(&raw),
            raw_reply: Some(raw),
            latency,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(err: &InvocationError, latency: Duration) -> Self {
        Self {
            label: Label::Error,
            raw_reply: None,
            latency,
            error_code: Some(err.code()),
            error_message: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HarnessConfig {
    pub model: String,
    pub timeout: Duration,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

pub struct ClassificationHarness {
    backend: Arc<dyn ModelBackend>,
    prompt: PromptTemplate,
    config: HarnessConfig,
}

impl ClassificationHarness {
    pub fn new(backend: Arc<dyn ModelBackend>, prompt: PromptTemplate, config: HarnessConfig) -> Self {
        Self {
            backend,
            prompt,
            config,
        }
    }

    /// Harness with the default prompt, model and timeout.
    pub fn with_backend(backend: Arc<dyn ModelBackend>) -> Self {
        Self::new(backend, DEFAULT_PROMPT, HarnessConfig::default())
    }

    pub fn prompt(&self) -> &PromptTemplate {
        &self.prompt
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    /// Classify `text` with an explicit model and timeout.
    pub async fn classify(&self, text: &str, model: &str, timeout: Duration) -> Label {
        self.run_once(text, model, timeout).await.label
    }

    /// One backend call, no retry. Failures are folded into the outcome.
    pub async fn run_once(&self, text: &str, model: &str, timeout: Duration) -> ClassificationOutcome {
        let prompt = self.prompt.render(text);
        let started = Instant::now();
        let result = self.backend.complete(model, &prompt.text, timeout).await;
        let latency = started.elapsed();

        match result {
            Ok(raw) => ClassificationOutcome::answered(raw, latency),
            Err(err) => {
                warn!(
                    backend = self.backend.name(),
                    model,
                    code = err.code(),
                    error = %err,
                    "Model invocation failed; labelling message ERROR"
                );
                ClassificationOutcome::failed(&err, latency)
            }
        }
    }
}

#[async_trait]
impl TextClassifier for ClassificationHarness {
    async fn triage(&self, text: &str) -> ClassificationOutcome {
        self.run_once(text, &self.config.model, self.config.timeout)
            .await
    }

    fn identity(&self) -> ClassifierIdentity {
        ClassifierIdentity {
            model: self.config.model.clone(),
            prompt_template_slug: self.prompt.slug.to_string(),
            template_hash: self.prompt.hash(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
