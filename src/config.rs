//! Run configuration: defaults, optional JSON file, environment overrides.
//!
//! CLI flags are applied on top by the binary.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::batch::{BatchConfig, DEFAULT_CALL_DELAY};
use crate::classifier::http::DEFAULT_OLLAMA_URL;
use crate::classifier::{
    HarnessConfig, InvocationError, ModelBackend, ModelCommand, OllamaHttpBackend,
    SubprocessBackend, DEFAULT_MODEL, DEFAULT_TIMEOUT,
};
use crate::evaluation::DEFAULT_QUALITATIVE_LIMIT;
use crate::fusion::{
    Alignment, FusionConfig, FusionError, FusionWeights, DEFAULT_FEEDBACK_WEIGHT,
    DEFAULT_LOG_WEIGHT, DEFAULT_THRESHOLD,
};
use crate::model::FitConfig;
use crate::prompts::{prompt_by_slug, PromptTemplate, DEFAULT_PROMPT, PROMPTS};

pub const ENV_MODEL: &str = "SIGFUSE_MODEL";
pub const ENV_TIMEOUT_SECONDS: &str = "SIGFUSE_TIMEOUT_SECONDS";
pub const ENV_OLLAMA_URL: &str = "SIGFUSE_OLLAMA_URL";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid value for {key}: '{value}'")]
    InvalidEnv { key: &'static str, value: String },
    #[error("invalid {key}: {reason}")]
    InvalidValue { key: &'static str, reason: String },
    #[error("unknown prompt template '{0}'")]
    UnknownPrompt(String),
    #[error(transparent)]
    Fusion(#[from] FusionError),
    #[error(transparent)]
    Backend(#[from] InvocationError),
}

impl ConfigError {
    pub fn code(&self) -> &'static str {
        match self {
            ConfigError::Read { .. } => "config_read",
            ConfigError::Parse { .. } => "config_parse",
            ConfigError::InvalidEnv { .. } => "invalid_env",
            ConfigError::InvalidValue { .. } => "invalid_value",
            ConfigError::UnknownPrompt(_) => "unknown_prompt",
            ConfigError::Fusion(_) => "invalid_fusion",
            ConfigError::Backend(err) => err.code(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    /// Spawn the model CLI once per message.
    #[default]
    Subprocess,
    /// Talk to an Ollama server over HTTP.
    Http,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunConfig {
    pub model: String,
    pub backend: BackendKind,
    pub command: ModelCommand,
    pub ollama_url: String,
    pub timeout_secs: u64,
    pub delay_ms: u64,
    pub concurrency: usize,
    pub prompt: String,
    pub log_weight: f64,
    pub feedback_weight: f64,
    pub threshold: f64,
    pub alignment: Alignment,
    pub qualitative_examples: usize,
    pub fit: FitConfig,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            backend: BackendKind::default(),
            command: ModelCommand::default(),
            ollama_url: DEFAULT_OLLAMA_URL.to_string(),
            timeout_secs: DEFAULT_TIMEOUT.as_secs(),
            delay_ms: DEFAULT_CALL_DELAY.as_millis() as u64,
            concurrency: 1,
            prompt: DEFAULT_PROMPT.slug.to_string(),
            log_weight: DEFAULT_LOG_WEIGHT,
            feedback_weight: DEFAULT_FEEDBACK_WEIGHT,
            threshold: DEFAULT_THRESHOLD,
            alignment: Alignment::default(),
            qualitative_examples: DEFAULT_QUALITATIVE_LIMIT,
            fit: FitConfig::default(),
        }
    }
}

impl RunConfig {
    /// Defaults overlaid with a JSON file. Absent keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let display = path.display().to_string();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: display.clone(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: display,
            source,
        })
    }

    pub fn apply_env(&mut self) -> Result<(), ConfigError> {
        self.apply_env_from(|key| std::env::var(key).ok())
    }

    pub fn apply_env_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(model) = lookup(ENV_MODEL).filter(|s| !s.trim().is_empty()) {
            self.model = model.trim().to_string();
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_SECONDS) {
            self.timeout_secs = raw
                .trim()
                .parse::<u64>()
                .ok()
                .filter(|secs| *secs > 0)
                .ok_or(ConfigError::InvalidEnv {
                    key: ENV_TIMEOUT_SECONDS,
                    value: raw,
                })?;
        }
        if let Some(url) = lookup(ENV_OLLAMA_URL).filter(|s| !s.trim().is_empty()) {
            self.ollama_url = url.trim().to_string();
        }
        Ok(())
    }

    /// Reject settings that would make every model call fail.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "timeout_secs",
                reason: "must be at least 1 second".to_string(),
            });
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                key: "model",
                reason: "must not be empty".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fusion_config(&self) -> Result<FusionConfig, ConfigError> {
        let weights = FusionWeights::new(self.log_weight, self.feedback_weight)?;
        Ok(FusionConfig::new(weights, self.threshold, self.alignment)?)
    }

    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            delay: Duration::from_millis(self.delay_ms),
            concurrency: self.concurrency.max(1),
        }
    }

    pub fn harness_config(&self) -> HarnessConfig {
        HarnessConfig {
            model: self.model.clone(),
            timeout: self.timeout(),
        }
    }

    pub fn prompt_template(&self) -> Result<PromptTemplate, ConfigError> {
        prompt_by_slug(&self.prompt).ok_or_else(|| ConfigError::UnknownPrompt(self.prompt.clone()))
    }

    pub fn build_backend(&self) -> Result<Arc<dyn ModelBackend>, ConfigError> {
        let backend: Arc<dyn ModelBackend> = match self.backend {
            BackendKind::Subprocess => Arc::new(SubprocessBackend::new(self.command.clone())?),
            BackendKind::Http => Arc::new(OllamaHttpBackend::new(self.ollama_url.clone())?),
        };
        Ok(backend)
    }

    /// Slugs accepted by [`RunConfig::prompt`].
    pub fn prompt_slugs() -> Vec<&'static str> {
        PROMPTS.iter().map(|p| p.slug).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_match_documented_values() {
        let cfg = RunConfig::default();
        assert_eq!(cfg.model, "qwen:0.5b");
        assert_eq!(cfg.timeout(), Duration::from_secs(30));
        assert_eq!(cfg.batch_config().delay, Duration::from_millis(500));
        let fusion = cfg.fusion_config().unwrap();
        assert_eq!(fusion.weights.log(), 0.6);
        assert_eq!(fusion.threshold, 0.5);
        assert_eq!(fusion.alignment, Alignment::Positional);
    }

    #[test]
    fn partial_file_keeps_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cfg.json");
        std::fs::write(&path, r#"{"threshold": 0.7, "alignment": "keyed", "backend": "http"}"#).unwrap();
        let cfg = RunConfig::load(&path).unwrap();
        assert_eq!(cfg.threshold, 0.7);
        assert_eq!(cfg.alignment, Alignment::Keyed);
        assert_eq!(cfg.backend, BackendKind::Http);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.command, ModelCommand::default());
    }

    #[test]
    fn env_overrides_file_values() {
        let env: HashMap<&str, &str> = [(ENV_MODEL, "llama3"), (ENV_TIMEOUT_SECONDS, "5")].into();
        let mut cfg = RunConfig::default();
        cfg.apply_env_from(|k| env.get(k).map(|v| v.to_string())).unwrap();
        assert_eq!(cfg.model, "llama3");
        assert_eq!(cfg.timeout_secs, 5);
        assert_eq!(cfg.ollama_url, DEFAULT_OLLAMA_URL);
    }

    #[test]
    fn bad_env_timeout_is_rejected() {
        let mut cfg = RunConfig::default();
        let err = cfg
            .apply_env_from(|k| (k == ENV_TIMEOUT_SECONDS).then(|| "soon".to_string()))
            .unwrap_err();
        assert_eq!(err.code(), "invalid_env");
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let cfg = RunConfig {
            timeout_secs: 0,
            ..RunConfig::default()
        };
        let err = cfg.validate().unwrap_err();
        assert_eq!(err.code(), "invalid_value");
        assert!(RunConfig::default().validate().is_ok());
    }

    #[test]
    fn invalid_weights_surface_as_config_errors() {
        let cfg = RunConfig {
            log_weight: 0.9,
            ..RunConfig::default()
        };
        assert!(matches!(cfg.fusion_config(), Err(ConfigError::Fusion(_))));
    }

    #[test]
    fn unknown_prompt_slug_is_rejected() {
        let cfg = RunConfig {
            prompt: "nope".into(),
            ..RunConfig::default()
        };
        assert!(matches!(cfg.prompt_template(), Err(ConfigError::UnknownPrompt(_))));
        assert!(RunConfig::prompt_slugs().contains(&DEFAULT_PROMPT.slug));
    }
}
