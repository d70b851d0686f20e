//! Error types for model invocation.
//!
//! None of these escape the harness: every variant collapses into the
//! `ERROR` label for the affected message. They exist so traces and logs can
//! say *why*.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while asking a model backend for a reply.
#[derive(Debug, Error)]
pub enum InvocationError {
    /// The model process could not be started (binary missing, permissions).
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The model process exited unsuccessfully.
    #[error("model process exited with {}: {stderr}", exit_code_text(.code))]
    NonZeroExit { code: Option<i32>, stderr: String },

    /// No reply within the caller-supplied timeout.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// Reading from or writing to the model process failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP/network error from the HTTP backend.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The HTTP backend answered with an error status or an unusable body.
    #[error("{backend} error (status {status:?}): {message}")]
    Backend {
        backend: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// Configuration error (bad URL, empty command).
    #[error("configuration error: {0}")]
    Config(String),
}

impl InvocationError {
    pub fn backend(backend: &'static str, status: Option<u16>, message: impl Into<String>) -> Self {
        Self::Backend {
            backend,
            status,
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Short error code for traces and logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Spawn { .. } => "spawn_failed",
            Self::NonZeroExit { .. } => "non_zero_exit",
            Self::Timeout(_) => "timeout",
            Self::Io(_) => "io_error",
            Self::Http(e) if e.is_timeout() => "timeout",
            Self::Http(_) => "http_error",
            Self::Backend { .. } => "backend_error",
            Self::Config(_) => "config_error",
        }
    }
}

fn exit_code_text(code: &Option<i32>) -> String {
    match code {
        Some(c) => format!("status {c}"),
        None => "no status (killed by signal)".to_string(),
    }
}
