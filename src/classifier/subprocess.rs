//! Line-oriented subprocess backend (e.g. `ollama run <model>`).
//!
//! The prompt goes to the child's stdin, the reply is whatever it prints on
//! stdout. The whole exchange runs under one timeout; on expiry the child is
//! killed and nothing it printed is used.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use super::error::InvocationError;
use super::ModelBackend;

/// Placeholder in command arguments that is replaced by the model identifier.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Keep at most this much stderr in error messages.
const MAX_STDERR_CHARS: usize = 2_000;

/// Program + argument template used to launch the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelCommand {
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Default for ModelCommand {
    fn default() -> Self {
        Self {
            program: "ollama".to_string(),
            args: vec!["run".to_string(), MODEL_PLACEHOLDER.to_string()],
        }
    }
}

impl ModelCommand {
    pub fn new<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Arguments with the model placeholder substituted.
    pub fn resolved_args(&self, model: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|a| a.replace(MODEL_PLACEHOLDER, model))
            .collect()
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubprocessBackend {
    command: ModelCommand,
}

impl SubprocessBackend {
    pub fn new(command: ModelCommand) -> Result<Self, InvocationError> {
        if command.program.trim().is_empty() {
            return Err(InvocationError::config("model command program is empty"));
        }
        Ok(Self { command })
    }

    pub fn command(&self) -> &ModelCommand {
        &self.command
    }
}

#[async_trait]
impl ModelBackend for SubprocessBackend {
    fn name(&self) -> &'static str {
        "subprocess"
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, InvocationError> {
        let mut child = Command::new(&self.command.program)
            .args(self.command.resolved_args(model))
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| InvocationError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;

        let mut stdin = child
            .stdin
            .take()
            .ok_or_else(|| InvocationError::config("child stdin was not captured"))?;
        let payload = prompt.as_bytes().to_vec();

        // Feed stdin while draining stdout/stderr so a large prompt cannot
        // deadlock against a full output pipe.
        let exchange = async move {
            let write = async move {
                let written = stdin.write_all(&payload).await;
                drop(stdin);
                written
            };
            tokio::join!(write, child.wait_with_output())
        };

        // Dropping `exchange` on timeout drops the child, which kills it.
        let (written, output) = tokio::time::timeout(timeout, exchange)
            .await
            .map_err(|_| InvocationError::Timeout(timeout))?;

        let output = output?;
        if let Err(err) = written {
            // A model that answers without reading all input closes the pipe early.
            if err.kind() != std::io::ErrorKind::BrokenPipe {
                return Err(InvocationError::Io(err));
            }
        }

        if !output.status.success() {
            let stderr: String = String::from_utf8_lossy(&output.stderr)
                .trim()
                .chars()
                .take(MAX_STDERR_CHARS)
                .collect();
            return Err(InvocationError::NonZeroExit {
                code: output.status.code(),
                stderr,
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_command_is_ollama_run() {
        let cmd = ModelCommand::default();
        assert_eq!(cmd.program, "ollama");
        assert_eq!(cmd.resolved_args("qwen:0.5b"), vec!["run", "qwen:0.5b"]);
    }

    #[test]
    fn empty_program_is_rejected() {
        let err = SubprocessBackend::new(ModelCommand::new("  ", Vec::<String>::new())).unwrap_err();
        assert_eq!(err.code(), "config_error");
    }
}
