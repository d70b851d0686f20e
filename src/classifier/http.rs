//! Ollama HTTP backend (`POST /api/generate`, non-streaming).

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::error::InvocationError;
use super::ModelBackend;

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Maximum accepted reply length. Triage replies are a word or two.
const MAX_RESPONSE_LEN: usize = 64 * 1024;

#[derive(Debug, Clone)]
pub struct OllamaHttpBackend {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

impl OllamaHttpBackend {
    pub fn new(base_url: impl Into<String>) -> Result<Self, InvocationError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(InvocationError::config("ollama base URL is empty"));
        }
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| InvocationError::config(format!("Failed to create HTTP client: {e}")))?;
        Ok(Self { client, base_url })
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }
}

#[async_trait]
impl ModelBackend for OllamaHttpBackend {
    fn name(&self) -> &'static str {
        "ollama_http"
    }

    async fn complete(
        &self,
        model: &str,
        prompt: &str,
        timeout: Duration,
    ) -> Result<String, InvocationError> {
        let body = GenerateRequest {
            model,
            prompt,
            stream: false,
        };

        let mut resp = self
            .client
            .post(self.generate_url())
            .timeout(timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_reqwest(e, timeout))?;

        let status = resp.status();

        // Stream the body so an oversized reply is cut off before it is buffered.
        let mut bytes = Vec::new();
        while let Some(chunk) = resp.chunk().await.map_err(|e| map_reqwest(e, timeout))? {
            let new_len = bytes.len() + chunk.len();
            if new_len > MAX_RESPONSE_LEN {
                return Err(InvocationError::backend(
                    "ollama_http",
                    Some(status.as_u16()),
                    format!("response too large: {new_len} bytes"),
                ));
            }
            bytes.extend_from_slice(&chunk);
        }
        let text = String::from_utf8_lossy(&bytes);

        if !status.is_success() {
            let message: String = text.chars().take(500).collect();
            return Err(InvocationError::backend(
                "ollama_http",
                Some(status.as_u16()),
                message,
            ));
        }

        let parsed: GenerateResponse = serde_json::from_str(&text).map_err(|e| {
            InvocationError::backend("ollama_http", Some(status.as_u16()), e.to_string())
        })?;

        if let Some(err) = parsed.error {
            return Err(InvocationError::backend(
                "ollama_http",
                Some(status.as_u16()),
                err,
            ));
        }

        parsed.response.ok_or_else(|| {
            InvocationError::backend("ollama_http", Some(status.as_u16()), "missing 'response'")
        })
    }
}

fn map_reqwest(err: reqwest::Error, timeout: Duration) -> InvocationError {
    if err.is_timeout() {
        InvocationError::Timeout(timeout)
    } else {
        InvocationError::Http(err)
    }
}
