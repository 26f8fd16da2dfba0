//! OpenAI-compatible chat completions backend.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::{ModelBackend, PredictOptions, Prediction, estimate_tokens};
use crate::config::LlmConfig;
use crate::error::ModelError;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Sends each framed prompt as a single user message to `{base_url}/chat/completions`.
pub struct RemoteBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    timeout_secs: u64,
}

impl std::fmt::Debug for RemoteBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteBackend")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish()
    }
}

impl RemoteBackend {
    /// Build the backend, reading the API key from `config.api_key_env`.
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| ModelError::AuthFailed {
            backend: format!("remote (set {})", config.api_key_env),
        })?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ModelError::Connection {
                message: format!("Failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
                .trim_end_matches('/')
                .to_string(),
            api_key,
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Extract text and usage from a chat completions response body.
    ///
    /// Some compatible servers omit `usage`; counts then come from the
    /// tokenizer so every call is still priced.
    fn parse_response(
        json: &Value,
        prompt: &str,
        fallback_model: &str,
    ) -> Result<Prediction, ModelError> {
        let text = json
            .get("choices")
            .and_then(|c| c.get(0))
            .and_then(|c| c.get("message"))
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .ok_or_else(|| ModelError::ResponseParse {
                message: "missing choices[0].message.content".to_string(),
            })?;

        let usage = json.get("usage");
        let count = |key: &str| usage.and_then(|u| u.get(key)).and_then(|v| v.as_u64());

        Ok(Prediction {
            text: text.to_string(),
            prompt_tokens: count("prompt_tokens").unwrap_or_else(|| estimate_tokens(prompt)),
            completion_tokens: count("completion_tokens").unwrap_or_else(|| estimate_tokens(text)),
            model_version: json
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(fallback_model)
                .to_string(),
        })
    }
}

/// Map an HTTP status code to the appropriate ModelError.
pub(crate) fn map_http_error(backend: &str, status: reqwest::StatusCode, body: &str) -> ModelError {
    match status.as_u16() {
        401 | 403 => {
            debug!(body = %body, status = status.as_u16(), "Authentication failed");
            ModelError::AuthFailed {
                backend: backend.to_string(),
            }
        }
        429 => ModelError::RateLimited {
            retry_after_secs: 5,
        },
        code if code >= 500 => ModelError::ApiRequest {
            message: format!("Server error ({code}): {body}"),
        },
        code => ModelError::ApiRequest {
            message: format!("HTTP {code}: {body}"),
        },
    }
}

pub(crate) fn map_send_error(err: reqwest::Error, timeout_secs: u64) -> ModelError {
    if err.is_timeout() {
        ModelError::Timeout { timeout_secs }
    } else if err.is_connect() {
        ModelError::Connection {
            message: err.to_string(),
        }
    } else {
        ModelError::ApiRequest {
            message: format!("Request failed: {err}"),
        }
    }
}

#[async_trait]
impl ModelBackend for RemoteBackend {
    async fn predict(
        &self,
        prompt: &str,
        options: &PredictOptions,
    ) -> Result<Prediction, ModelError> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.model,
            "messages": [{"role": "user", "content": prompt}],
            "max_tokens": options.max_tokens,
            "temperature": options.temperature,
            "stream": false,
        });

        debug!(url = %url, model = %self.model, "Sending remote completion request");

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| ModelError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(map_http_error("remote", status, &response_body));
        }

        let json: Value =
            serde_json::from_str(&response_body).map_err(|e| ModelError::ResponseParse {
                message: format!("Invalid JSON: {e}"),
            })?;

        Self::parse_response(&json, prompt, &self.model)
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
