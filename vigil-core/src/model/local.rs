//! Local Ollama backend.

use async_trait::async_trait;
use serde_json::{Value, json};
use std::time::Duration;
use tracing::debug;

use super::remote::{map_http_error, map_send_error};
use super::{ModelBackend, PredictOptions, Prediction, estimate_tokens};
use crate::config::LlmConfig;
use crate::error::ModelError;

const DEFAULT_BASE_URL: &str = "http://localhost:11434";

/// Calls a local Ollama server's non-streaming `/api/generate` endpoint.
#[derive(Debug)]
pub struct LocalBackend {
    client: reqwest::Client,
    base_url: String,
    model: String,
    timeout_secs: u64,
}

impl LocalBackend {
    pub fn new(config: &LlmConfig) -> Result<Self, ModelError> {
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
            model: config.model.clone(),
            timeout_secs: config.request_timeout_secs,
        })
    }

    /// Ollama omits eval counts on some cached replies, so fall back to
    /// tokenizer estimates.
    fn parse_response(
        json: &Value,
        prompt: &str,
        fallback_model: &str,
    ) -> Result<Prediction, ModelError> {
        let text = json
            .get("response")
            .and_then(|r| r.as_str())
            .ok_or_else(|| ModelError::ResponseParse {
                message: "missing 'response' field".to_string(),
            })?;

        let prompt_tokens = json
            .get("prompt_eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| estimate_tokens(prompt));
        let completion_tokens = json
            .get("eval_count")
            .and_then(|v| v.as_u64())
            .unwrap_or_else(|| estimate_tokens(text));

        Ok(Prediction {
            text: text.to_string(),
            prompt_tokens,
            completion_tokens,
            model_version: json
                .get("model")
                .and_then(|m| m.as_str())
                .unwrap_or(fallback_model)
                .to_string(),
        })
    }
}

#[async_trait]
impl ModelBackend for LocalBackend {
    async fn predict(
        &self,
        prompt: &str,
        options: &PredictOptions,
    ) -> Result<Prediction, ModelError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "options": {
                "num_predict": options.max_tokens,
                "temperature": options.temperature,
            },
        });

        debug!(url = %url, model = %self.model, "Sending local generate request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| map_send_error(e, self.timeout_secs))?;

        let status = response.status();
        let response_body = response.text().await.map_err(|e| ModelError::ApiRequest {
            message: format!("Failed to read response body: {e}"),
        })?;

        if !status.is_success() {
            return Err(map_http_error("local", status, &response_body));
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_response_with_counts() {
        let json = json!({
            "model": "llama3:8b",
            "response": "Reset the account password.",
            "prompt_eval_count": 42,
            "eval_count": 7,
            "done": true
        });
        let p = LocalBackend::parse_response(&json, "prompt", "llama3").unwrap();
        assert_eq!(p.prompt_tokens, 42);
        assert_eq!(p.completion_tokens, 7);
        assert_eq!(p.model_version, "llama3:8b");
    }

    #[test]
    fn test_parse_response_estimates_missing_counts() {
        let json = json!({"response": "Block the sender domain."});
        let p = LocalBackend::parse_response(&json, "System: x\nUser: y", "llama3").unwrap();
        assert!(p.prompt_tokens > 0);
        assert!(p.completion_tokens > 0);
        assert_eq!(p.model_version, "llama3");
    }

    #[test]
    fn test_default_base_url() {
        let backend = LocalBackend::new(&LlmConfig::default()).unwrap();
        assert_eq!(backend.base_url, "http://localhost:11434");
    }
}
