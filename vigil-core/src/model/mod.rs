//! Generative-model capability.
//!
//! Everything that talks to a model (the analyst and planner stages, the
//! guardrail layer, the cost governor) depends only on [`ModelBackend`].
//! Concrete variants live in submodules and are chosen once at startup by
//! [`build_backend`].

pub mod extract;
pub mod local;
pub mod remote;
pub mod stub;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, OnceLock};

use crate::config::{BackendKind, LlmConfig};
use crate::error::ModelError;

pub use extract::extract_json_object;
pub use local::LocalBackend;
pub use remote::RemoteBackend;
pub use stub::StubBackend;

/// Sampling parameters for a single call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PredictOptions {
    pub max_tokens: usize,
    pub temperature: f32,
    /// Caller tag recorded in the usage ledger ("analyst", "guardrail", ...).
    pub agent: &'static str,
}

impl Default for PredictOptions {
    fn default() -> Self {
        Self {
            max_tokens: 200,
            temperature: 0.7,
            agent: "default",
        }
    }
}

impl PredictOptions {
    pub fn new(max_tokens: usize, temperature: f32) -> Self {
        Self {
            max_tokens,
            temperature,
            ..Self::default()
        }
    }

    pub fn for_agent(mut self, agent: &'static str) -> Self {
        self.agent = agent;
        self
    }
}

/// A completed generation with its token accounting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub text: String,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub model_version: String,
}

impl Prediction {
    pub fn total_tokens(&self) -> u64 {
        self.prompt_tokens + self.completion_tokens
    }
}

/// A source of completions.
#[async_trait]
pub trait ModelBackend: Send + Sync {
    /// Generate a completion for a fully framed prompt.
    async fn predict(&self, prompt: &str, options: &PredictOptions)
    -> Result<Prediction, ModelError>;

    /// Identifier recorded in usage ledgers and remediation records.
    fn model_name(&self) -> &str;
}

#[async_trait]
impl<T: ModelBackend + ?Sized> ModelBackend for Arc<T> {
    async fn predict(
        &self,
        prompt: &str,
        options: &PredictOptions,
    ) -> Result<Prediction, ModelError> {
        (**self).predict(prompt, options).await
    }

    fn model_name(&self) -> &str {
        (**self).model_name()
    }
}

/// Construct the configured backend variant.
pub fn build_backend(config: &LlmConfig) -> Result<Arc<dyn ModelBackend>, ModelError> {
    let backend: Arc<dyn ModelBackend> = match config.backend {
        BackendKind::Stub => Arc::new(StubBackend::new()),
        BackendKind::Local => Arc::new(LocalBackend::new(config)?),
        BackendKind::Remote => Arc::new(RemoteBackend::new(config)?),
    };
    tracing::debug!(backend = %config.backend, model = backend.model_name(), "Model backend ready");
    Ok(backend)
}

/// Estimate token counts with the cl100k tokenizer, falling back to a
/// four-characters-per-token heuristic if the tokenizer cannot load.
pub fn estimate_tokens(text: &str) -> u64 {
    static BPE: OnceLock<Option<tiktoken_rs::CoreBPE>> = OnceLock::new();
    match BPE.get_or_init(|| tiktoken_rs::cl100k_base().ok()) {
        Some(bpe) => bpe.encode_with_special_tokens(text).len() as u64,
        None => (text.chars().count() / 4) as u64,
    }
}
