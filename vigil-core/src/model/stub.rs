//! Deterministic backend for tests and dry runs.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ModelBackend, PredictOptions, Prediction};
use crate::error::ModelError;

const STUB_MODEL: &str = "stub-v1";
const STUB_TEXT: &str = "This is a stubbed response for testing.";

/// Returns queued responses in FIFO order, then a fixed canned reply.
///
/// Every prompt it receives is recorded so tests can assert on what the
/// pipeline actually sent.
pub struct StubBackend {
    default_text: String,
    queue: Mutex<VecDeque<Result<Prediction, ModelError>>>,
    prompts: Mutex<Vec<String>>,
}

impl Default for StubBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl StubBackend {
    pub fn new() -> Self {
        Self::with_default(STUB_TEXT)
    }

    /// A stub whose fallback reply is `text` instead of the canned sentence.
    pub fn with_default(text: impl Into<String>) -> Self {
        Self {
            default_text: text.into(),
            queue: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// A stub that replies with each of `texts` in turn.
    pub fn scripted<I, S>(texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let stub = Self::new();
        for text in texts {
            stub.queue_text(text);
        }
        stub
    }

    /// Build a prediction with the stub's fixed token counts.
    pub fn text_prediction(text: impl Into<String>) -> Prediction {
        Prediction {
            text: text.into(),
            prompt_tokens: 10,
            completion_tokens: 8,
            model_version: STUB_MODEL.to_string(),
        }
    }

    pub fn queue_text(&self, text: impl Into<String>) {
        self.queue_prediction(Self::text_prediction(text));
    }

    pub fn queue_prediction(&self, prediction: Prediction) {
        self.lock_queue().push_back(Ok(prediction));
    }

    /// Make the next call fail with `error`.
    pub fn queue_error(&self, error: ModelError) {
        self.lock_queue().push_back(Err(error));
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn call_count(&self) -> usize {
        self.prompts.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    fn lock_queue(&self) -> std::sync::MutexGuard<'_, VecDeque<Result<Prediction, ModelError>>> {
        self.queue.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ModelBackend for StubBackend {
    async fn predict(
        &self,
        prompt: &str,
        _options: &PredictOptions,
    ) -> Result<Prediction, ModelError> {
        self.prompts
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(prompt.to_string());

        let next = self.lock_queue().pop_front();
        next.unwrap_or_else(|| Ok(Self::text_prediction(self.default_text.clone())))
    }

    fn model_name(&self) -> &str {
        STUB_MODEL
    }
}
