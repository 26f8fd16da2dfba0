//! Layer C: generative guardrail.
//!
//! The model is asked, under the fixed guardrail prompt, whether the plan is
//! safe. Anything other than a well-formed `"safe"` decision fails closed.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::model::{ModelBackend, PredictOptions, extract_json_object};
use crate::prompts::{PromptRole, system_prompt};
use crate::types::Verdict;

pub const MALFORMED_REASON: &str = "malformed guardrail output";

const GUARDRAIL_MAX_TOKENS: usize = 100;

/// How the guardrail reply was interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailOutcome {
    Safe,
    Unsafe,
    /// Reply could not be parsed or carried an unknown decision.
    Malformed,
    /// The model call failed for a reason other than budget.
    Unavailable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GuardrailResult {
    pub verdict: Verdict,
    pub outcome: GuardrailOutcome,
    pub reasoning: String,
}

impl GuardrailResult {
    fn fail(outcome: GuardrailOutcome, reasoning: impl Into<String>) -> Self {
        Self {
            verdict: Verdict::Fail,
            outcome,
            reasoning: reasoning.into(),
        }
    }
}

pub struct LlmGuardrail {
    model: Arc<dyn ModelBackend>,
}

impl std::fmt::Debug for LlmGuardrail {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmGuardrail")
            .field("model", &self.model.model_name())
            .finish()
    }
}

impl LlmGuardrail {
    pub fn new(model: Arc<dyn ModelBackend>) -> Self {
        Self { model }
    }

    pub fn prompt_for(text: &str) -> String {
        format!(
            "{}\n\nInput to AI Agent:\n{text}\n\nOutput (JSON):",
            system_prompt(PromptRole::Guardrail)
        )
    }

    /// Screen `text`. Only `BudgetExceeded` is returned as an error.
    pub async fn check(&self, text: &str) -> Result<GuardrailResult, ModelError> {
        let options = PredictOptions::new(GUARDRAIL_MAX_TOKENS, 0.0).for_agent(PromptRole::Guardrail.as_str());
        let prediction = match self.model.predict(&Self::prompt_for(text), &options).await {
            Ok(p) => p,
            Err(e @ ModelError::BudgetExceeded { .. }) => return Err(e),
            Err(e) => {
                warn!(error = %e, "Guardrail model call failed, failing closed");
                return Ok(GuardrailResult::fail(
                    GuardrailOutcome::Unavailable,
                    format!("guardrail unavailable: {e}"),
                ));
            }
        };

        Ok(Self::interpret(&prediction.text))
    }

    /// Map a raw guardrail reply to a result.
    pub fn interpret(reply: &str) -> GuardrailResult {
        let object = match extract_json_object(reply) {
            Ok(object) => object,
            Err(e) => {
                debug!(error = %e, "Guardrail reply is not JSON");
                return GuardrailResult::fail(GuardrailOutcome::Malformed, MALFORMED_REASON);
            }
        };

        let reasoning = object
            .get("reasoning")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        match object.get("decision").and_then(|v| v.as_str()) {
            Some("safe") => GuardrailResult {
                verdict: Verdict::Pass,
                outcome: GuardrailOutcome::Safe,
                reasoning: reasoning.unwrap_or_else(|| "Safe".to_string()),
            },
            Some("unsafe") => GuardrailResult::fail(
                GuardrailOutcome::Unsafe,
                reasoning.unwrap_or_else(|| "Unsafe content detected by guardrail".to_string()),
            ),
            other => {
                debug!(decision = ?other, "Guardrail decision missing or unknown");
                GuardrailResult::fail(GuardrailOutcome::Malformed, MALFORMED_REASON)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StubBackend;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_interpret_safe() {
        let r = LlmGuardrail::interpret(r#"{"decision": "safe", "reasoning": "routine block"}"#);
        assert_eq!(r.verdict, Verdict::Pass);
        assert_eq!(r.outcome, GuardrailOutcome::Safe);
        assert_eq!(r.reasoning, "routine block");
    }

    #[test]
    fn test_interpret_unsafe_in_chatter() {
        let r = LlmGuardrail::interpret(
            "Sure, here you go:\n```json\n{\"decision\": \"unsafe\", \"reasoning\": \"wipes disk\"}\n```",
        );
        assert_eq!(r.verdict, Verdict::Fail);
        assert_eq!(r.outcome, GuardrailOutcome::Unsafe);
        assert_eq!(r.reasoning, "wipes disk");
    }

    #[test]
    fn test_interpret_malformed_fails_closed() {
        for reply in ["looks fine to me", "{\"decision\": \"maybe\"}", "{}", "{broken"] {
            let r = LlmGuardrail::interpret(reply);
            assert_eq!(r.verdict, Verdict::Fail, "{reply:?}");
            assert_eq!(r.reasoning, MALFORMED_REASON);
        }
    }

    #[test]
    fn test_prompt_shape() {
        let prompt = LlmGuardrail::prompt_for("Block IP");
        assert!(prompt.starts_with(system_prompt(PromptRole::Guardrail)));
        assert!(prompt.ends_with("\n\nInput to AI Agent:\nBlock IP\n\nOutput (JSON):"));
    }

    #[tokio::test]
    async fn test_check_uses_guardrail_options() {
        let stub = Arc::new(StubBackend::scripted([r#"{"decision":"safe","reasoning":"ok"}"#]));
        let guardrail = LlmGuardrail::new(stub.clone());
        let r = guardrail.check("Block IP").await.unwrap();
        assert_eq!(r.verdict, Verdict::Pass);
        assert_eq!(stub.call_count(), 1);
        assert!(stub.prompts()[0].contains("Input to AI Agent:\nBlock IP"));
    }

    #[tokio::test]
    async fn test_transport_error_fails_closed() {
        let stub = StubBackend::new();
        stub.queue_error(ModelError::Connection {
            message: "refused".into(),
        });
        let r = LlmGuardrail::new(Arc::new(stub)).check("x").await.unwrap();
        assert_eq!(r.verdict, Verdict::Fail);
        assert_eq!(r.outcome, GuardrailOutcome::Unavailable);
        assert!(r.reasoning.starts_with("guardrail unavailable"));
    }

    #[tokio::test]
    async fn test_budget_error_propagates() {
        let stub = StubBackend::new();
        stub.queue_error(ModelError::BudgetExceeded {
            reason: "hard limit".into(),
            projected_usd: 51.0,
            limit_usd: 50.0,
        });
        let err = LlmGuardrail::new(Arc::new(stub)).check("x").await.unwrap_err();
        assert!(matches!(err, ModelError::BudgetExceeded { .. }));
    }
}
