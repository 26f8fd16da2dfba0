//! Three-layer verification of generated remediation plans.
//!
//! Every layer runs on every plan. The aggregate is FAIL when the static
//! policy (Layer A) or the guardrail (Layer C) fails; groundedness (Layer B)
//! is advisory and only annotates the report.

pub mod groundedness;
pub mod guardrail;
pub mod policy;

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

use crate::config::VerificationConfig;
use crate::error::{ConfigError, ModelError};
use crate::metrics::{PolicyLayer, TriageMetrics};
use crate::model::ModelBackend;
use crate::types::{ContextItem, Verdict};

pub use groundedness::{Classifier, EmbeddingClassifier, GroundednessChecker, GroundednessResult};
pub use guardrail::{GuardrailOutcome, GuardrailResult, LlmGuardrail};
pub use policy::{DENY_LIST, PolicyEngine, PolicyResult};

/// Per-layer results and the aggregate verdict, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub policy: PolicyResult,
    pub groundedness: GroundednessResult,
    pub guardrail: GuardrailResult,
    pub verdict: Verdict,
}

/// FAIL iff the static layer or the guardrail failed.
pub fn aggregate(policy: Verdict, guardrail: Verdict) -> Verdict {
    if policy == Verdict::Fail || guardrail == Verdict::Fail {
        Verdict::Fail
    } else {
        Verdict::Pass
    }
}

pub struct VerificationGate {
    policy: PolicyEngine,
    groundedness: GroundednessChecker,
    guardrail: LlmGuardrail,
    metrics: Option<Arc<TriageMetrics>>,
}

impl std::fmt::Debug for VerificationGate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VerificationGate")
            .field("policy", &self.policy)
            .field("groundedness", &self.groundedness)
            .field("guardrail", &self.guardrail)
            .finish()
    }
}

impl VerificationGate {
    pub fn new(
        policy: PolicyEngine,
        groundedness: GroundednessChecker,
        guardrail: LlmGuardrail,
    ) -> Self {
        Self {
            policy,
            groundedness,
            guardrail,
            metrics: None,
        }
    }

    /// Gate with the embedding classifier and the configured deny patterns.
    pub fn from_config(
        config: &VerificationConfig,
        dimensions: usize,
        model: Arc<dyn ModelBackend>,
    ) -> Result<Self, ConfigError> {
        Ok(Self::new(
            PolicyEngine::with_patterns(&config.extra_deny_patterns)?,
            GroundednessChecker::new(
                Arc::new(EmbeddingClassifier::new(dimensions)),
                config.groundedness_threshold,
            ),
            LlmGuardrail::new(model),
        ))
    }

    pub fn with_metrics(mut self, metrics: Arc<TriageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn policy(&self) -> &PolicyEngine {
        &self.policy
    }

    /// Run all three layers over `plan_text`.
    ///
    /// Only a `BudgetExceeded` from the guardrail call is returned as an
    /// error; every other failure is folded into a layer verdict.
    pub async fn verify(
        &self,
        plan_text: &str,
        context: &[ContextItem],
    ) -> Result<VerificationReport, ModelError> {
        let policy = self.policy.check(plan_text);
        let groundedness = self.groundedness.check(plan_text, context).await;
        let guardrail = self.guardrail.check(plan_text).await?;

        let verdict = aggregate(policy.verdict, guardrail.verdict);

        if !policy.passed() {
            warn!(violations = ?policy.violations, "Static policy violation");
        }
        if guardrail.verdict == Verdict::Fail {
            warn!(outcome = ?guardrail.outcome, reasoning = %guardrail.reasoning, "Guardrail rejected plan");
        }
        if let Some(m) = &self.metrics {
            if !policy.passed() {
                m.record_policy_violation(PolicyLayer::Static);
            }
            if groundedness.note.is_some() {
                m.record_policy_violation(PolicyLayer::Groundedness);
            }
            if guardrail.verdict == Verdict::Fail {
                m.record_policy_violation(PolicyLayer::Guardrail);
            }
            m.record_verdict(verdict == Verdict::Pass);
        }
        info!(
            verdict = %verdict,
            policy = %policy.verdict,
            guardrail = %guardrail.verdict,
            confidence = ?groundedness.confidence,
            "Verification complete"
        );

        Ok(VerificationReport {
            policy,
            groundedness,
            guardrail,
            verdict,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StubBackend;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    const SAFE: &str = r#"{"decision": "safe", "reasoning": "ok"}"#;
    const UNSAFE: &str = r#"{"decision": "unsafe", "reasoning": "no"}"#;

    fn gate(reply: &str) -> (VerificationGate, Arc<TriageMetrics>) {
        let metrics = Arc::new(TriageMetrics::new());
        let gate = VerificationGate::from_config(
            &VerificationConfig::default(),
            128,
            Arc::new(StubBackend::scripted([reply])),
        )
        .unwrap()
        .with_metrics(metrics.clone());
        (gate, metrics)
    }

    fn ctx() -> Vec<ContextItem> {
        vec![ContextItem {
            doc_id: "ssh".into(),
            content: "Block the source IP of the brute force attempt".into(),
            metadata: BTreeMap::new(),
            fusion_score: 0.03,
        }]
    }

    #[test]
    fn test_aggregate_truth_table() {
        use Verdict::*;
        assert_eq!(aggregate(Pass, Pass), Pass);
        assert_eq!(aggregate(Fail, Pass), Fail);
        assert_eq!(aggregate(Pass, Fail), Fail);
        assert_eq!(aggregate(Fail, Fail), Fail);
    }

    #[tokio::test]
    async fn test_clean_plan_passes() {
        let (gate, metrics) = gate(SAFE);
        let report = gate
            .verify("Block IP\nBlock the source IP at the firewall", &ctx())
            .await
            .unwrap();
        assert_eq!(report.verdict, Verdict::Pass);
        assert_eq!(metrics.snapshot().verdicts_pass, 1);
    }

    #[tokio::test]
    async fn test_static_fail_overrides_safe_guardrail() {
        let (gate, metrics) = gate(SAFE);
        let report = gate.verify("Cleanup\nrm -rf /var/log", &ctx()).await.unwrap();
        assert_eq!(report.policy.verdict, Verdict::Fail);
        assert_eq!(report.guardrail.verdict, Verdict::Pass);
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(metrics.snapshot().static_violations, 1);
    }

    #[tokio::test]
    async fn test_guardrail_fail_alone_fails() {
        let (gate, metrics) = gate(UNSAFE);
        let report = gate.verify("Block IP", &ctx()).await.unwrap();
        assert_eq!(report.policy.verdict, Verdict::Pass);
        assert_eq!(report.verdict, Verdict::Fail);
        assert_eq!(metrics.snapshot().guardrail_violations, 1);
    }

    #[tokio::test]
    async fn test_ungrounded_plan_still_passes() {
        let (gate, _) = gate(SAFE);
        let report = gate.verify("Block IP", &[]).await.unwrap();
        assert_eq!(report.verdict, Verdict::Pass);
        assert!(report.groundedness.note.is_some());
    }

    #[tokio::test]
    async fn test_all_layers_run_on_static_fail() {
        let stub = Arc::new(StubBackend::scripted([SAFE]));
        let gate = VerificationGate::from_config(&VerificationConfig::default(), 128, stub.clone())
            .unwrap();
        gate.verify("sudo reboot", &ctx()).await.unwrap();
        assert_eq!(stub.call_count(), 1);
    }
}
