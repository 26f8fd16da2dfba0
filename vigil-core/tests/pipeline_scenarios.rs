//! End-to-end triage scenarios over the assembled core with scripted models.

use serde_json::json;
use std::collections::BTreeMap;
use std::sync::Arc;

use vigil_core::config::{PipelineConfig, VerificationConfig};
use vigil_core::cost::{
    AnomalyDetector, BudgetPolicy, InMemoryUsageLedger, MeteredBackend, TokenAccountant,
    UsageLedger,
};
use vigil_core::model::ModelBackend;
use vigil_core::retrieval::{SourceAllowlist, SqliteVectorStore};
use vigil_core::{
    Alert, ControlSignal, HybridRetriever, PipelineOrchestrator, Prediction, SeedDocument,
    Severity, StubBackend, TriageSystem, Verdict, VerificationGate, VigilConfig,
    compute_payload_hash,
};

const SAFE: &str = r#"{"decision": "safe", "reasoning": "Routine containment"}"#;

fn seed(id: &str, source: &str, content: &str) -> SeedDocument {
    SeedDocument {
        doc_id: id.into(),
        content: content.into(),
        metadata: BTreeMap::from([("source".to_string(), json!(source))]),
    }
}

fn playbooks() -> Vec<SeedDocument> {
    vec![
        seed(
            "pb-ssh",
            "playbook-ssh",
            "SSH brute force: block the offending source IP and lock targeted accounts",
        ),
        seed(
            "pb-phishing",
            "playbook-phishing",
            "Phishing: quarantine the message and reset exposed credentials",
        ),
        seed(
            "pol-access",
            "policy-access-control",
            "Access control: enforce MFA on administrative accounts after brute force activity",
        ),
    ]
}

fn brute_force_alert() -> Alert {
    Alert::new(
        "alert-001",
        "auth-gateway",
        Severity::High,
        "brute force",
        compute_payload_hash(r#"{"failed_logins": 312}"#),
    )
    .unwrap()
}

fn system(replies: &[&str]) -> TriageSystem {
    let stub = Arc::new(StubBackend::scripted(replies.iter().copied()));
    let system = TriageSystem::with_backend(&VigilConfig::default(), stub).unwrap();
    assert_eq!(system.seed(&playbooks()).unwrap(), 3);
    system
}

#[tokio::test]
async fn scenario_a_valid_plan_passes() {
    let plan = r#"Here is the plan:
```json
{"title": "Contain SSH brute force", "steps": ["Block source IP 203.0.113.7 at the edge firewall", "Lock the targeted accounts and force a password reset"], "confidence": 0.85}
```"#;
    let system = system(&["Credential stuffing against SSH, T1110", plan, SAFE]);

    let state = system.orchestrator.run(brute_force_alert()).await.unwrap();

    assert_eq!(state.context.len(), 3);
    assert_eq!(state.control_signal, ControlSignal::End);

    let remediation = state.remediation.as_ref().unwrap();
    assert_eq!(remediation.steps.len(), 2);
    assert_eq!(remediation.alert_id, "alert-001");
    assert_eq!(remediation.model_version, "stub-v1");
    assert_eq!(remediation.policy_verdict, Verdict::Pass);
    assert_eq!(remediation.provenance.len(), 1);
    assert_eq!(remediation.provenance[0].doc_id, state.context[0].doc_id);

    let report = state.verification.as_ref().unwrap();
    assert_eq!(report.policy.verdict, Verdict::Pass);
    assert_eq!(report.guardrail.verdict, Verdict::Pass);
    assert_eq!(report.verdict, Verdict::Pass);
}

#[tokio::test]
async fn scenario_b_non_json_plan_halts() {
    let system = system(&[
        "Looks like a brute force",
        "I recommend blocking the IP, but I cannot format that as JSON.",
    ]);

    let state = system.orchestrator.run(brute_force_alert()).await.unwrap();

    assert_eq!(state.control_signal, ControlSignal::Error);
    assert!(state.remediation.is_none());
    assert!(state.verification.is_none());
    assert!(state.halt_reason.is_some());
    assert_eq!(system.metrics.snapshot().alerts_halted, 1);
}

#[tokio::test]
async fn scenario_c_destructive_step_fails_regardless_of_guardrail() {
    let plan = r#"{"title": "Clean up", "steps": ["Isolate the host", "rm -rf /var/log/auth"], "confidence": 0.6}"#;
    let system = system(&["Brute force", plan, SAFE]);

    let state = system.orchestrator.run(brute_force_alert()).await.unwrap();

    let report = state.verification.as_ref().unwrap();
    assert_eq!(report.policy.verdict, Verdict::Fail);
    assert!(report.policy.violations.contains(&"rm -rf".to_string()));
    assert_eq!(report.guardrail.verdict, Verdict::Pass);
    assert_eq!(report.verdict, Verdict::Fail);
    assert_eq!(
        state.remediation.unwrap().policy_verdict,
        Verdict::Fail
    );
    assert_eq!(system.metrics.snapshot().static_violations, 1);
}

#[tokio::test]
async fn scenario_d_budget_breach_discards_result() {
    let config = VigilConfig::default();
    let stub = StubBackend::new();
    // 21M tokens at $0.002 per 1k = $42
    stub.queue_prediction(Prediction {
        text: "expensive analysis".into(),
        prompt_tokens: 20_000_000,
        completion_tokens: 1_000_000,
        model_version: "stub-v1".into(),
    });

    let ledger = Arc::new(InMemoryUsageLedger::new());
    let budget = Arc::new(BudgetPolicy::new(&config.budget).with_spend(9.0));
    let accountant = Arc::new(TokenAccountant::new(
        &config.budget,
        budget.clone(),
        Arc::new(AnomalyDetector::new(&config.anomaly)),
        ledger.clone(),
    ));
    let model: Arc<dyn ModelBackend> =
        Arc::new(MeteredBackend::new(Arc::new(stub), accountant));

    let store = SqliteVectorStore::open_in_memory(
        64,
        SourceAllowlist::new(config.memory.allowed_sources.iter().cloned()),
    )
    .unwrap();
    let retriever = Arc::new(HybridRetriever::new(Arc::new(store), 60.0).unwrap());
    let gate = Arc::new(
        VerificationGate::from_config(&VerificationConfig::default(), 64, model.clone()).unwrap(),
    );
    let orchestrator = PipelineOrchestrator::new(
        retriever,
        model,
        gate,
        PipelineConfig::default(),
        &config.llm,
    );

    let err = orchestrator.run(brute_force_alert()).await.unwrap_err();

    assert!(err.is_budget_exceeded());
    assert!(err.to_string().contains("projected $51.0000"));
    assert!(ledger.entries().unwrap().is_empty());
    assert_eq!(budget.spend_usd(), 9.0);
}

#[tokio::test]
async fn approved_memory_is_retrievable() {
    let system = system(&[]);
    let id = system.governance.propose(
        "Brute force against VPN: rotate shared secrets",
        BTreeMap::from([("source".to_string(), json!("playbook-ssh"))]),
    );
    system.governance.approve(&id, "lead-analyst").unwrap();

    let hits = system.retriever.retrieve("rotate shared secrets vpn", 5);
    assert!(hits.iter().any(|h| h.doc_id == format!("doc-{id}")));
}
