//! The triage pipeline: RETRIEVE → ANALYZE → PLAN → VERIFY.
//!
//! Each stage reads the current [`PipelineState`] and returns a
//! [`StateUpdate`]; the orchestrator merges updates through the declarative
//! [`MERGE_POLICY`] table. A plan that cannot be parsed halts the run with
//! the ERROR control signal. Collaborator failures (budget, transport) are
//! returned as errors instead.

pub mod stages;
pub mod state;

use chrono::Utc;
use futures::StreamExt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::{LlmConfig, PipelineConfig};
use crate::error::VigilError;
use crate::metrics::TriageMetrics;
use crate::model::{ModelBackend, PredictOptions};
use crate::prompts::PromptRole;
use crate::retrieval::HybridRetriever;
use crate::session::{SessionCache, session_key};
use crate::types::{Alert, Remediation, Verdict, compute_payload_hash};
use crate::verification::VerificationGate;

pub use stages::{PlanDraft, parse_plan};
pub use state::{
    ControlSignal, MERGE_POLICY, MergeRule, PipelineState, Stage, StateField, StateUpdate,
    merge_rule,
};

pub struct PipelineOrchestrator {
    retriever: Arc<HybridRetriever>,
    model: Arc<dyn ModelBackend>,
    gate: Arc<VerificationGate>,
    config: PipelineConfig,
    max_tokens: usize,
    temperature: f32,
    session: Option<(Arc<dyn SessionCache>, Duration)>,
    metrics: Arc<TriageMetrics>,
}

impl std::fmt::Debug for PipelineOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineOrchestrator")
            .field("model", &self.model.model_name())
            .field("config", &self.config)
            .field("session", &self.session.is_some())
            .finish()
    }
}

impl PipelineOrchestrator {
    pub fn new(
        retriever: Arc<HybridRetriever>,
        model: Arc<dyn ModelBackend>,
        gate: Arc<VerificationGate>,
        config: PipelineConfig,
        llm: &LlmConfig,
    ) -> Self {
        Self {
            retriever,
            model,
            gate,
            config,
            max_tokens: llm.max_tokens,
            temperature: llm.temperature,
            session: None,
            metrics: Arc::new(TriageMetrics::new()),
        }
    }

    /// Store each final state under `session:{alert_id}` for `ttl`.
    pub fn with_session(mut self, cache: Arc<dyn SessionCache>, ttl: Duration) -> Self {
        self.session = Some((cache, ttl));
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<TriageMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn metrics(&self) -> &Arc<TriageMetrics> {
        &self.metrics
    }

    /// Drive one alert to a terminal state.
    ///
    /// Every terminal outcome, including a halted run, is `Ok`. `Err` means
    /// a collaborator failed: the budget was exhausted or a model call
    /// could not be completed.
    pub async fn run(&self, alert: Alert) -> Result<PipelineState, VigilError> {
        alert.validate()?;
        self.metrics.record_alert();

        let mut state = PipelineState::new(alert);
        info!(run_id = %state.run_id, alert_id = %state.alert.id, severity = %state.alert.severity, "Pipeline started");

        let update = self.retrieve(&state);
        state.apply(update.at_stage(Stage::Retrieve));

        let update = self.analyze(&state).await?;
        state.apply(update.at_stage(Stage::Analyze));

        if !state.is_halted() {
            let update = self.plan(&state).await?;
            state.apply(update.at_stage(Stage::Plan));
        }

        if !state.is_halted() {
            let update = self.verify(&state).await?;
            state.apply(update);
        }

        self.finish(&state);
        Ok(state)
    }

    /// Run several alerts with at most `concurrency` in flight. Results are
    /// returned in input order.
    pub async fn run_many(
        &self,
        alerts: Vec<Alert>,
        concurrency: usize,
    ) -> Vec<Result<PipelineState, VigilError>> {
        futures::stream::iter(alerts)
            .map(|alert| self.run(alert))
            .buffered(concurrency.max(1))
            .collect()
            .await
    }

    fn retrieve(&self, state: &PipelineState) -> StateUpdate {
        let query = stages::retrieval_query(&state.alert);
        let context = self.retriever.retrieve(&query, self.config.retrieval_k);
        debug!(alert_id = %state.alert.id, items = context.len(), "Context retrieved");
        StateUpdate {
            context: Some(context),
            ..Default::default()
        }
    }

    async fn analyze(&self, state: &PipelineState) -> Result<StateUpdate, VigilError> {
        let prompt = stages::analyst_prompt(&state.alert, &state.context);
        let options = self.options(PromptRole::Analyst);
        let Some(result) = self
            .within_deadline(self.model.predict(&prompt, &options))
            .await
        else {
            return Ok(self.timed_out(Stage::Analyze));
        };
        let prediction = result?;
        Ok(StateUpdate {
            analysis_text: Some(prediction.text),
            ..Default::default()
        })
    }

    async fn plan(&self, state: &PipelineState) -> Result<StateUpdate, VigilError> {
        let analysis = state.analysis_text.as_deref().unwrap_or_default();
        let prompt = stages::planner_prompt(&state.alert, analysis, &state.context);
        let options = self.options(PromptRole::Planner);

        let mut retry_count = state.retry_count;
        loop {
            let Some(result) = self
                .within_deadline(self.model.predict(&prompt, &options))
                .await
            else {
                let mut update = self.timed_out(Stage::Plan);
                update.retry_count = Some(retry_count);
                return Ok(update);
            };
            let prediction = result?;

            match stages::parse_plan(&prediction.text) {
                Ok(draft) => {
                    let remediation = Remediation {
                        action_id: Uuid::new_v4().to_string(),
                        alert_id: state.alert.id.clone(),
                        title: draft.title,
                        steps: draft.steps,
                        confidence: draft.confidence,
                        provenance: stages::provenance_for(&state.context),
                        model_version: prediction.model_version,
                        prompt_hash: compute_payload_hash(&prompt),
                        policy_verdict: Verdict::Pending,
                        timestamp: Utc::now(),
                    };
                    info!(
                        alert_id = %state.alert.id,
                        action_id = %remediation.action_id,
                        steps = remediation.steps.len(),
                        "Remediation plan drafted"
                    );
                    return Ok(StateUpdate {
                        remediation: Some(remediation),
                        retry_count: Some(retry_count),
                        ..Default::default()
                    });
                }
                Err(e) if retry_count < self.config.max_plan_retries => {
                    retry_count += 1;
                    warn!(alert_id = %state.alert.id, error = %e, retry = retry_count, "Plan parse failed, retrying");
                }
                Err(e) => {
                    warn!(alert_id = %state.alert.id, error = %e, "Plan parse failed, halting");
                    let mut update = StateUpdate::halt(format!("plan parse failed: {e}"));
                    update.retry_count = Some(retry_count);
                    return Ok(update);
                }
            }
        }
    }

    async fn verify(&self, state: &PipelineState) -> Result<StateUpdate, VigilError> {
        let Some(remediation) = &state.remediation else {
            debug!(alert_id = %state.alert.id, "No remediation to verify");
            return Ok(StateUpdate {
                control_signal: Some(ControlSignal::End),
                ..Default::default()
            }
            .at_stage(Stage::Done));
        };

        let plan_text = remediation.plan_text();
        let Some(result) = self
            .within_deadline(self.gate.verify(&plan_text, &state.context))
            .await
        else {
            return Ok(self.timed_out(Stage::Verify).at_stage(Stage::Verify));
        };
        let report = result?;

        let mut verified = remediation.clone();
        verified.policy_verdict = report.verdict;
        Ok(StateUpdate {
            remediation: Some(verified),
            verification: Some(report),
            control_signal: Some(ControlSignal::End),
            ..Default::default()
        }
        .at_stage(Stage::Done))
    }

    fn finish(&self, state: &PipelineState) {
        if state.is_halted() {
            self.metrics.record_halt();
        }
        info!(
            run_id = %state.run_id,
            alert_id = %state.alert.id,
            stage = %state.stage,
            signal = %state.control_signal,
            verdict = ?state.remediation.as_ref().map(|r| r.policy_verdict),
            "Pipeline finished"
        );

        if let Some((cache, ttl)) = &self.session {
            match serde_json::to_value(state) {
                Ok(value) => cache.set_with_expiry(&session_key(&state.alert.id), value, *ttl),
                Err(e) => warn!(alert_id = %state.alert.id, error = %e, "Failed to serialize session state"),
            }
        }
    }

    fn options(&self, role: PromptRole) -> PredictOptions {
        PredictOptions::new(self.max_tokens, self.temperature).for_agent(role.as_str())
    }

    fn stage_timeout(&self) -> Option<Duration> {
        (self.config.stage_timeout_secs > 0).then(|| Duration::from_secs(self.config.stage_timeout_secs))
    }

    /// `None` when the stage deadline expired.
    async fn within_deadline<F: Future>(&self, fut: F) -> Option<F::Output> {
        match self.stage_timeout() {
            Some(limit) => tokio::time::timeout(limit, fut).await.ok(),
            None => Some(fut.await),
        }
    }

    fn timed_out(&self, stage: Stage) -> StateUpdate {
        warn!(stage = %stage, timeout_secs = self.config.stage_timeout_secs, "Stage deadline expired");
        StateUpdate::halt(format!(
            "{stage} stage timed out after {}s",
            self.config.stage_timeout_secs
        ))
    }
}
