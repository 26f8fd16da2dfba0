//! Per-call accounting: anomaly observation, budget enforcement, usage ledger.

use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, error, warn};

use super::anomaly::{AnomalyDetector, AnomalyResult};
use super::budget::{BudgetCheck, BudgetPolicy};
use super::ledger::{UsageEntry, UsageLedger};
use crate::config::BudgetConfig;
use crate::error::ModelError;
use crate::metrics::TriageMetrics;
use crate::model::{ModelBackend, PredictOptions, Prediction};

/// What accounting decided about one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChargeReceipt {
    pub cost_usd: f64,
    pub total_tokens: u64,
    pub anomaly: AnomalyResult,
    pub budget: BudgetCheck,
}

/// Charges every completed model call against the budget.
///
/// The order per call is fixed: compute cost, observe the token total,
/// check-and-record spend atomically, then append to the usage ledger.
pub struct TokenAccountant {
    cost_per_1k_tokens: f64,
    budget: Arc<BudgetPolicy>,
    anomaly: Arc<AnomalyDetector>,
    ledger: Arc<dyn UsageLedger>,
    metrics: Option<Arc<TriageMetrics>>,
}

impl TokenAccountant {
    pub fn new(
        config: &BudgetConfig,
        budget: Arc<BudgetPolicy>,
        anomaly: Arc<AnomalyDetector>,
        ledger: Arc<dyn UsageLedger>,
    ) -> Self {
        Self {
            cost_per_1k_tokens: config.cost_per_1k_tokens,
            budget,
            anomaly,
            ledger,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<TriageMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Flat-rate cost of a token total.
    pub fn cost_for(&self, total_tokens: u64) -> f64 {
        total_tokens as f64 / 1000.0 * self.cost_per_1k_tokens
    }

    pub fn budget(&self) -> &BudgetPolicy {
        &self.budget
    }

    pub fn ledger(&self) -> &dyn UsageLedger {
        self.ledger.as_ref()
    }

    /// Account for a completed call.
    ///
    /// Returns `BudgetExceeded` when the charge would breach the hard limit;
    /// in that case nothing is recorded and the caller must drop the output.
    pub fn charge(&self, agent: &str, prediction: &Prediction) -> Result<ChargeReceipt, ModelError> {
        let total_tokens = prediction.total_tokens();
        let cost_usd = self.cost_for(total_tokens);

        let anomaly = self.anomaly.observe(total_tokens as f64);
        if anomaly.is_anomaly {
            warn!(
                agent,
                total_tokens,
                z_score = anomaly.z_score,
                "Token usage anomaly detected"
            );
            if let Some(m) = &self.metrics {
                m.record_anomaly();
            }
        }

        let budget = self.budget.try_charge(cost_usd);
        if let BudgetCheck::Exceeded {
            reason,
            projected_usd,
        } = &budget
        {
            if let Some(m) = &self.metrics {
                m.record_budget_rejection();
            }
            return Err(ModelError::BudgetExceeded {
                reason: reason.clone(),
                projected_usd: *projected_usd,
                limit_usd: self.budget.hard_limit_usd(),
            });
        }

        let entry = UsageEntry {
            agent: agent.to_string(),
            model: prediction.model_version.clone(),
            prompt_tokens: prediction.prompt_tokens,
            completion_tokens: prediction.completion_tokens,
            total_tokens,
            cost_estimate: cost_usd,
            timestamp: Utc::now(),
        };
        // Spend is already recorded, so the result is kept even if persistence fails.
        if let Err(e) = self.ledger.append(&entry) {
            error!(agent, error = %e, "Failed to persist token usage");
        }

        if let Some(m) = &self.metrics {
            m.record_tokens(prediction.prompt_tokens, prediction.completion_tokens);
            m.record_spend(cost_usd);
        }

        debug!(
            agent,
            total_tokens,
            cost_usd,
            spend_usd = self.budget.spend_usd(),
            "Model call accounted"
        );

        Ok(ChargeReceipt {
            cost_usd,
            total_tokens,
            anomaly,
            budget,
        })
    }
}

/// A backend whose every call is charged through a [`TokenAccountant`].
///
/// The inner call runs without touching governor state; accounting happens
/// only after it returns.
pub struct MeteredBackend {
    inner: Arc<dyn ModelBackend>,
    accountant: Arc<TokenAccountant>,
}

impl MeteredBackend {
    pub fn new(inner: Arc<dyn ModelBackend>, accountant: Arc<TokenAccountant>) -> Self {
        Self { inner, accountant }
    }

    pub fn accountant(&self) -> &Arc<TokenAccountant> {
        &self.accountant
    }
}

#[async_trait]
impl ModelBackend for MeteredBackend {
    async fn predict(
        &self,
        prompt: &str,
        options: &PredictOptions,
    ) -> Result<Prediction, ModelError> {
        let prediction = self.inner.predict(prompt, options).await?;
        self.accountant.charge(options.agent, &prediction)?;
        Ok(prediction)
    }

    fn model_name(&self) -> &str {
        self.inner.model_name()
    }
}
