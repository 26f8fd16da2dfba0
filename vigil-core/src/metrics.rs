//! Triage metrics: counters shared by every pipeline run.
//!
//! Counters are atomics so one `Arc<TriageMetrics>` can be handed to the
//! orchestrator, the verification gate, and the accountant without locking.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use serde::Serialize;

/// Which verification layer raised a violation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyLayer {
    Static,
    Groundedness,
    Guardrail,
}

#[derive(Debug)]
pub struct TriageMetrics {
    alerts_processed: AtomicU64,
    alerts_halted: AtomicU64,
    verdicts_pass: AtomicU64,
    verdicts_fail: AtomicU64,
    static_violations: AtomicU64,
    groundedness_warnings: AtomicU64,
    guardrail_violations: AtomicU64,
    prompt_tokens: AtomicU64,
    completion_tokens: AtomicU64,
    budget_rejections: AtomicU64,
    anomalies: AtomicU64,
    /// Spend in millionths of a dollar.
    spend_micro_usd: AtomicU64,
    start_time: Instant,
}

impl Default for TriageMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl TriageMetrics {
    pub fn new() -> Self {
        Self {
            alerts_processed: AtomicU64::new(0),
            alerts_halted: AtomicU64::new(0),
            verdicts_pass: AtomicU64::new(0),
            verdicts_fail: AtomicU64::new(0),
            static_violations: AtomicU64::new(0),
            groundedness_warnings: AtomicU64::new(0),
            guardrail_violations: AtomicU64::new(0),
            prompt_tokens: AtomicU64::new(0),
            completion_tokens: AtomicU64::new(0),
            budget_rejections: AtomicU64::new(0),
            anomalies: AtomicU64::new(0),
            spend_micro_usd: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_alert(&self) {
        self.alerts_processed.fetch_add(1, Ordering::Relaxed);
    }

    /// A run ended with the ERROR control signal.
    pub fn record_halt(&self) {
        self.alerts_halted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_verdict(&self, passed: bool) {
        if passed {
            self.verdicts_pass.fetch_add(1, Ordering::Relaxed);
        } else {
            self.verdicts_fail.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn record_policy_violation(&self, layer: PolicyLayer) {
        let counter = match layer {
            PolicyLayer::Static => &self.static_violations,
            PolicyLayer::Groundedness => &self.groundedness_warnings,
            PolicyLayer::Guardrail => &self.guardrail_violations,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tokens(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens
            .fetch_add(completion, Ordering::Relaxed);
    }

    pub fn record_spend(&self, cost_usd: f64) {
        let micros = (cost_usd.max(0.0) * 1_000_000.0).round() as u64;
        self.spend_micro_usd.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_budget_rejection(&self) {
        self.budget_rejections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_anomaly(&self) {
        self.anomalies.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            alerts_processed: self.alerts_processed.load(Ordering::Relaxed),
            alerts_halted: self.alerts_halted.load(Ordering::Relaxed),
            verdicts_pass: self.verdicts_pass.load(Ordering::Relaxed),
            verdicts_fail: self.verdicts_fail.load(Ordering::Relaxed),
            static_violations: self.static_violations.load(Ordering::Relaxed),
            groundedness_warnings: self.groundedness_warnings.load(Ordering::Relaxed),
            guardrail_violations: self.guardrail_violations.load(Ordering::Relaxed),
            prompt_tokens: self.prompt_tokens.load(Ordering::Relaxed),
            completion_tokens: self.completion_tokens.load(Ordering::Relaxed),
            budget_rejections: self.budget_rejections.load(Ordering::Relaxed),
            anomalies: self.anomalies.load(Ordering::Relaxed),
            spend_usd: self.spend_micro_usd.load(Ordering::Relaxed) as f64 / 1_000_000.0,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }
}

/// Immutable snapshot of metrics at a point in time.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub alerts_processed: u64,
    pub alerts_halted: u64,
    pub verdicts_pass: u64,
    pub verdicts_fail: u64,
    pub static_violations: u64,
    pub groundedness_warnings: u64,
    pub guardrail_violations: u64,
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub budget_rejections: u64,
    pub anomalies: u64,
    pub spend_usd: f64,
    pub uptime_secs: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_default() {
        let snap = TriageMetrics::new().snapshot();
        assert_eq!(snap.alerts_processed, 0);
        assert_eq!(snap.spend_usd, 0.0);
    }

    #[test]
    fn test_policy_violations_by_layer() {
        let m = TriageMetrics::new();
        m.record_policy_violation(PolicyLayer::Static);
        m.record_policy_violation(PolicyLayer::Static);
        m.record_policy_violation(PolicyLayer::Guardrail);
        let snap = m.snapshot();
        assert_eq!(snap.static_violations, 2);
        assert_eq!(snap.guardrail_violations, 1);
        assert_eq!(snap.groundedness_warnings, 0);
    }

    #[test]
    fn test_tokens_and_spend() {
        let m = TriageMetrics::new();
        m.record_tokens(10, 8);
        m.record_spend(0.000036);
        m.record_spend(0.5);
        let snap = m.snapshot();
        assert_eq!(snap.prompt_tokens, 10);
        assert_eq!(snap.completion_tokens, 8);
        assert!((snap.spend_usd - 0.500036).abs() < 1e-9);
    }

    #[test]
    fn test_verdicts() {
        let m = TriageMetrics::new();
        m.record_alert();
        m.record_verdict(true);
        m.record_alert();
        m.record_verdict(false);
        m.record_alert();
        m.record_halt();
        let snap = m.snapshot();
        assert_eq!(snap.alerts_processed, 3);
        assert_eq!(snap.verdicts_pass, 1);
        assert_eq!(snap.verdicts_fail, 1);
        assert_eq!(snap.alerts_halted, 1);
    }
}
