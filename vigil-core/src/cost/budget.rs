//! Cumulative spend tracking against soft and hard limits.

use serde::{Deserialize, Serialize};
use std::sync::Mutex;
use tracing::{error, warn};

use crate::config::BudgetConfig;

/// Result of checking a prospective charge.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BudgetCheck {
    /// Within the soft limit.
    Ok,
    /// Over the soft limit but within the hard limit. The call may proceed.
    Warning { message: String, projected_usd: f64 },
    /// Over the hard limit. The call must not proceed.
    Exceeded { reason: String, projected_usd: f64 },
}

impl BudgetCheck {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, BudgetCheck::Exceeded { .. })
    }
}

/// Spend ledger for one accounting period.
///
/// `check` and `record` are the two-step API; `try_charge` does both under a
/// single lock so concurrent callers cannot jointly overshoot the hard limit.
pub struct BudgetPolicy {
    soft_limit_usd: f64,
    hard_limit_usd: f64,
    spend_usd: Mutex<f64>,
}

impl Default for BudgetPolicy {
    fn default() -> Self {
        Self::new(&BudgetConfig::default())
    }
}

impl BudgetPolicy {
    pub fn new(config: &BudgetConfig) -> Self {
        Self {
            soft_limit_usd: config.soft_limit_usd,
            hard_limit_usd: config.hard_limit_usd,
            spend_usd: Mutex::new(0.0),
        }
    }

    /// Start from a non-zero spend, e.g. restored from a ledger.
    pub fn with_spend(self, spend_usd: f64) -> Self {
        *self.spend_usd.lock().unwrap_or_else(|e| e.into_inner()) = spend_usd.max(0.0);
        self
    }

    /// Classify a prospective charge without recording it.
    pub fn check(&self, cost_usd: f64) -> BudgetCheck {
        let spend = *self.spend_usd.lock().unwrap_or_else(|e| e.into_inner());
        self.classify(spend + cost_usd.max(0.0))
    }

    /// Add `cost_usd` to the cumulative spend unconditionally.
    pub fn record(&self, cost_usd: f64) {
        *self.spend_usd.lock().unwrap_or_else(|e| e.into_inner()) += cost_usd.max(0.0);
    }

    /// Check and, if allowed, record the charge atomically.
    pub fn try_charge(&self, cost_usd: f64) -> BudgetCheck {
        let mut spend = self.spend_usd.lock().unwrap_or_else(|e| e.into_inner());
        let cost = cost_usd.max(0.0);
        let outcome = self.classify(*spend + cost);
        if outcome.is_allowed() {
            *spend += cost;
        }
        outcome
    }

    /// Zero the spend for a new accounting period.
    pub fn reset(&self) {
        *self.spend_usd.lock().unwrap_or_else(|e| e.into_inner()) = 0.0;
    }

    pub fn spend_usd(&self) -> f64 {
        *self.spend_usd.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn soft_limit_usd(&self) -> f64 {
        self.soft_limit_usd
    }

    pub fn hard_limit_usd(&self) -> f64 {
        self.hard_limit_usd
    }

    fn classify(&self, projected_usd: f64) -> BudgetCheck {
        if projected_usd > self.hard_limit_usd {
            error!(
                projected_usd,
                limit_usd = self.hard_limit_usd,
                "Hard budget limit exceeded"
            );
            return BudgetCheck::Exceeded {
                reason: "Hard budget limit exceeded".to_string(),
                projected_usd,
            };
        }
        if projected_usd > self.soft_limit_usd {
            warn!(
                projected_usd,
                limit_usd = self.soft_limit_usd,
                "Soft budget limit exceeded"
            );
            return BudgetCheck::Warning {
                message: "Soft budget limit exceeded".to_string(),
                projected_usd,
            };
        }
        BudgetCheck::Ok
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_within_soft_limit() {
        let policy = BudgetPolicy::default();
        assert_eq!(policy.check(5.0), BudgetCheck::Ok);
        assert_eq!(policy.check(10.0), BudgetCheck::Ok, "soft limit is inclusive");
    }

    #[test]
    fn test_soft_limit_warning() {
        let policy = BudgetPolicy::default().with_spend(9.0);
        let check = policy.check(2.0);
        assert!(check.is_allowed());
        assert!(matches!(check, BudgetCheck::Warning { projected_usd, .. } if projected_usd == 11.0));
    }

    #[test]
    fn test_hard_limit_exceeded() {
        let policy = BudgetPolicy::default().with_spend(9.0);
        let check = policy.check(42.0);
        assert!(!check.is_allowed());
        assert!(policy.check(41.0).is_allowed(), "hard limit is inclusive");
    }

    #[test]
    fn test_check_does_not_record() {
        let policy = BudgetPolicy::default();
        policy.check(3.0);
        assert_eq!(policy.spend_usd(), 0.0);
        policy.record(3.0);
        assert_eq!(policy.spend_usd(), 3.0);
    }

    #[test]
    fn test_record_ignores_negative_cost() {
        let policy = BudgetPolicy::default().with_spend(2.0);
        policy.record(-5.0);
        assert_eq!(policy.spend_usd(), 2.0);
    }

    #[test]
    fn test_try_charge_rejects_without_recording() {
        let policy = BudgetPolicy::default().with_spend(49.0);
        assert!(!policy.try_charge(2.0).is_allowed());
        assert_eq!(policy.spend_usd(), 49.0);
        assert!(policy.try_charge(1.0).is_allowed());
        assert_eq!(policy.spend_usd(), 50.0);
    }

    #[test]
    fn test_reset() {
        let policy = BudgetPolicy::default().with_spend(30.0);
        policy.reset();
        assert_eq!(policy.spend_usd(), 0.0);
    }

    #[test]
    fn test_concurrent_try_charge_never_overshoots() {
        let policy = Arc::new(BudgetPolicy::new(&BudgetConfig {
            soft_limit_usd: 5.0,
            hard_limit_usd: 10.0,
            cost_per_1k_tokens: 0.002,
            ledger_path: None,
        }));
        let handles: Vec<_> = (0..16)
            .map(|_| {
                let policy = Arc::clone(&policy);
                std::thread::spawn(move || {
                    for _ in 0..10 {
                        policy.try_charge(0.5);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(policy.spend_usd() <= 10.0);
        assert_eq!(policy.spend_usd(), 10.0);
    }
}
