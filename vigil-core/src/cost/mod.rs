//! Cost governance for model calls: spend limits, usage anomalies, and the
//! usage ledger.

pub mod accountant;
pub mod anomaly;
pub mod budget;
pub mod ledger;

pub use accountant::{ChargeReceipt, MeteredBackend, TokenAccountant};
pub use anomaly::{AnomalyDetector, AnomalyResult};
pub use budget::{BudgetCheck, BudgetPolicy};
pub use ledger::{InMemoryUsageLedger, SqliteUsageLedger, UsageEntry, UsageLedger};
