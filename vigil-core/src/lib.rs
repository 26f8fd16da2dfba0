//! # Vigil Core
//!
//! Core library for Vigil, an LLM-assisted SOC alert triage pipeline.
//! Provides hybrid retrieval, the RETRIEVE → ANALYZE → PLAN → VERIFY
//! orchestrator, layered verification of generated plans, governed writes
//! to long-term memory, and cost control for model calls.

pub mod config;
pub mod cost;
pub mod error;
pub mod governance;
pub mod metrics;
pub mod model;
pub mod pipeline;
pub mod prompts;
pub mod redteam;
pub mod retrieval;
pub mod session;
pub mod system;
pub mod types;
pub mod verification;

// Re-export commonly used types at the crate root.
pub use config::{BackendKind, VigilConfig, load_config};
pub use cost::{BudgetCheck, BudgetPolicy, MeteredBackend, TokenAccountant};
pub use error::{Result, VigilError};
pub use governance::{GovernanceLedger, MemoryProposal, ProposalStatus};
pub use metrics::{MetricsSnapshot, TriageMetrics};
pub use model::{ModelBackend, PredictOptions, Prediction, StubBackend};
pub use pipeline::{ControlSignal, PipelineOrchestrator, PipelineState};
pub use retrieval::{HybridRetriever, VectorStore};
pub use system::{SeedDocument, TriageSystem};
pub use types::{
    Alert, ContextItem, Provenance, Remediation, Severity, Verdict, compute_payload_hash,
    sanitize_input,
};
pub use verification::{VerificationGate, VerificationReport};
