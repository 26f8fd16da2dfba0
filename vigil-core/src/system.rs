//! Startup wiring: builds every collaborator once from configuration and
//! hands them to the orchestrator, the gate, and the governance ledger.

use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::config::VigilConfig;
use crate::cost::{
    AnomalyDetector, BudgetPolicy, InMemoryUsageLedger, MeteredBackend, SqliteUsageLedger,
    TokenAccountant, UsageLedger,
};
use crate::error::VigilError;
use crate::governance::GovernanceLedger;
use crate::metrics::TriageMetrics;
use crate::model::{ModelBackend, build_backend};
use crate::pipeline::PipelineOrchestrator;
use crate::retrieval::{HybridRetriever, SourceAllowlist, SqliteVectorStore, VectorStore};
use crate::session::{InMemorySessionCache, SessionCache};
use crate::verification::VerificationGate;

/// A document to seed into long-term memory and the lexical index.
#[derive(Debug, Clone)]
pub struct SeedDocument {
    pub doc_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

/// The assembled triage core.
pub struct TriageSystem {
    pub orchestrator: PipelineOrchestrator,
    pub governance: GovernanceLedger,
    pub retriever: Arc<HybridRetriever>,
    pub accountant: Arc<TokenAccountant>,
    pub session: Arc<InMemorySessionCache>,
    pub metrics: Arc<TriageMetrics>,
}

impl std::fmt::Debug for TriageSystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TriageSystem")
            .field("orchestrator", &self.orchestrator)
            .field("retriever", &self.retriever)
            .finish()
    }
}

impl TriageSystem {
    /// Build with the backend named in `config.llm`.
    pub fn from_config(config: &VigilConfig) -> Result<Self, VigilError> {
        let backend = build_backend(&config.llm)?;
        Self::with_backend(config, backend)
    }

    /// Build around an already constructed raw backend. Every call through
    /// it is metered.
    pub fn with_backend(
        config: &VigilConfig,
        backend: Arc<dyn ModelBackend>,
    ) -> Result<Self, VigilError> {
        for warning in config.validate() {
            warn!("{warning}");
        }

        let metrics = Arc::new(TriageMetrics::new());

        let ledger: Arc<dyn UsageLedger> = match &config.budget.ledger_path {
            Some(path) => Arc::new(SqliteUsageLedger::open(path)?),
            None => Arc::new(InMemoryUsageLedger::new()),
        };
        let accountant = Arc::new(
            TokenAccountant::new(
                &config.budget,
                Arc::new(BudgetPolicy::new(&config.budget)),
                Arc::new(AnomalyDetector::new(&config.anomaly)),
                ledger,
            )
            .with_metrics(metrics.clone()),
        );
        let model: Arc<dyn ModelBackend> =
            Arc::new(MeteredBackend::new(backend, accountant.clone()));

        let allowlist = SourceAllowlist::new(config.memory.allowed_sources.iter().cloned());
        let dims = config.retrieval.vector_dimensions;
        let store: Arc<dyn VectorStore> = match &config.retrieval.store_path {
            Some(path) => Arc::new(SqliteVectorStore::open(path, dims, allowlist)?),
            None => Arc::new(SqliteVectorStore::open_in_memory(dims, allowlist)?),
        };
        let retriever = Arc::new(HybridRetriever::new(store.clone(), config.retrieval.rrf_k)?);

        let gate = Arc::new(
            VerificationGate::from_config(&config.verification, dims, model.clone())?
                .with_metrics(metrics.clone()),
        );

        let session = Arc::new(InMemorySessionCache::new());
        let orchestrator = PipelineOrchestrator::new(
            retriever.clone(),
            model,
            gate,
            config.pipeline.clone(),
            &config.llm,
        )
        .with_session(
            session.clone() as Arc<dyn SessionCache>,
            Duration::from_secs(config.session.ttl_secs),
        )
        .with_metrics(metrics.clone());

        info!(
            backend = %config.llm.backend,
            persistent_store = config.retrieval.store_path.is_some(),
            "Triage system ready"
        );

        Ok(Self {
            orchestrator,
            governance: GovernanceLedger::new(store),
            retriever,
            accountant,
            session,
            metrics,
        })
    }

    /// Write `documents` to the vector store and rebuild the lexical index
    /// over them. Documents from non-allowlisted sources are skipped.
    /// Returns the number stored.
    pub fn seed(&self, documents: &[SeedDocument]) -> Result<usize, VigilError> {
        let store = self.retriever.store();
        let mut ids = Vec::with_capacity(documents.len());
        let mut contents = Vec::with_capacity(documents.len());
        for doc in documents {
            match store.add(&doc.doc_id, &doc.content, &doc.metadata) {
                Ok(()) => {
                    ids.push(doc.doc_id.clone());
                    contents.push(doc.content.clone());
                }
                Err(e) => warn!(doc_id = %doc.doc_id, error = %e, "Skipping seed document"),
            }
        }
        self.retriever.index_documents(&contents, &ids)?;
        Ok(ids.len())
    }
}
