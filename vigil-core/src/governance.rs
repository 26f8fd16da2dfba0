//! Human-curated writes to long-term memory.
//!
//! Nothing reaches the vector store without an explicit approval. A proposal
//! moves PENDING → APPROVED or PENDING → REJECTED exactly once; terminal
//! states never transition again.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::GovernanceError;
use crate::retrieval::VectorStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProposalStatus {
    Pending,
    Approved,
    Rejected,
}

impl std::fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProposalStatus::Pending => write!(f, "PENDING"),
            ProposalStatus::Approved => write!(f, "APPROVED"),
            ProposalStatus::Rejected => write!(f, "REJECTED"),
        }
    }
}

/// A proposed long-term memory entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryProposal {
    pub proposal_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
    pub status: ProposalStatus,
    /// Who approved or rejected the proposal.
    pub decided_by: Option<String>,
    pub created_at: DateTime<Utc>,
    pub decided_at: Option<DateTime<Utc>>,
}

impl MemoryProposal {
    /// Document id used when the proposal is committed.
    pub fn doc_id(&self) -> String {
        format!("doc-{}", self.proposal_id)
    }
}

pub struct GovernanceLedger {
    store: Arc<dyn VectorStore>,
    state: Mutex<LedgerState>,
}

#[derive(Default)]
struct LedgerState {
    proposals: HashMap<String, MemoryProposal>,
    /// Ids with a store commit in flight. They stay PENDING but accept no
    /// other decision until the commit settles.
    committing: HashSet<String>,
}

impl std::fmt::Debug for GovernanceLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let count = self
            .state
            .lock()
            .map(|s| s.proposals.len())
            .unwrap_or_default();
        f.debug_struct("GovernanceLedger")
            .field("proposals", &count)
            .finish()
    }
}

impl GovernanceLedger {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            state: Mutex::new(LedgerState::default()),
        }
    }

    /// Record a PENDING proposal. The store is not touched.
    pub fn propose(
        &self,
        content: impl Into<String>,
        metadata: BTreeMap<String, Value>,
    ) -> String {
        let proposal_id = Uuid::new_v4().to_string();
        let proposal = MemoryProposal {
            proposal_id: proposal_id.clone(),
            content: content.into(),
            metadata,
            status: ProposalStatus::Pending,
            decided_by: None,
            created_at: Utc::now(),
            decided_at: None,
        };
        self.lock().proposals.insert(proposal_id.clone(), proposal);
        info!(proposal_id = %proposal_id, "Memory write proposed");
        proposal_id
    }

    /// Commit a PENDING proposal to the vector store and mark it APPROVED.
    ///
    /// The proposal is claimed under the lock, committed with the lock
    /// released, then settled. A second decision on the same id while the
    /// commit is in flight fails `InvalidState`. A failed commit leaves the
    /// proposal PENDING.
    pub fn approve(&self, proposal_id: &str, approver_id: &str) -> Result<(), GovernanceError> {
        let (doc_id, content, metadata) = {
            let mut state = self.lock();
            let proposal = state.pending(proposal_id)?;
            let claim = (
                proposal.doc_id(),
                proposal.content.clone(),
                proposal.metadata.clone(),
            );
            state.committing.insert(proposal_id.to_string());
            claim
        };

        let committed = self
            .store
            .allowlist()
            .check(&metadata)
            .inspect_err(|e| {
                warn!(proposal_id, error = %e, "Approval blocked by source allowlist");
            })
            .and_then(|()| self.store.add(&doc_id, &content, &metadata));

        let mut state = self.lock();
        state.committing.remove(proposal_id);
        committed?;

        if let Some(proposal) = state.proposals.get_mut(proposal_id) {
            proposal.status = ProposalStatus::Approved;
            proposal.decided_by = Some(approver_id.to_string());
            proposal.decided_at = Some(Utc::now());
        }
        info!(proposal_id, approver = approver_id, doc_id = %doc_id, "Memory write approved");
        Ok(())
    }

    /// Mark a PENDING proposal REJECTED. Never writes to the store.
    pub fn reject(&self, proposal_id: &str, rejector_id: &str) -> Result<(), GovernanceError> {
        let mut state = self.lock();
        let proposal = state.pending(proposal_id)?;
        proposal.status = ProposalStatus::Rejected;
        proposal.decided_by = Some(rejector_id.to_string());
        proposal.decided_at = Some(Utc::now());
        info!(proposal_id, rejector = rejector_id, "Memory write rejected");
        Ok(())
    }

    pub fn get(&self, proposal_id: &str) -> Option<MemoryProposal> {
        self.lock().proposals.get(proposal_id).cloned()
    }

    /// Pending proposals, oldest first.
    pub fn pending(&self) -> Vec<MemoryProposal> {
        let mut pending: Vec<MemoryProposal> = self
            .lock()
            .proposals
            .values()
            .filter(|p| p.status == ProposalStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        pending
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, LedgerState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl LedgerState {
    /// The proposal, if it exists, is PENDING, and has no commit in flight.
    fn pending(&mut self, proposal_id: &str) -> Result<&mut MemoryProposal, GovernanceError> {
        let committing = self.committing.contains(proposal_id);
        let proposal = self
            .proposals
            .get_mut(proposal_id)
            .ok_or_else(|| GovernanceError::NotFound {
                proposal_id: proposal_id.to_string(),
            })?;
        if committing {
            return Err(GovernanceError::InvalidState {
                proposal_id: proposal_id.to_string(),
                status: "COMMITTING".to_string(),
            });
        }
        if proposal.status != ProposalStatus::Pending {
            return Err(GovernanceError::InvalidState {
                proposal_id: proposal_id.to_string(),
                status: proposal.status.to_string(),
            });
        }
        Ok(proposal)
    }
}
