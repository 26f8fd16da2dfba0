//! Hybrid retrieval: vector similarity and BM25 merged by Reciprocal Rank Fusion.
//!
//! `score(doc) = Σ 1 / (rank + k)` over every list the document appears in,
//! with 0-based ranks and `k = 60` by default.

use serde_json::{Value, json};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

use super::lexical::Bm25Index;
use super::store::VectorStore;
use crate::error::RetrievalError;
use crate::types::ContextItem;

pub const DEFAULT_RRF_K: f64 = 60.0;

/// Fuse ranked id lists.
///
/// Output is sorted by fused score, best first. Ties keep first-appearance
/// order, scanning the lists in the order given.
pub fn rrf_fuse(ranked_lists: &[Vec<String>], k: f64) -> Vec<(String, f64)> {
    let mut order: Vec<String> = Vec::new();
    let mut scores: HashMap<String, f64> = HashMap::new();

    for list in ranked_lists {
        for (rank, doc_id) in list.iter().enumerate() {
            let rrf = 1.0 / (rank as f64 + k);
            match scores.get_mut(doc_id) {
                Some(score) => *score += rrf,
                None => {
                    scores.insert(doc_id.clone(), rrf);
                    order.push(doc_id.clone());
                }
            }
        }
    }

    let mut fused: Vec<(String, f64)> = order
        .into_iter()
        .map(|id| {
            let score = scores.get(&id).copied().unwrap_or(0.0);
            (id, score)
        })
        .collect();

    // sort_by is stable, which gives the tie-break
    fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    fused
}

/// Content and metadata for a document known to the lexical index.
#[derive(Debug, Clone)]
struct IndexedDoc {
    content: String,
    metadata: BTreeMap<String, Value>,
}

/// The lexical corpus and its side lookup, swapped together on reindex.
struct Corpus {
    index: Bm25Index,
    lookup: HashMap<String, IndexedDoc>,
}

/// Retrieves ranked context for a query from the vector store and the
/// lexical index.
pub struct HybridRetriever {
    store: Arc<dyn VectorStore>,
    corpus: RwLock<Arc<Corpus>>,
    rrf_k: f64,
}

impl std::fmt::Debug for HybridRetriever {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HybridRetriever")
            .field("rrf_k", &self.rrf_k)
            .field("lexical_docs", &self.lexical_len())
            .finish()
    }
}

impl HybridRetriever {
    pub fn new(store: Arc<dyn VectorStore>, rrf_k: f64) -> Result<Self, RetrievalError> {
        Ok(Self {
            store,
            corpus: RwLock::new(Arc::new(Corpus {
                index: Bm25Index::empty()?,
                lookup: HashMap::new(),
            })),
            rrf_k,
        })
    }

    pub fn store(&self) -> &Arc<dyn VectorStore> {
        &self.store
    }

    /// Number of documents in the current lexical corpus.
    pub fn lexical_len(&self) -> usize {
        self.current_corpus().index.len()
    }

    /// Replace the lexical corpus with `documents`, keyed by `ids`.
    ///
    /// This is a wholesale rebuild, not an incremental add. Metadata for
    /// each id is copied from the vector store when it holds that id;
    /// otherwise the document is tagged with source `lexical-index`.
    pub fn index_documents(&self, documents: &[String], ids: &[String]) -> Result<(), RetrievalError> {
        if documents.len() != ids.len() {
            return Err(RetrievalError::LengthMismatch {
                documents: documents.len(),
                ids: ids.len(),
            });
        }

        let index = Bm25Index::build(
            ids.iter()
                .map(String::as_str)
                .zip(documents.iter().map(String::as_str)),
        )?;

        let mut lookup = HashMap::with_capacity(ids.len());
        for (id, content) in ids.iter().zip(documents) {
            let metadata = match self.store.get(id) {
                Ok(Some(stored)) => stored.metadata,
                Ok(None) => lexical_only_metadata(),
                Err(e) => {
                    warn!(doc_id = %id, error = %e, "Vector store lookup failed during indexing");
                    lexical_only_metadata()
                }
            };
            lookup.insert(
                id.clone(),
                IndexedDoc {
                    content: content.clone(),
                    metadata,
                },
            );
        }

        let corpus = Arc::new(Corpus { index, lookup });
        *self.corpus.write().unwrap_or_else(|e| e.into_inner()) = corpus;
        info!(documents = ids.len(), "Lexical index rebuilt");
        Ok(())
    }

    /// Top `k` fused context items for `query`. Never fails: a failing
    /// side contributes an empty list.
    pub fn retrieve(&self, query: &str, k: usize) -> Vec<ContextItem> {
        if k == 0 {
            return Vec::new();
        }
        let corpus = self.current_corpus();

        let vector_hits = self.store.query(query, k).unwrap_or_else(|e| {
            warn!(error = %e, "Vector search failed, continuing with lexical results only");
            Vec::new()
        });
        let lexical_hits = corpus.index.search(query, k).unwrap_or_else(|e| {
            warn!(error = %e, "Lexical search failed, continuing with vector results only");
            Vec::new()
        });

        let vector_ids: Vec<String> = vector_hits.iter().map(|h| h.doc_id.clone()).collect();
        let lexical_ids: Vec<String> = lexical_hits.iter().map(|h| h.doc_id.clone()).collect();
        let mut fused = rrf_fuse(&[vector_ids, lexical_ids], self.rrf_k);
        fused.truncate(k);

        let by_vector: HashMap<&str, _> = vector_hits
            .iter()
            .map(|h| (h.doc_id.as_str(), h))
            .collect();
        let by_lexical: HashMap<&str, _> = lexical_hits
            .iter()
            .map(|h| (h.doc_id.as_str(), h))
            .collect();

        let mut items = Vec::with_capacity(fused.len());
        for (doc_id, score) in fused {
            let (content, metadata) = if let Some(hit) = by_vector.get(doc_id.as_str()) {
                (hit.content.clone(), hit.metadata.clone())
            } else if let Some(doc) = corpus.lookup.get(&doc_id) {
                (doc.content.clone(), doc.metadata.clone())
            } else if let Some(hit) = by_lexical.get(doc_id.as_str()) {
                (hit.content.clone(), lexical_only_metadata())
            } else {
                continue;
            };
            items.push(ContextItem {
                doc_id,
                content,
                metadata,
                fusion_score: score,
            });
        }

        debug!(query_len = query.len(), k, returned = items.len(), "Hybrid retrieval complete");
        items
    }

    fn current_corpus(&self) -> Arc<Corpus> {
        Arc::clone(&self.corpus.read().unwrap_or_else(|e| e.into_inner()))
    }
}

fn lexical_only_metadata() -> BTreeMap<String, Value> {
    BTreeMap::from([("source".to_string(), json!("lexical-index"))])
}
