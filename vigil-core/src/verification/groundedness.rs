//! Layer B: advisory groundedness check.
//!
//! Scores how well the top context item supports the plan. The verdict is
//! always PASS; a low score or an unavailable classifier is reported as a
//! note for the audit trail and never blocks.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::ModelError;
use crate::retrieval::{SimpleEmbedder, cosine_similarity};
use crate::types::{ContextItem, Verdict};

/// Estimates support of `candidate` by `context` as a confidence in [0, 1].
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn score(&self, context: &str, candidate: &str) -> Result<f32, ModelError>;
}

/// Cosine similarity of hashed bag-of-words vectors, clamped to [0, 1].
#[derive(Debug, Clone)]
pub struct EmbeddingClassifier {
    embedder: SimpleEmbedder,
}

impl EmbeddingClassifier {
    pub fn new(dimensions: usize) -> Self {
        Self {
            embedder: SimpleEmbedder::new(dimensions),
        }
    }
}

#[async_trait]
impl Classifier for EmbeddingClassifier {
    async fn score(&self, context: &str, candidate: &str) -> Result<f32, ModelError> {
        let similarity = cosine_similarity(
            &self.embedder.embed(context),
            &self.embedder.embed(candidate),
        );
        Ok(similarity.clamp(0.0, 1.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroundednessResult {
    pub verdict: Verdict,
    /// Classifier confidence; absent when no score could be computed.
    pub confidence: Option<f32>,
    pub note: Option<String>,
}

pub const NOTE_UNGROUNDED: &str = "ungrounded: no context available for groundedness check";
pub const NOTE_WEAK: &str = "weakly grounded";
pub const NOTE_UNAVAILABLE: &str = "classifier unavailable";

pub struct GroundednessChecker {
    classifier: Arc<dyn Classifier>,
    threshold: f32,
}

impl std::fmt::Debug for GroundednessChecker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroundednessChecker")
            .field("threshold", &self.threshold)
            .finish()
    }
}

impl GroundednessChecker {
    pub fn new(classifier: Arc<dyn Classifier>, threshold: f32) -> Self {
        Self {
            classifier,
            threshold,
        }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Score `plan_text` against the first context item.
    pub async fn check(&self, plan_text: &str, context: &[ContextItem]) -> GroundednessResult {
        let Some(top) = context.first() else {
            return GroundednessResult {
                verdict: Verdict::Pass,
                confidence: None,
                note: Some(NOTE_UNGROUNDED.to_string()),
            };
        };

        match self.classifier.score(&top.content, plan_text).await {
            Ok(confidence) => {
                let note = if confidence < self.threshold {
                    debug!(
                        doc_id = %top.doc_id,
                        confidence,
                        threshold = self.threshold,
                        "Plan is weakly grounded"
                    );
                    Some(format!(
                        "{NOTE_WEAK}: support {confidence:.2} below threshold {:.2}",
                        self.threshold
                    ))
                } else {
                    None
                };
                GroundednessResult {
                    verdict: Verdict::Pass,
                    confidence: Some(confidence),
                    note,
                }
            }
            Err(e) => {
                warn!(error = %e, "Groundedness classifier failed");
                GroundednessResult {
                    verdict: Verdict::Pass,
                    confidence: None,
                    note: Some(format!("{NOTE_UNAVAILABLE}: {e}")),
                }
            }
        }
    }
}
