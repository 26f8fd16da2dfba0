//! Context retrieval for triage: embeddings, the long-term vector store,
//! the BM25 index, and rank fusion across them.

pub mod embedder;
pub mod fusion;
pub mod lexical;
pub mod store;

pub use embedder::{SimpleEmbedder, cosine_similarity};
pub use fusion::{DEFAULT_RRF_K, HybridRetriever, rrf_fuse};
pub use lexical::{Bm25Index, LexicalHit};
pub use store::{SourceAllowlist, SqliteVectorStore, StoredDocument, VectorHit, VectorStore};
