//! Long-term vector store with a source allowlist.
//!
//! Every write must carry a `source` metadata entry naming an allowlisted
//! source. Queries re-check the allowlist so rows written before a source
//! was removed from the list are never served.

use rusqlite::{Connection, OptionalExtension, params};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use super::embedder::{SimpleEmbedder, cosine_similarity, from_bytes, to_bytes};
use crate::error::StoreError;

/// A stored document without scoring.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredDocument {
    pub doc_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
}

/// A similarity hit. Lower distance is closer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorHit {
    pub doc_id: String,
    pub content: String,
    pub metadata: BTreeMap<String, Value>,
    pub distance: f32,
}

/// Set of document sources permitted in long-term memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceAllowlist {
    sources: HashSet<String>,
}

impl SourceAllowlist {
    pub fn new<I, S>(sources: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sources: sources.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, source: &str) -> bool {
        self.sources.contains(source)
    }

    /// Reject metadata whose `source` is missing or not allowlisted.
    pub fn check(&self, metadata: &BTreeMap<String, Value>) -> Result<(), StoreError> {
        let source = metadata
            .get("source")
            .and_then(|v| v.as_str())
            .unwrap_or("");
        if self.contains(source) {
            Ok(())
        } else {
            Err(StoreError::PolicyViolation {
                origin: if source.is_empty() {
                    "<missing>".to_string()
                } else {
                    source.to_string()
                },
            })
        }
    }
}

/// Long-term document storage with similarity search.
pub trait VectorStore: Send + Sync {
    /// Insert or replace a document. Fails `PolicyViolation` for non-allowlisted sources.
    fn add(
        &self,
        doc_id: &str,
        content: &str,
        metadata: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError>;

    /// The `k` nearest allowlisted documents, closest first.
    fn query(&self, text: &str, k: usize) -> Result<Vec<VectorHit>, StoreError>;

    fn get(&self, doc_id: &str) -> Result<Option<StoredDocument>, StoreError>;

    fn len(&self) -> Result<usize, StoreError>;

    fn is_empty(&self) -> Result<bool, StoreError> {
        Ok(self.len()? == 0)
    }

    fn allowlist(&self) -> &SourceAllowlist;
}

/// SQLite-backed store. Embeddings are kept as little-endian f32 blobs and
/// scored in process.
pub struct SqliteVectorStore {
    conn: Mutex<Connection>,
    embedder: SimpleEmbedder,
    allowlist: SourceAllowlist,
}

impl std::fmt::Debug for SqliteVectorStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteVectorStore")
            .field("dimensions", &self.embedder.dimensions())
            .field("allowlist", &self.allowlist)
            .finish()
    }
}

fn db_error(e: rusqlite::Error) -> StoreError {
    StoreError::Database {
        message: e.to_string(),
    }
}

impl SqliteVectorStore {
    pub fn open(
        path: &Path,
        dimensions: usize,
        allowlist: SourceAllowlist,
    ) -> Result<Self, StoreError> {
        Self::init(Connection::open(path).map_err(db_error)?, dimensions, allowlist)
    }

    pub fn open_in_memory(dimensions: usize, allowlist: SourceAllowlist) -> Result<Self, StoreError> {
        Self::init(
            Connection::open_in_memory().map_err(db_error)?,
            dimensions,
            allowlist,
        )
    }

    fn init(
        conn: Connection,
        dimensions: usize,
        allowlist: SourceAllowlist,
    ) -> Result<Self, StoreError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS documents (
                doc_id TEXT PRIMARY KEY,
                content TEXT NOT NULL,
                metadata TEXT NOT NULL,
                embedding BLOB NOT NULL
            );",
        )
        .map_err(db_error)?;
        Ok(Self {
            conn: Mutex::new(conn),
            embedder: SimpleEmbedder::new(dimensions),
            allowlist,
        })
    }

    fn decode_metadata(doc_id: &str, raw: &str) -> Result<BTreeMap<String, Value>, StoreError> {
        serde_json::from_str(raw).map_err(|e| StoreError::Corrupt {
            doc_id: doc_id.to_string(),
            message: e.to_string(),
        })
    }
}

impl VectorStore for SqliteVectorStore {
    fn add(
        &self,
        doc_id: &str,
        content: &str,
        metadata: &BTreeMap<String, Value>,
    ) -> Result<(), StoreError> {
        if let Err(e) = self.allowlist.check(metadata) {
            warn!(doc_id, error = %e, "Rejected write to vector store");
            return Err(e);
        }

        let embedding = to_bytes(&self.embedder.embed(content));
        let metadata_json = serde_json::to_string(metadata).map_err(|e| StoreError::Corrupt {
            doc_id: doc_id.to_string(),
            message: e.to_string(),
        })?;

        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        conn.execute(
            "INSERT OR REPLACE INTO documents (doc_id, content, metadata, embedding)
             VALUES (?1, ?2, ?3, ?4)",
            params![doc_id, content, metadata_json, embedding],
        )
        .map_err(db_error)?;
        debug!(doc_id, "Stored document");
        Ok(())
    }

    fn query(&self, text: &str, k: usize) -> Result<Vec<VectorHit>, StoreError> {
        if k == 0 {
            return Ok(Vec::new());
        }
        let query_vec = self.embedder.embed(text);

        let rows = {
            let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
            let mut stmt = conn
                .prepare("SELECT doc_id, content, metadata, embedding FROM documents ORDER BY rowid")
                .map_err(db_error)?;
            let mapped = stmt
                .query_map([], |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                    ))
                })
                .map_err(db_error)?;
            mapped
                .collect::<Result<Vec<_>, _>>()
                .map_err(db_error)?
        };

        let mut hits = Vec::with_capacity(rows.len());
        for (doc_id, content, metadata_raw, blob) in rows {
            let metadata = Self::decode_metadata(&doc_id, &metadata_raw)?;
            if self.allowlist.check(&metadata).is_err() {
                continue;
            }
            let similarity = cosine_similarity(&query_vec, &from_bytes(&blob));
            hits.push(VectorHit {
                doc_id,
                content,
                metadata,
                distance: 1.0 - similarity,
            });
        }

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        hits.truncate(k);
        Ok(hits)
    }

    fn get(&self, doc_id: &str) -> Result<Option<StoredDocument>, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let row = conn
            .query_row(
                "SELECT content, metadata FROM documents WHERE doc_id = ?1",
                params![doc_id],
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )
            .optional()
            .map_err(db_error)?;

        row.map(|(content, metadata_raw)| {
            Ok(StoredDocument {
                doc_id: doc_id.to_string(),
                content,
                metadata: Self::decode_metadata(doc_id, &metadata_raw)?,
            })
        })
        .transpose()
    }

    fn len(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock().unwrap_or_else(|e| e.into_inner());
        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM documents", [], |row| row.get(0))
            .map_err(db_error)?;
        Ok(count.max(0) as usize)
    }

    fn allowlist(&self) -> &SourceAllowlist {
        &self.allowlist
    }
}
