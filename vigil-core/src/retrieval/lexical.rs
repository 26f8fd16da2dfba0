//! BM25 keyword index over an in-RAM Tantivy index.
//!
//! An index is immutable once built. Reindexing builds a fresh one and the
//! owner swaps it in, so readers never observe a half-written corpus.

use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{Index, IndexReader, IndexWriter, doc};

use crate::error::RetrievalError;

const WRITER_HEAP_BYTES: usize = 20_000_000;

/// A ranked lexical hit.
#[derive(Debug, Clone, PartialEq)]
pub struct LexicalHit {
    pub doc_id: String,
    pub content: String,
    pub score: f32,
}

pub struct Bm25Index {
    index: Index,
    reader: IndexReader,
    id_field: Field,
    content_field: Field,
    doc_count: usize,
}

impl std::fmt::Debug for Bm25Index {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bm25Index")
            .field("doc_count", &self.doc_count)
            .finish()
    }
}

fn index_error(context: &str, e: impl std::fmt::Display) -> RetrievalError {
    RetrievalError::Index {
        message: format!("{context}: {e}"),
    }
}

impl Bm25Index {
    /// Build an index over `(doc_id, content)` pairs.
    pub fn build<'a, I>(documents: I) -> Result<Self, RetrievalError>
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut schema_builder = Schema::builder();
        let id_field = schema_builder.add_text_field("id", STRING | STORED);
        let content_field = schema_builder.add_text_field("content", TEXT | STORED);
        let schema = schema_builder.build();

        let index = Index::create_in_ram(schema);
        let mut writer: IndexWriter = index
            .writer_with_num_threads(1, WRITER_HEAP_BYTES)
            .map_err(|e| index_error("Failed to create writer", e))?;

        let mut doc_count = 0;
        for (doc_id, content) in documents {
            writer
                .add_document(doc!(
                    id_field => doc_id,
                    content_field => content,
                ))
                .map_err(|e| index_error("Failed to add document", e))?;
            doc_count += 1;
        }
        writer
            .commit()
            .map_err(|e| index_error("Failed to commit", e))?;

        let reader = index
            .reader()
            .map_err(|e| index_error("Failed to create reader", e))?;

        Ok(Self {
            index,
            reader,
            id_field,
            content_field,
            doc_count,
        })
    }

    /// An index with no documents.
    pub fn empty() -> Result<Self, RetrievalError> {
        Self::build(std::iter::empty::<(&str, &str)>())
    }

    pub fn len(&self) -> usize {
        self.doc_count
    }

    pub fn is_empty(&self) -> bool {
        self.doc_count == 0
    }

    /// Top `k` documents by BM25 score, best first.
    ///
    /// Query syntax errors are tolerated: free text from alerts routinely
    /// contains characters the query grammar treats as operators.
    pub fn search(&self, query: &str, k: usize) -> Result<Vec<LexicalHit>, RetrievalError> {
        if k == 0 || self.doc_count == 0 || query.trim().is_empty() {
            return Ok(Vec::new());
        }

        let searcher = self.reader.searcher();
        let parser = QueryParser::for_index(&self.index, vec![self.content_field]);
        let (parsed, _errors) = parser.parse_query_lenient(query);

        let top_docs = searcher
            .search(&*parsed, &TopDocs::with_limit(k))
            .map_err(|e| index_error("Search failed", e))?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(address)
                .map_err(|e| index_error("Failed to retrieve doc", e))?;
            let field_text = |field: Field| {
                doc.get_first(field)
                    .and_then(|v| v.as_str())
                    .unwrap_or("")
                    .to_string()
            };
            hits.push(LexicalHit {
                doc_id: field_text(self.id_field),
                content: field_text(self.content_field),
                score,
            });
        }
        Ok(hits)
    }
}
