//! Retrieval index abstraction.
//!
//! The [`VectorIndex`] trait is the only way the pipeline touches stored
//! chunks and vectors. Writes are staged per document and become visible
//! atomically on [`VectorIndex::commit`], so a concurrent query can never
//! see (or cite) a partially ingested document.
//!
//! Implementations must be `Send + Sync`. The in-memory backend lives in
//! [`memory`]; the SQLite backend lives in the `paper-copilot` app crate.

pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::models::{Chunk, DocumentSummary};

/// One vector search result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct IndexHit {
    pub chunk_id: String,
    pub document_id: String,
    /// Cosine similarity to the query vector.
    pub similarity: f64,
}

/// Abstract vector index with a per-document commit boundary.
///
/// # Operations
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`insert`](VectorIndex::insert) | Stage a chunk and its vector |
/// | [`commit`](VectorIndex::commit) | Publish a document's staged chunks atomically |
/// | [`abort`](VectorIndex::abort) | Discard a document's staged chunks |
/// | [`query`](VectorIndex::query) | Top-K cosine search over committed vectors |
/// | [`get_chunk`](VectorIndex::get_chunk) | Committed chunk metadata by id |
/// | [`get_document`](VectorIndex::get_document) | Committed document summary |
/// | [`list_documents`](VectorIndex::list_documents) | All committed documents |
/// | [`delete_document`](VectorIndex::delete_document) | Remove a document with its chunks and vectors |
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Stage a chunk and its vector. Invisible to readers until committed.
    ///
    /// Staging the same chunk id twice keeps the latest vector.
    async fn insert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()>;

    /// Publish every chunk staged for `document.id`, replacing any chunks
    /// previously committed for that document.
    async fn commit(&self, document: &DocumentSummary) -> Result<()>;

    /// Drop staged chunks for a document. Committed data is untouched.
    async fn abort(&self, document_id: &str) -> Result<()>;

    /// Top-`k` committed chunks by cosine similarity, optionally restricted
    /// to the given document ids. Ordered by similarity descending, then
    /// chunk id ascending.
    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<IndexHit>>;

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>>;

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentSummary>>;

    /// Committed documents ordered by ingestion time, oldest first.
    async fn list_documents(&self) -> Result<Vec<DocumentSummary>>;

    /// Returns `false` if the document was not indexed.
    async fn delete_document(&self, document_id: &str) -> Result<bool>;
}

/// Order hits by similarity descending, ties by chunk id.
pub fn sort_hits(hits: &mut [IndexHit]) {
    hits.sort_by(|a, b| {
        b.similarity
            .partial_cmp(&a.similarity)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
}
