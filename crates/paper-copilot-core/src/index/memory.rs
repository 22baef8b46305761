//! In-memory [`VectorIndex`] for tests and embedded use.
//!
//! All state sits behind one `std::sync::RwLock`, so a commit swaps a
//! document's chunks in a single write section and readers never observe a
//! half-published document. Vector search is brute-force cosine similarity.

use std::collections::HashMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;

use crate::embedding::cosine_similarity;
use crate::error::{CopilotError, Result};
use crate::models::{Chunk, DocumentSummary};

use super::{sort_hits, IndexHit, VectorIndex};

struct Entry {
    chunk: Chunk,
    vector: Vec<f32>,
}

#[derive(Default)]
struct State {
    documents: HashMap<String, DocumentSummary>,
    /// Committed entries keyed by chunk id.
    entries: HashMap<String, Entry>,
    /// Staged entries per document, in insertion order.
    staged: HashMap<String, Vec<Entry>>,
}

#[derive(Default)]
pub struct InMemoryIndex {
    state: RwLock<State>,
}

impl InMemoryIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| CopilotError::IndexUnavailable("in-memory index lock poisoned".into()))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| CopilotError::IndexUnavailable("in-memory index lock poisoned".into()))
    }

    /// Number of committed vectors.
    pub fn len(&self) -> usize {
        self.read().map(|s| s.entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl VectorIndex for InMemoryIndex {
    async fn insert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let mut state = self.write()?;
        let staged = state.staged.entry(chunk.document_id.clone()).or_default();
        staged.retain(|e| e.chunk.id != chunk.id);
        staged.push(Entry {
            chunk: chunk.clone(),
            vector: vector.to_vec(),
        });
        Ok(())
    }

    async fn commit(&self, document: &DocumentSummary) -> Result<()> {
        let mut state = self.write()?;
        let staged = match state.staged.remove(&document.id) {
            Some(staged) => staged,
            None if state.documents.contains_key(&document.id) => return Ok(()),
            None => {
                return Err(CopilotError::NotFound(format!(
                    "no staged chunks for document {}",
                    document.id
                )))
            }
        };

        state.entries.retain(|_, e| e.chunk.document_id != document.id);
        for entry in staged {
            state.entries.insert(entry.chunk.id.clone(), entry);
        }
        state.documents.insert(document.id.clone(), document.clone());
        Ok(())
    }

    async fn abort(&self, document_id: &str) -> Result<()> {
        self.write()?.staged.remove(document_id);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<IndexHit>> {
        let state = self.read()?;
        let mut hits: Vec<IndexHit> = state
            .entries
            .values()
            .filter(|e| scope.map_or(true, |ids| ids.iter().any(|id| *id == e.chunk.document_id)))
            .map(|e| IndexHit {
                chunk_id: e.chunk.id.clone(),
                document_id: e.chunk.document_id.clone(),
                similarity: cosine_similarity(vector, &e.vector) as f64,
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        Ok(self.read()?.entries.get(chunk_id).map(|e| e.chunk.clone()))
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        Ok(self.read()?.documents.get(document_id).cloned())
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let mut docs: Vec<DocumentSummary> = self.read()?.documents.values().cloned().collect();
        docs.sort_by(|a, b| a.ingested_at.cmp(&b.ingested_at).then_with(|| a.id.cmp(&b.id)));
        Ok(docs)
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        let mut state = self.write()?;
        state.staged.remove(document_id);
        state.entries.retain(|_, e| e.chunk.document_id != document_id);
        Ok(state.documents.remove(document_id).is_some())
    }
}
