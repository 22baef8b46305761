//! Ingestion pipeline orchestration.
//!
//! Coordinates the write path for one document: format detection →
//! extraction → page normalization → chunking → embedding → staged index
//! writes → commit. A document becomes visible to queries only when its
//! commit succeeds; any failure after staging aborts the staged writes.
//!
//! Documents are content-addressed (SHA-256 of the raw bytes), so ingesting
//! the same bytes twice is a no-op unless the embedding model changed or
//! the stored copy is missing chunks; then the document is re-embedded and
//! its chunks replaced.
//!
//! Embedding batches run concurrently, bounded by one semaphore shared by
//! every document this ingestor processes. Batches that exhaust their
//! retries are skipped, reported, and counted on the stored document so a
//! later ingest of the same bytes fills the gap. The ingestion fails only
//! when nothing could be embedded.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use futures::stream::{self, StreamExt};
use paper_copilot_core::chunk::{chunk_document, ChunkParams};
use paper_copilot_core::embedding::{check_dims, Embedder};
use paper_copilot_core::index::VectorIndex;
use paper_copilot_core::models::{Chunk, DocumentSummary, FormatTag};
use paper_copilot_core::normalize::normalize_pages;
use paper_copilot_core::{CopilotError, Result};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::extract::extract_pages;
use crate::retry::{with_backoff, RetryPolicy};

/// A chunk left out of the index because it could not be embedded.
#[derive(Debug, Clone, Serialize)]
pub struct SkippedChunk {
    pub chunk_id: String,
    pub page_start: u32,
    pub page_end: u32,
    pub reason: String,
}

/// Outcome of ingesting one document.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub title: Option<String>,
    pub format: FormatTag,
    /// The same bytes were already indexed under the current model.
    pub already_indexed: bool,
    /// The document was indexed before, under a different embedding model
    /// or with chunks missing.
    pub reembedded: bool,
    pub page_count: usize,
    /// Chunks produced by the chunker.
    pub chunk_count: usize,
    /// Chunks committed to the index.
    pub indexed_chunks: usize,
    pub skipped: Vec<SkippedChunk>,
}

/// SHA-256 hex digest of the raw document bytes.
pub fn document_id(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

pub struct Ingestor {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    chunking: ChunkParams,
    batch_size: usize,
    embed_permits: Arc<Semaphore>,
    retry: RetryPolicy,
    max_document_bytes: usize,
    max_concurrent_documents: usize,
}

impl Ingestor {
    pub fn new(config: &Config, index: Arc<dyn VectorIndex>, embedder: Arc<dyn Embedder>) -> Self {
        Self {
            index,
            embedder,
            chunking: config.chunking.params(),
            batch_size: config.embedding.batch_size.max(1),
            embed_permits: Arc::new(Semaphore::new(config.embedding.max_concurrency.max(1))),
            retry: RetryPolicy::from_config(&config.retry),
            max_document_bytes: config.ingest.max_document_bytes,
            max_concurrent_documents: config.ingest.max_concurrent_documents.max(1),
        }
    }

    /// Ingest raw document bytes. `format_hint` is a format name, file
    /// extension, filename, or MIME type.
    #[instrument(skip(self, bytes, title), fields(bytes = bytes.len()))]
    pub async fn ingest(
        &self,
        bytes: &[u8],
        format_hint: &str,
        title: Option<String>,
    ) -> Result<IngestReport> {
        let format = FormatTag::from_hint(format_hint)
            .ok_or_else(|| CopilotError::UnsupportedFormat(format_hint.to_string()))?;
        if bytes.len() > self.max_document_bytes {
            return Err(CopilotError::Extraction(format!(
                "document is {} bytes, limit is {}",
                bytes.len(),
                self.max_document_bytes
            )));
        }

        let doc_id = document_id(bytes);
        let model = self.embedder.model_name().to_string();

        let index = self.index.as_ref();
        let existing =
            with_backoff(&self.retry, "get_document", || index.get_document(&doc_id)).await?;
        if let Some(summary) = &existing {
            if summary.embedding_model == model && summary.is_complete() {
                info!(document_id = %doc_id, "document already indexed");
                return Ok(IngestReport {
                    document_id: doc_id,
                    title: summary.title.clone(),
                    format: summary.format,
                    already_indexed: true,
                    reembedded: false,
                    page_count: summary.page_count,
                    chunk_count: summary.chunk_count,
                    indexed_chunks: summary.chunk_count,
                    skipped: vec![],
                });
            }
            if summary.embedding_model != model {
                info!(
                    document_id = %doc_id,
                    old_model = %summary.embedding_model,
                    new_model = %model,
                    "embedding model changed, re-embedding document"
                );
            } else {
                info!(
                    document_id = %doc_id,
                    skipped_chunks = summary.skipped_chunks,
                    "stored document is incomplete, re-embedding"
                );
            }
        }

        let ingested_at = existing
            .as_ref()
            .map(|s| s.ingested_at)
            .unwrap_or_else(Utc::now);
        let title = title.or_else(|| existing.as_ref().and_then(|s| s.title.clone()));

        let raw = extract_pages(bytes, format)?;
        let document = normalize_pages(&doc_id, title, format, ingested_at, &raw)?;
        let chunks = chunk_document(&document, &self.chunking)?;
        debug!(
            document_id = %doc_id,
            pages = document.page_count(),
            chunks = chunks.len(),
            "chunked document"
        );

        let (embedded, skipped) = self.embed_chunks(&chunks).await;
        if embedded.is_empty() {
            let reason = skipped
                .first()
                .map(|s| s.reason.clone())
                .unwrap_or_else(|| "no chunks".to_string());
            return Err(CopilotError::embedding(
                format!("document {}: no chunk could be embedded: {}", doc_id, reason),
                false,
            ));
        }

        let summary = DocumentSummary::from_document(&document, embedded.len(), &model)
            .with_skipped(skipped.len());
        let committed = with_backoff(&self.retry, "index_commit", || {
            self.stage_and_commit(&embedded, &summary)
        })
        .await;
        if let Err(e) = committed {
            if let Err(abort_err) = self.index.abort(&doc_id).await {
                warn!(document_id = %doc_id, error = %abort_err, "abort after failed commit failed");
            }
            return Err(e);
        }

        info!(
            document_id = %doc_id,
            chunks = chunks.len(),
            indexed = embedded.len(),
            skipped = skipped.len(),
            "ingested document"
        );

        Ok(IngestReport {
            document_id: doc_id,
            title: document.title.clone(),
            format,
            already_indexed: false,
            reembedded: existing.is_some(),
            page_count: document.page_count(),
            chunk_count: chunks.len(),
            indexed_chunks: embedded.len(),
            skipped,
        })
    }

    async fn stage_and_commit(
        &self,
        embedded: &[(&Chunk, Vec<f32>)],
        summary: &DocumentSummary,
    ) -> Result<()> {
        for (chunk, vector) in embedded {
            self.index.insert(chunk, vector).await?;
        }
        self.index.commit(summary).await
    }

    /// Embed chunks in concurrent batches, keeping chunk order.
    async fn embed_chunks<'c>(
        &self,
        chunks: &'c [Chunk],
    ) -> (Vec<(&'c Chunk, Vec<f32>)>, Vec<SkippedChunk>) {
        let embedder = self.embedder.as_ref();
        let batches: Vec<&'c [Chunk]> = chunks.chunks(self.batch_size).collect();

        let results = join_all(batches.iter().map(|batch| async move {
            let texts: Vec<String> = batch.iter().map(|c| c.text.clone()).collect();
            let texts = texts.as_slice();
            let _permit = self
                .embed_permits
                .acquire()
                .await
                .map_err(|_| CopilotError::embedding("embedding limiter closed", false))?;
            let vectors = with_backoff(&self.retry, "embed", || embedder.embed(texts)).await?;
            if vectors.len() != texts.len() {
                return Err(CopilotError::embedding(
                    format!("expected {} vectors, got {}", texts.len(), vectors.len()),
                    false,
                ));
            }
            for v in &vectors {
                check_dims(embedder, v)?;
            }
            Ok::<_, CopilotError>(vectors)
        }))
        .await;

        let mut embedded = Vec::with_capacity(chunks.len());
        let mut skipped = Vec::new();
        for (batch, result) in batches.into_iter().zip(results) {
            match result {
                Ok(vectors) => embedded.extend(batch.iter().zip(vectors)),
                Err(e) => {
                    for chunk in batch.iter() {
                        warn!(
                            chunk_id = %chunk.id,
                            document_id = %chunk.document_id,
                            page_start = chunk.page_start,
                            page_end = chunk.page_end,
                            error = %e,
                            "skipping chunk after embedding failure"
                        );
                        skipped.push(SkippedChunk {
                            chunk_id: chunk.id.clone(),
                            page_start: chunk.page_start,
                            page_end: chunk.page_end,
                            reason: e.to_string(),
                        });
                    }
                }
            }
        }
        (embedded, skipped)
    }

    /// Read and ingest a file, inferring the format from its extension.
    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        let hint = path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| CopilotError::UnsupportedFormat(path.display().to_string()))?;
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| CopilotError::Extraction(format!("{}: {}", path.display(), e)))?;
        let title = path.file_name().map(|n| n.to_string_lossy().into_owned());
        self.ingest(&bytes, hint, title).await
    }

    /// Ingest several files, up to `ingest.max_concurrent_documents` at once.
    /// Results come back in input order.
    pub async fn ingest_many(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<IngestReport>)> {
        stream::iter(paths.iter().cloned())
            .map(|path| async move {
                let result = self.ingest_path(&path).await;
                (path, result)
            })
            .buffered(self.max_concurrent_documents)
            .collect()
            .await
    }
}
