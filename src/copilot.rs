//! Application facade.
//!
//! [`Copilot`] wires one index, one embedder, and one generator into an
//! [`Ingestor`] and a [`Dispatcher`] and exposes the operations the CLI and
//! HTTP server call. Both share the same embedder and index, so a document
//! committed by an ingestion is immediately visible to queries.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use paper_copilot_core::embedding::Embedder;
use paper_copilot_core::generation::Generator;
use paper_copilot_core::index::VectorIndex;
use paper_copilot_core::models::{Answer, Chunk, DocumentSummary, QueryMode};
use paper_copilot_core::{CopilotError, Result};
use tracing::info;

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::dispatch::Dispatcher;
use crate::embedding::create_embedder;
use crate::generation::create_generator;
use crate::ingest::{IngestReport, Ingestor};
use crate::retry::{with_backoff, RetryPolicy};
use crate::sqlite_index::SqliteIndex;

pub struct Copilot {
    config: Config,
    index: Arc<dyn VectorIndex>,
    ingestor: Ingestor,
    dispatcher: Dispatcher,
    retry: RetryPolicy,
}

impl Copilot {
    /// Open the SQLite index and build the configured providers.
    pub async fn from_config(config: Config) -> anyhow::Result<Self> {
        let index = Arc::new(SqliteIndex::open(&config.index).await?);
        let embedder = create_embedder(&config.embedding)?;
        let generator = create_generator(&config.generation)?;
        info!(
            index = %config.index.path.display(),
            embedder = embedder.model_name(),
            generator = generator.model_name(),
            "copilot ready"
        );
        Ok(Self::with_components(config, index, embedder, generator))
    }

    pub fn with_components(
        config: Config,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        let ingestor = Ingestor::new(&config, index.clone(), embedder.clone());
        let dispatcher = Dispatcher::new(&config, index.clone(), embedder, generator);
        let retry = RetryPolicy::from_config(&config.retry);
        Self {
            config,
            index,
            ingestor,
            dispatcher,
            retry,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub async fn ingest(
        &self,
        bytes: &[u8],
        format_hint: &str,
        title: Option<String>,
    ) -> Result<IngestReport> {
        self.ingestor.ingest(bytes, format_hint, title).await
    }

    pub async fn ingest_path(&self, path: &Path) -> Result<IngestReport> {
        self.ingestor.ingest_path(path).await
    }

    pub async fn ingest_many(&self, paths: &[PathBuf]) -> Vec<(PathBuf, Result<IngestReport>)> {
        self.ingestor.ingest_many(paths).await
    }

    pub async fn ask(
        &self,
        question: &str,
        mode: QueryMode,
        scope: Option<Vec<String>>,
    ) -> Result<Answer> {
        self.ask_with_cancel(question, mode, scope, &CancelToken::new())
            .await
    }

    pub async fn ask_with_cancel(
        &self,
        question: &str,
        mode: QueryMode,
        scope: Option<Vec<String>>,
        cancel: &CancelToken,
    ) -> Result<Answer> {
        self.dispatcher.ask(question, mode, scope, cancel).await
    }

    pub async fn get_chunk(&self, chunk_id: &str) -> Result<Chunk> {
        let index = self.index.as_ref();
        with_backoff(&self.retry, "get_chunk", || index.get_chunk(chunk_id))
            .await?
            .ok_or_else(|| CopilotError::NotFound(format!("chunk {}", chunk_id)))
    }

    pub async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let index = self.index.as_ref();
        with_backoff(&self.retry, "list_documents", || index.list_documents()).await
    }

    pub async fn get_document(&self, document_id: &str) -> Result<DocumentSummary> {
        let index = self.index.as_ref();
        with_backoff(&self.retry, "get_document", || index.get_document(document_id))
            .await?
            .ok_or_else(|| CopilotError::NotFound(format!("document {}", document_id)))
    }

    /// Remove a document with all of its chunks and vectors.
    pub async fn delete_document(&self, document_id: &str) -> Result<()> {
        let index = self.index.as_ref();
        let deleted = with_backoff(&self.retry, "delete_document", || {
            index.delete_document(document_id)
        })
        .await?;
        if !deleted {
            return Err(CopilotError::NotFound(format!("document {}", document_id)));
        }
        info!(document_id, "deleted document");
        Ok(())
    }
}
