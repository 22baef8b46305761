//! Error types shared by every stage of the pipeline.
//!
//! Retryable kinds (`Embedding`, `Generation`, `Timeout`, `IndexUnavailable`)
//! are classified by [`CopilotError::is_retryable`]; the application's retry
//! helper only re-attempts those. Terminal kinds carry the document, chunk,
//! or query id needed to reproduce them.

use thiserror::Error;

use crate::citation::Violation;

/// Result type alias using [`CopilotError`].
pub type Result<T> = std::result::Result<T, CopilotError>;

#[derive(Error, Debug, Clone)]
pub enum CopilotError {
    /// Extractor output was malformed (non-contiguous pages, all pages empty).
    #[error("normalization failed: {0}")]
    Normalization(String),

    /// The document contains no text to chunk.
    #[error("document {document_id} is empty")]
    EmptyDocument { document_id: String },

    /// The embedding gateway failed.
    #[error("embedding failed: {message}")]
    Embedding { message: String, retryable: bool },

    /// The vector index could not serve the request.
    #[error("index unavailable: {0}")]
    IndexUnavailable(String),

    /// Every candidate fell below the similarity cutoff. Not a fault.
    #[error("no relevant evidence found for query {query_id}")]
    NoRelevantEvidence { query_id: String },

    /// An answer cited material that fails validation.
    #[error("citation validation failed for query {query_id}: {} violation(s)", .violations.len())]
    CitationValidation {
        query_id: String,
        violations: Vec<Violation>,
    },

    /// The generation gateway failed.
    #[error("generation failed: {message}")]
    Generation { message: String, retryable: bool },

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: String, secs: u64 },

    /// The caller cancelled the query before an answer was released.
    #[error("query {query_id} was cancelled")]
    Cancelled { query_id: String },

    /// Raw format extraction failed.
    #[error("extraction failed: {0}")]
    Extraction(String),

    /// No extractor exists for the given format hint.
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// The query itself is malformed (empty text, unknown scope, ...).
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("not found: {0}")]
    NotFound(String),
}

impl CopilotError {
    /// Whether the error is transient and worth another attempt.
    pub fn is_retryable(&self) -> bool {
        match self {
            CopilotError::Embedding { retryable, .. } => *retryable,
            CopilotError::Generation { retryable, .. } => *retryable,
            CopilotError::Timeout { .. } | CopilotError::IndexUnavailable(_) => true,
            _ => false,
        }
    }

    pub fn embedding(message: impl Into<String>, retryable: bool) -> Self {
        CopilotError::Embedding {
            message: message.into(),
            retryable,
        }
    }

    pub fn generation(message: impl Into<String>, retryable: bool) -> Self {
        CopilotError::Generation {
            message: message.into(),
            retryable,
        }
    }
}
