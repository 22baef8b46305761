//! Core data models used throughout Paper Copilot.
//!
//! These types represent the documents, pages, chunks, evidence, and answers
//! that flow through the ingestion and query pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CopilotError;

/// Source format of an ingested document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FormatTag {
    Pdf,
    Docx,
    Text,
    Markdown,
}

impl FormatTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            FormatTag::Pdf => "pdf",
            FormatTag::Docx => "docx",
            FormatTag::Text => "text",
            FormatTag::Markdown => "markdown",
        }
    }

    /// Resolve a format hint: a tag name, a file extension, a filename, or a
    /// MIME type.
    pub fn from_hint(hint: &str) -> Option<FormatTag> {
        let hint = hint.trim().to_ascii_lowercase();
        let ext = hint.rsplit('.').next().unwrap_or(&hint);
        match (hint.as_str(), ext) {
            ("application/pdf", _) | (_, "pdf") => Some(FormatTag::Pdf),
            ("application/vnd.openxmlformats-officedocument.wordprocessingml.document", _)
            | (_, "docx") => Some(FormatTag::Docx),
            ("text/plain", _) | (_, "txt") | (_, "text") => Some(FormatTag::Text),
            ("text/markdown", _) | (_, "md") | (_, "markdown") => Some(FormatTag::Markdown),
            _ => None,
        }
    }
}

impl fmt::Display for FormatTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FormatTag {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FormatTag::from_hint(s).ok_or_else(|| CopilotError::UnsupportedFormat(s.to_string()))
    }
}

/// One page of extractor output, before normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawPage {
    /// 1-based page number as reported by the extractor.
    pub index: u32,
    pub text: String,
}

impl RawPage {
    pub fn new(index: u32, text: impl Into<String>) -> Self {
        Self {
            index,
            text: text.into(),
        }
    }
}

/// A normalized page. Offsets are byte offsets into [`Document::text`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// 1-based, matches human page numbers.
    pub index: u32,
    pub text: String,
    pub start: usize,
    /// Exclusive.
    pub end: usize,
}

/// An immutable, content-addressed document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    /// SHA-256 hex digest of the raw ingested bytes.
    pub id: String,
    pub title: Option<String>,
    pub format: FormatTag,
    pub ingested_at: DateTime<Utc>,
    pub pages: Vec<Page>,
    /// Page texts joined by [`PAGE_SEPARATOR`].
    pub text: String,
}

/// Separator placed between page texts in [`Document::text`].
pub const PAGE_SEPARATOR: &str = "\n\n";

impl Document {
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    pub fn page(&self, index: u32) -> Option<&Page> {
        self.pages.iter().find(|p| p.index == index)
    }
}

/// Links a chunk to the neighbor it shares text with.
///
/// `start`/`end` are document byte offsets of the shared region; the text
/// in that range is byte-identical in both chunks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlapMarker {
    pub chunk_id: String,
    pub start: usize,
    pub end: usize,
}

/// The part of a chunk's text that came from one page.
///
/// `start`/`end` are byte offsets into [`Chunk::text`]. Pages without text
/// that were attached to the chunk's span have `start == end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageSpan {
    pub page: u32,
    pub start: usize,
    pub end: usize,
}

/// A window of document text with recorded page provenance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Deterministic: derived from `(document_id, start_offset, end_offset)`.
    pub id: String,
    pub document_id: String,
    /// 0-based position in document order.
    pub position: usize,
    pub text: String,
    pub token_count: usize,
    /// Inclusive.
    pub page_start: u32,
    /// Inclusive.
    pub page_end: u32,
    /// Document byte offset of the first character.
    pub start_offset: usize,
    /// Document byte offset one past the last character.
    pub end_offset: usize,
    /// Offset of the first character within its page.
    pub start_in_page: usize,
    /// Offset one past the last character within its page.
    pub end_in_page: usize,
    pub page_spans: Vec<PageSpan>,
    pub overlap_prev: Option<OverlapMarker>,
    pub overlap_next: Option<OverlapMarker>,
    /// SHA-256 of `text`.
    pub hash: String,
}

/// Lightweight metadata for an indexed document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DocumentSummary {
    pub id: String,
    pub title: Option<String>,
    pub format: FormatTag,
    pub page_count: usize,
    /// Chunks committed to the index.
    pub chunk_count: usize,
    /// Chunks the chunker produced but that could not be embedded.
    #[serde(default)]
    pub skipped_chunks: usize,
    pub embedding_model: String,
    pub ingested_at: DateTime<Utc>,
}

impl DocumentSummary {
    pub fn from_document(doc: &Document, chunk_count: usize, embedding_model: &str) -> Self {
        Self {
            id: doc.id.clone(),
            title: doc.title.clone(),
            format: doc.format,
            page_count: doc.page_count(),
            chunk_count,
            skipped_chunks: 0,
            embedding_model: embedding_model.to_string(),
            ingested_at: doc.ingested_at,
        }
    }

    pub fn with_skipped(mut self, skipped_chunks: usize) -> Self {
        self.skipped_chunks = skipped_chunks;
        self
    }

    /// Every chunk of the document is searchable.
    pub fn is_complete(&self) -> bool {
        self.skipped_chunks == 0
    }

    /// Human label used in prompts: the title if known, else a short id.
    pub fn display_name(&self) -> String {
        match &self.title {
            Some(t) if !t.trim().is_empty() => t.clone(),
            _ => self.id.chars().take(12).collect(),
        }
    }
}

/// Query workflow selected by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QueryMode {
    #[default]
    Standard,
    Comparison,
    Simplification,
}

impl QueryMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryMode::Standard => "standard",
            QueryMode::Comparison => "comparison",
            QueryMode::Simplification => "simplification",
        }
    }
}

impl fmt::Display for QueryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for QueryMode {
    type Err = CopilotError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "standard" | "normal" => Ok(QueryMode::Standard),
            "comparison" | "compare" => Ok(QueryMode::Comparison),
            "simplification" | "simplify" => Ok(QueryMode::Simplification),
            other => Err(CopilotError::InvalidQuery(format!(
                "unknown mode '{}': use standard, comparison, or simplification",
                other
            ))),
        }
    }
}

/// A question against the corpus. Transient.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub id: String,
    pub text: String,
    pub mode: QueryMode,
    /// Restrict retrieval to these document ids.
    pub scope: Option<Vec<String>>,
}

/// One ranked piece of evidence supplied to the generator.
#[derive(Debug, Clone, Serialize)]
pub struct EvidenceItem {
    /// Prompt label, `S1..Sn` in rank order.
    pub label: String,
    pub chunk: Chunk,
    pub similarity: f64,
    pub secondary: f64,
    pub combined: f64,
    /// Set in comparison mode: `Paper 1..n`.
    pub paper_tag: Option<String>,
}

/// Ordered evidence for one query.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub query_id: String,
    pub items: Vec<EvidenceItem>,
}

impl RetrievalResult {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn by_chunk_id(&self, chunk_id: &str) -> Option<&EvidenceItem> {
        self.items.iter().find(|e| e.chunk.id == chunk_id)
    }

    pub fn by_label(&self, label: &str) -> Option<&EvidenceItem> {
        self.items
            .iter()
            .find(|e| e.label.eq_ignore_ascii_case(label))
    }

    /// Reassign `S1..Sn` labels in current order.
    pub fn relabel(&mut self) {
        for (i, item) in self.items.iter_mut().enumerate() {
            item.label = format!("S{}", i + 1);
        }
    }
}

/// A reference from answer text to retrieved evidence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Citation {
    pub chunk_id: String,
    pub document_id: String,
    pub page: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quote: Option<String>,
    /// Paper the answer attributes this citation to (comparison mode).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub paper_tag: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnswerStatus {
    Validated,
    Rejected,
    Degraded,
}

/// Generated text plus validated citations.
#[derive(Debug, Clone, Serialize)]
pub struct Answer {
    pub query_id: String,
    pub mode: QueryMode,
    pub text: String,
    pub citations: Vec<Citation>,
    pub status: AnswerStatus,
    /// Number of generation calls made, including re-generations.
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disclaimer: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_from_hint() {
        assert_eq!(FormatTag::from_hint("paper.PDF"), Some(FormatTag::Pdf));
        assert_eq!(FormatTag::from_hint("application/pdf"), Some(FormatTag::Pdf));
        assert_eq!(FormatTag::from_hint("docx"), Some(FormatTag::Docx));
        assert_eq!(FormatTag::from_hint("notes.md"), Some(FormatTag::Markdown));
        assert_eq!(FormatTag::from_hint("text/plain"), Some(FormatTag::Text));
        assert_eq!(FormatTag::from_hint("image.png"), None);
    }

    #[test]
    fn test_query_mode_parse() {
        assert_eq!("compare".parse::<QueryMode>().unwrap(), QueryMode::Comparison);
        assert_eq!("Simplify".parse::<QueryMode>().unwrap(), QueryMode::Simplification);
        assert_eq!("normal".parse::<QueryMode>().unwrap(), QueryMode::Standard);
        assert!("summarize".parse::<QueryMode>().is_err());
    }
}
