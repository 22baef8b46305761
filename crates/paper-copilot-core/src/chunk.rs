//! Boundary-tracking text chunker.
//!
//! Splits a [`Document`] into overlapping [`Chunk`]s without losing page
//! provenance. Every chunk records the pages it touches, where each page's
//! text sits inside the chunk, and the exact byte range it shares with its
//! neighbors.
//!
//! # Algorithm
//!
//! 1. Tokenize each page on whitespace, remembering for every token its
//!    page index and its byte span in the document text.
//! 2. Slide a window of `chunk_size` tokens with stride
//!    `chunk_size - overlap`, where `overlap = round(chunk_size × overlap_ratio)`.
//! 3. A chunk's text is the document slice from its first token's start to
//!    its last token's end, so overlap regions are byte-identical copies.
//! 4. A trailing window shorter than `min_chunk_tokens` is merged into the
//!    preceding chunk.
//! 5. Pages with no tokens are attached to the span of the chunk that
//!    precedes them (or the first chunk, for leading pages), so the union of
//!    spans always covers every page.
//!
//! Chunk ids are a SHA-256 of `(document_id, start_offset, end_offset)`:
//! re-chunking identical input yields identical ids.
//!
//! # Example
//!
//! ```rust
//! use chrono::Utc;
//! use paper_copilot_core::chunk::{chunk_document, ChunkParams};
//! use paper_copilot_core::models::{FormatTag, RawPage};
//! use paper_copilot_core::normalize::normalize_pages;
//!
//! let pages = vec![RawPage::new(1, "Attention is all you need."), RawPage::new(2, "Results follow.")];
//! let doc = normalize_pages("doc-1", None, FormatTag::Text, Utc::now(), &pages).unwrap();
//! let chunks = chunk_document(&doc, &ChunkParams::default()).unwrap();
//! assert_eq!(chunks.len(), 1);
//! assert_eq!((chunks[0].page_start, chunks[0].page_end), (1, 2));
//! ```

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::{CopilotError, Result};
use crate::models::{Chunk, Document, OverlapMarker, PageSpan};

/// Window parameters for [`chunk_document`].
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkParams {
    /// Tokens per window.
    pub chunk_size: usize,
    /// Fraction of each window shared with the next, in `[0.0, 1.0)`.
    pub overlap_ratio: f64,
    /// Trailing windows with fewer tokens are merged into the previous chunk.
    pub min_chunk_tokens: usize,
}

impl Default for ChunkParams {
    fn default() -> Self {
        Self {
            chunk_size: 500,
            overlap_ratio: 0.1,
            min_chunk_tokens: 50,
        }
    }
}

impl ChunkParams {
    /// Overlap in tokens. Always less than `chunk_size` so the window advances.
    pub fn overlap_tokens(&self) -> usize {
        let size = self.chunk_size.max(1);
        let overlap = (size as f64 * self.overlap_ratio.clamp(0.0, 1.0)).round() as usize;
        overlap.min(size - 1)
    }

    pub fn stride(&self) -> usize {
        self.chunk_size.max(1) - self.overlap_tokens()
    }
}

/// A whitespace-delimited token with its provenance.
#[derive(Debug, Clone, Copy)]
struct Token {
    start: usize,
    end: usize,
    page: u32,
}

/// Split a document into overlapping, page-tracked chunks.
///
/// # Errors
///
/// Returns [`CopilotError::EmptyDocument`] if the document has no tokens.
///
/// # Guarantees
///
/// - Chunks are in document order with positions `0..N`.
/// - Every page of the document lies inside at least one chunk's
///   `page_start..=page_end`.
/// - For adjacent chunks, the text named by their overlap markers is
///   byte-identical in both.
pub fn chunk_document(doc: &Document, params: &ChunkParams) -> Result<Vec<Chunk>> {
    let tokens = tokenize(doc);
    if tokens.is_empty() {
        return Err(CopilotError::EmptyDocument {
            document_id: doc.id.clone(),
        });
    }

    let windows = plan_windows(tokens.len(), params);
    let mut chunks: Vec<Chunk> = windows
        .iter()
        .enumerate()
        .map(|(position, &(s, e))| build_chunk(doc, &tokens[s..e], position))
        .collect();

    attach_empty_pages(doc, &mut chunks);
    link_overlaps(&tokens, &windows, &mut chunks);

    debug!(
        document_id = %doc.id,
        tokens = tokens.len(),
        chunks = chunks.len(),
        "chunked document"
    );

    Ok(chunks)
}

fn tokenize(doc: &Document) -> Vec<Token> {
    let mut tokens = Vec::new();
    for page in &doc.pages {
        let mut run_start: Option<usize> = None;
        for (i, ch) in page.text.char_indices() {
            match (ch.is_whitespace(), run_start) {
                (true, Some(s)) => {
                    tokens.push(Token {
                        start: page.start + s,
                        end: page.start + i,
                        page: page.index,
                    });
                    run_start = None;
                }
                (false, None) => run_start = Some(i),
                _ => {}
            }
        }
        if let Some(s) = run_start {
            tokens.push(Token {
                start: page.start + s,
                end: page.start + page.text.len(),
                page: page.index,
            });
        }
    }
    tokens
}

/// Token index ranges `[start, end)` for each chunk.
fn plan_windows(n: usize, params: &ChunkParams) -> Vec<(usize, usize)> {
    let size = params.chunk_size.max(1);
    let stride = params.stride();

    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(n);
        windows.push((start, end));
        if end == n {
            break;
        }
        start += stride;
    }

    if windows.len() > 1 {
        let (s, e) = windows[windows.len() - 1];
        if e - s < params.min_chunk_tokens {
            windows.pop();
            if let Some(last) = windows.last_mut() {
                last.1 = n;
            }
        }
    }

    windows
}

fn build_chunk(doc: &Document, window: &[Token], position: usize) -> Chunk {
    let first = window[0];
    let last = window[window.len() - 1];
    let text = doc.text[first.start..last.end].to_string();

    let mut page_spans = Vec::new();
    for page in doc
        .pages
        .iter()
        .filter(|p| p.index >= first.page && p.index <= last.page)
    {
        let start = page.start.max(first.start).min(last.end) - first.start;
        let end = page.end.min(last.end).max(first.start) - first.start;
        page_spans.push(PageSpan {
            page: page.index,
            start,
            end: end.max(start),
        });
    }

    let page_offset = |index: u32| doc.page(index).map(|p| p.start).unwrap_or(0);

    Chunk {
        id: chunk_id(&doc.id, first.start, last.end),
        document_id: doc.id.clone(),
        position,
        token_count: window.len(),
        page_start: first.page,
        page_end: last.page,
        start_offset: first.start,
        end_offset: last.end,
        start_in_page: first.start - page_offset(first.page),
        end_in_page: last.end - page_offset(last.page),
        page_spans,
        overlap_prev: None,
        overlap_next: None,
        hash: content_hash(&text),
        text,
    }
}

/// Extend spans so pages without tokens are still covered.
fn attach_empty_pages(doc: &Document, chunks: &mut [Chunk]) {
    for page in &doc.pages {
        let covered = chunks
            .iter()
            .any(|c| c.page_start <= page.index && page.index <= c.page_end);
        if covered {
            continue;
        }
        match chunks.iter().rposition(|c| c.page_end < page.index) {
            Some(i) => {
                let chunk = &mut chunks[i];
                chunk.page_end = page.index;
                let at = chunk.text.len();
                chunk.page_spans.push(PageSpan {
                    page: page.index,
                    start: at,
                    end: at,
                });
            }
            None => {
                let chunk = &mut chunks[0];
                chunk.page_start = chunk.page_start.min(page.index);
                let at = chunk
                    .page_spans
                    .iter()
                    .position(|s| s.page > page.index)
                    .unwrap_or(0);
                chunk.page_spans.insert(
                    at,
                    PageSpan {
                        page: page.index,
                        start: 0,
                        end: 0,
                    },
                );
            }
        }
        debug!(document_id = %doc.id, page = page.index, "attached page without text to neighboring chunk");
    }
}

fn link_overlaps(tokens: &[Token], windows: &[(usize, usize)], chunks: &mut [Chunk]) {
    for i in 1..chunks.len() {
        let (_, prev_end) = windows[i - 1];
        let (next_start, _) = windows[i];
        if next_start >= prev_end {
            continue;
        }
        let start = tokens[next_start].start;
        let end = tokens[prev_end - 1].end;
        let prev_id = chunks[i - 1].id.clone();
        let next_id = chunks[i].id.clone();
        chunks[i - 1].overlap_next = Some(OverlapMarker {
            chunk_id: next_id,
            start,
            end,
        });
        chunks[i].overlap_prev = Some(OverlapMarker {
            chunk_id: prev_id,
            start,
            end,
        });
    }
}

/// Deterministic chunk id: first 32 hex chars of `SHA-256(doc:start:end)`.
pub fn chunk_id(document_id: &str, start: usize, end: usize) -> String {
    let mut hasher = Sha256::new();
    hasher.update(document_id.as_bytes());
    hasher.update(b":");
    hasher.update(start.to_string().as_bytes());
    hasher.update(b":");
    hasher.update(end.to_string().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    digest[..32].to_string()
}

/// SHA-256 hex digest of arbitrary bytes.
pub fn content_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

impl Chunk {
    pub fn contains_page(&self, page: u32) -> bool {
        self.page_start <= page && page <= self.page_end
    }

    /// Text shared with the previous chunk.
    pub fn overlap_prev_text(&self) -> Option<&str> {
        self.overlap_prev.as_ref().and_then(|m| self.local_slice(m))
    }

    /// Text shared with the next chunk.
    pub fn overlap_next_text(&self) -> Option<&str> {
        self.overlap_next.as_ref().and_then(|m| self.local_slice(m))
    }

    fn local_slice(&self, marker: &OverlapMarker) -> Option<&str> {
        let start = marker.start.checked_sub(self.start_offset)?;
        let end = marker.end.checked_sub(self.start_offset)?;
        self.text.get(start..end)
    }

    /// Pages whose text intersects the local byte range `[start, end)`.
    pub fn pages_of_span(&self, start: usize, end: usize) -> Vec<u32> {
        self.page_spans
            .iter()
            .filter(|s| s.start < end && start < s.end)
            .map(|s| s.page)
            .collect()
    }

    /// Local byte range of the first exact occurrence of `quote`.
    pub fn locate_quote(&self, quote: &str) -> Option<(usize, usize)> {
        if quote.is_empty() {
            return None;
        }
        self.text.find(quote).map(|at| (at, at + quote.len()))
    }

    /// Pages covered by any exact occurrence of `quote` in the chunk text.
    ///
    /// Returns `None` if the quote does not occur.
    pub fn quote_pages(&self, quote: &str) -> Option<Vec<u32>> {
        if quote.is_empty() {
            return None;
        }
        let mut pages: Vec<u32> = Vec::new();
        let mut found = false;
        for (at, _) in self.text.match_indices(quote) {
            found = true;
            for p in self.pages_of_span(at, at + quote.len()) {
                if !pages.contains(&p) {
                    pages.push(p);
                }
            }
        }
        if !found {
            return None;
        }
        pages.sort_unstable();
        Some(pages)
    }
}
