//! Page normalizer.
//!
//! Turns extractor output (an ordered list of `(page index, raw text)`
//! pairs) into a [`Document`] whose pages carry monotonically increasing
//! byte offsets into the document text. Pure and deterministic: the same
//! input always yields the same pages and offsets.
//!
//! Text cleanup is minimal; quoted spans in answers must still match chunk
//! text:
//!
//! - `\r\n` and lone `\r` become `\n`
//! - NUL characters are removed
//! - leading and trailing whitespace is trimmed per page

use chrono::{DateTime, Utc};

use crate::error::{CopilotError, Result};
use crate::models::{Document, FormatTag, Page, RawPage, PAGE_SEPARATOR};

/// Build a [`Document`] from raw pages.
///
/// # Errors
///
/// - [`CopilotError::EmptyDocument`] when `raw` contains no pages.
/// - [`CopilotError::Normalization`] when page indices are not contiguous
///   starting at 1, or when every page is empty after cleanup.
pub fn normalize_pages(
    document_id: &str,
    title: Option<String>,
    format: FormatTag,
    ingested_at: DateTime<Utc>,
    raw: &[RawPage],
) -> Result<Document> {
    if raw.is_empty() {
        return Err(CopilotError::EmptyDocument {
            document_id: document_id.to_string(),
        });
    }

    for (i, page) in raw.iter().enumerate() {
        let expected = i as u32 + 1;
        if page.index != expected {
            return Err(CopilotError::Normalization(format!(
                "document {}: expected page {} but extractor produced page {}",
                document_id, expected, page.index
            )));
        }
    }

    let cleaned: Vec<String> = raw.iter().map(|p| clean_page_text(&p.text)).collect();
    if cleaned.iter().all(|t| t.is_empty()) {
        return Err(CopilotError::Normalization(format!(
            "document {}: all {} pages are empty",
            document_id,
            raw.len()
        )));
    }

    let mut text = String::new();
    let mut pages = Vec::with_capacity(cleaned.len());
    for (raw_page, page_text) in raw.iter().zip(cleaned) {
        if !pages.is_empty() {
            text.push_str(PAGE_SEPARATOR);
        }
        let start = text.len();
        text.push_str(&page_text);
        pages.push(Page {
            index: raw_page.index,
            text: page_text,
            start,
            end: text.len(),
        });
    }

    Ok(Document {
        id: document_id.to_string(),
        title,
        format,
        ingested_at,
        pages,
        text,
    })
}

fn clean_page_text(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\0', "")
        .trim()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw(pages: &[(u32, &str)]) -> Vec<RawPage> {
        pages.iter().map(|(i, t)| RawPage::new(*i, *t)).collect()
    }

    fn normalize(pages: &[(u32, &str)]) -> Result<Document> {
        normalize_pages("doc1", None, FormatTag::Text, Utc::now(), &raw(pages))
    }

    #[test]
    fn test_offsets_monotonic_and_slice_back() {
        let doc = normalize(&[(1, "Alpha page."), (2, "Beta page."), (3, "Gamma.")]).unwrap();
        assert_eq!(doc.pages.len(), 3);
        let mut last_end = 0;
        for page in &doc.pages {
            assert!(page.start >= last_end);
            assert_eq!(&doc.text[page.start..page.end], page.text);
            last_end = page.end;
        }
        assert_eq!(doc.text, "Alpha page.\n\nBeta page.\n\nGamma.");
    }

    #[test]
    fn test_non_contiguous_indices_rejected() {
        let err = normalize(&[(1, "a"), (3, "b")]).unwrap_err();
        assert!(matches!(err, CopilotError::Normalization(_)));
    }

    #[test]
    fn test_must_start_at_one() {
        let err = normalize(&[(0, "a"), (1, "b")]).unwrap_err();
        assert!(matches!(err, CopilotError::Normalization(_)));
    }

    #[test]
    fn test_all_empty_rejected() {
        let err = normalize(&[(1, "  "), (2, "\r\n")]).unwrap_err();
        assert!(matches!(err, CopilotError::Normalization(_)));
    }

    #[test]
    fn test_no_pages_is_empty_document() {
        let err = normalize(&[]).unwrap_err();
        assert!(matches!(err, CopilotError::EmptyDocument { .. }));
    }

    #[test]
    fn test_empty_page_kept_with_offsets() {
        let doc = normalize(&[(1, "first"), (2, ""), (3, "third")]).unwrap();
        assert_eq!(doc.pages[1].start, doc.pages[1].end);
        assert_eq!(doc.pages[2].text, "third");
    }

    #[test]
    fn test_line_endings_and_nul() {
        let doc = normalize(&[(1, "a\r\nb\rc\0d ")]).unwrap();
        assert_eq!(doc.pages[0].text, "a\nb\ncd");
    }

    #[test]
    fn test_deterministic() {
        let a = normalize(&[(1, "x y"), (2, "z")]).unwrap();
        let b = normalize(&[(1, "x y"), (2, "z")]).unwrap();
        assert_eq!(a.pages, b.pages);
        assert_eq!(a.text, b.text);
    }
}
