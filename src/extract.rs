//! Per-page text extraction for each supported [`FormatTag`].
//!
//! Extractors only split raw bytes into `(page index, text)` pairs; all
//! cleanup and offset bookkeeping happens in the page normalizer.
//!
//! | Format | Page boundaries |
//! |--------|-----------------|
//! | PDF | PDF page objects (via `lopdf`) |
//! | DOCX | explicit `<w:br w:type="page"/>` breaks and Word's rendered page breaks |
//! | Text / Markdown | form feeds, else `-------- Page N --------` marker lines, else one page |

use std::io::Read;

use paper_copilot_core::models::{FormatTag, RawPage};
use paper_copilot_core::{CopilotError, Result};
use quick_xml::events::Event;
use tracing::warn;

/// Maximum decompressed bytes to read from a single ZIP entry (zip-bomb protection).
const MAX_XML_ENTRY_BYTES: u64 = 50 * 1024 * 1024;

pub trait Extractor: Send + Sync {
    fn format(&self) -> FormatTag;

    /// Split `bytes` into pages numbered from 1.
    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawPage>>;
}

pub struct PdfExtractor;
pub struct DocxExtractor;
pub struct PlainTextExtractor {
    format: FormatTag,
}

static PDF: PdfExtractor = PdfExtractor;
static DOCX: DocxExtractor = DocxExtractor;
static TEXT: PlainTextExtractor = PlainTextExtractor {
    format: FormatTag::Text,
};
static MARKDOWN: PlainTextExtractor = PlainTextExtractor {
    format: FormatTag::Markdown,
};

pub fn extractor_for(format: FormatTag) -> &'static dyn Extractor {
    match format {
        FormatTag::Pdf => &PDF,
        FormatTag::Docx => &DOCX,
        FormatTag::Text => &TEXT,
        FormatTag::Markdown => &MARKDOWN,
    }
}

pub fn extract_pages(bytes: &[u8], format: FormatTag) -> Result<Vec<RawPage>> {
    extractor_for(format).extract(bytes)
}

// ============ PDF ============

impl Extractor for PdfExtractor {
    fn format(&self) -> FormatTag {
        FormatTag::Pdf
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawPage>> {
        let doc = lopdf::Document::load_mem(bytes)
            .map_err(|e| CopilotError::Extraction(format!("PDF parse failed: {}", e)))?;
        if doc.is_encrypted() {
            return Err(CopilotError::Extraction("PDF is encrypted".to_string()));
        }

        let page_numbers: Vec<u32> = doc.get_pages().keys().copied().collect();
        if page_numbers.is_empty() {
            return Err(CopilotError::Extraction("PDF has no pages".to_string()));
        }

        // Undecodable pages (scans, unusual encodings) become empty pages.
        Ok(page_numbers
            .iter()
            .enumerate()
            .map(|(i, &number)| {
                let text = doc.extract_text(&[number]).unwrap_or_else(|e| {
                    warn!(page = number, error = %e, "no text extracted from PDF page");
                    String::new()
                });
                RawPage::new(i as u32 + 1, text)
            })
            .collect())
    }
}

// ============ DOCX ============

fn read_zip_entry_bounded(
    archive: &mut zip::ZipArchive<std::io::Cursor<&[u8]>>,
    name: &str,
    max_bytes: u64,
) -> Result<Vec<u8>> {
    let entry = archive
        .by_name(name)
        .map_err(|e| CopilotError::Extraction(format!("{}: {}", name, e)))?;
    let mut out = Vec::new();
    entry
        .take(max_bytes)
        .read_to_end(&mut out)
        .map_err(|e| CopilotError::Extraction(e.to_string()))?;
    if out.len() as u64 >= max_bytes {
        return Err(CopilotError::Extraction(format!(
            "ZIP entry {} exceeds size limit ({} bytes)",
            name, max_bytes
        )));
    }
    Ok(out)
}

impl Extractor for DocxExtractor {
    fn format(&self) -> FormatTag {
        FormatTag::Docx
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawPage>> {
        let mut archive = zip::ZipArchive::new(std::io::Cursor::new(bytes))
            .map_err(|e| CopilotError::Extraction(format!("DOCX is not a ZIP archive: {}", e)))?;
        let xml = read_zip_entry_bounded(&mut archive, "word/document.xml", MAX_XML_ENTRY_BYTES)?;
        let pages = split_docx_pages(&xml)?;
        Ok(pages
            .into_iter()
            .enumerate()
            .map(|(i, text)| RawPage::new(i as u32 + 1, text))
            .collect())
    }
}

fn is_explicit_page_break(e: &quick_xml::events::BytesStart<'_>) -> bool {
    e.local_name().as_ref() == b"br"
        && e.attributes().flatten().any(|a| {
            a.key.local_name().as_ref() == b"type" && a.value.as_ref() == b"page"
        })
}

/// Walk `word/document.xml`, collecting `w:t` text into pages.
///
/// A rendered page break right after an explicit one (no text between)
/// marks the same boundary and is ignored.
fn split_docx_pages(xml: &[u8]) -> Result<Vec<String>> {
    let mut pages = vec![String::new()];
    let mut text_since_break = false;
    let mut in_text = false;
    let mut reader = quick_xml::Reader::from_reader(xml);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if e.local_name().as_ref() == b"t" => in_text = true,
            Ok(Event::End(e)) => match e.local_name().as_ref() {
                b"t" => in_text = false,
                b"p" => {
                    if let Some(page) = pages.last_mut() {
                        page.push('\n');
                    }
                }
                _ => {}
            },
            Ok(Event::Text(te)) if in_text => {
                let text = te
                    .unescape()
                    .map_err(|e| CopilotError::Extraction(e.to_string()))?;
                if !text.is_empty() {
                    text_since_break = true;
                }
                if let Some(page) = pages.last_mut() {
                    page.push_str(&text);
                }
            }
            Ok(Event::Empty(e)) => {
                let name = e.local_name();
                if is_explicit_page_break(&e) {
                    pages.push(String::new());
                    text_since_break = false;
                } else if name.as_ref() == b"lastRenderedPageBreak" && text_since_break {
                    pages.push(String::new());
                    text_since_break = false;
                } else if name.as_ref() == b"tab" {
                    if let Some(page) = pages.last_mut() {
                        page.push('\t');
                    }
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CopilotError::Extraction(format!("DOCX XML: {}", e))),
            _ => {}
        }
        buf.clear();
    }

    Ok(pages)
}

// ============ Text / Markdown ============

impl Extractor for PlainTextExtractor {
    fn format(&self) -> FormatTag {
        self.format
    }

    fn extract(&self, bytes: &[u8]) -> Result<Vec<RawPage>> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| CopilotError::Extraction(format!("text is not valid UTF-8: {}", e)))?;
        Ok(split_text_pages(text)
            .into_iter()
            .enumerate()
            .map(|(i, page)| RawPage::new(i as u32 + 1, page))
            .collect())
    }
}

/// `-------- Page 3 --------`, with any run of at least three dashes.
fn is_page_marker(line: &str) -> bool {
    let line = line.trim();
    if !line.starts_with("---") || !line.ends_with("---") {
        return false;
    }
    let inner = line.trim_matches('-').trim();
    match inner.strip_prefix("Page") {
        Some(rest) => {
            let rest = rest.trim();
            !rest.is_empty() && rest.chars().all(|c| c.is_ascii_digit())
        }
        None => false,
    }
}

fn split_text_pages(text: &str) -> Vec<String> {
    if text.contains('\x0c') {
        return text.split('\x0c').map(str::to_string).collect();
    }

    if text.lines().any(is_page_marker) {
        let mut pages: Vec<String> = Vec::new();
        let mut current = String::new();
        let mut seen_marker = false;
        for line in text.lines() {
            if is_page_marker(line) {
                if seen_marker || !current.trim().is_empty() {
                    pages.push(std::mem::take(&mut current));
                }
                current.clear();
                seen_marker = true;
            } else {
                current.push_str(line);
                current.push('\n');
            }
        }
        pages.push(current);
        return pages;
    }

    vec![text.to_string()]
}
