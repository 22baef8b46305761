//! Citation parsing and validation.
//!
//! Generated answers cite evidence with inline markers that reference the
//! `S<n>` labels of the [`RetrievalResult`] the prompt was built from:
//!
//! ```text
//! [S2, p. 4]
//! [S2, p. 4, "exact quoted span"]
//! [Paper 1 / S3, p. 7]            (comparison mode)
//! ```
//!
//! [`validate_answer`] resolves every marker to a [`Citation`] and checks it
//! against the evidence. Bracketed text that names a source label but does
//! not follow the grammar (page ranges, broken quotes, a missing page) is
//! reported as [`ViolationKind::Malformed`]. Nothing that fails a check is ever released: the
//! dispatcher either regenerates or strips the offending markers with
//! [`Validation::degraded_text`].

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::models::{Citation, RetrievalResult};

/// Appended to answers whose unverifiable citations were removed.
pub const DEGRADED_DISCLAIMER: &str =
    "Note: some citations in this answer could not be verified against the retrieved sources and were removed.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ViolationKind {
    /// The label does not resolve to a retrieved chunk.
    UnknownChunk,
    /// Cited page is outside the chunk's page span.
    PageOutOfRange,
    /// Quoted text is not an exact substring of the chunk.
    QuoteNotFound,
    /// The quote exists but not on the cited page.
    QuotePageMismatch,
    /// The paper tag in the marker disagrees with the evidence's paper.
    PaperMismatch,
    /// A rewrite cited something the source answer did not.
    IntroducedCitation,
    /// The answer contains no citations at all.
    Uncited,
    /// Bracketed source reference that does not follow the marker grammar.
    Malformed,
}

impl ViolationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViolationKind::UnknownChunk => "unknown_chunk",
            ViolationKind::PageOutOfRange => "page_out_of_range",
            ViolationKind::QuoteNotFound => "quote_not_found",
            ViolationKind::QuotePageMismatch => "quote_page_mismatch",
            ViolationKind::PaperMismatch => "paper_mismatch",
            ViolationKind::IntroducedCitation => "introduced_citation",
            ViolationKind::Uncited => "uncited",
            ViolationKind::Malformed => "malformed",
        }
    }
}

/// One failed check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Violation {
    pub kind: ViolationKind,
    /// Marker text as it appeared in the answer. Empty for [`ViolationKind::Uncited`].
    pub marker: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citation: Option<Citation>,
    pub detail: String,
}

/// A citation marker found in answer text.
#[derive(Debug, Clone, PartialEq)]
pub struct CitationMarker {
    /// Byte range of the marker in the answer text.
    pub start: usize,
    pub end: usize,
    pub raw: String,
    /// Evidence label as written, e.g. `S2`.
    pub label: String,
    /// Whether the label names an evidence item.
    pub resolved: bool,
    pub citation: Citation,
}

/// Citation-like text that could not be parsed as a marker.
#[derive(Debug, Clone, PartialEq)]
pub struct MalformedMarker {
    pub start: usize,
    pub end: usize,
    pub raw: String,
}

/// Checks beyond the always-on membership, page, and quote checks.
#[derive(Debug, Clone, Copy, Default)]
pub struct ValidationOptions<'a> {
    /// Compare marker paper tags with evidence paper tags.
    pub check_paper_tags: bool,
    /// Only these citations (by chunk id and page) may appear.
    pub allowed: Option<&'a [Citation]>,
    /// Reject answers that cite nothing.
    pub require_citation: bool,
}

/// Result of validating one generated answer.
#[derive(Debug, Clone)]
pub struct Validation {
    pub markers: Vec<CitationMarker>,
    pub malformed: Vec<MalformedMarker>,
    pub violations: Vec<Violation>,
}

fn marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"\[\s*(?:(?P<tag>[^\[\]/]+?)\s*/\s*)?(?P<label>[Ss]\d+)\s*,\s*(?:p|pp|page)\.?\s*(?P<page>\d+)(?:\s*,\s*["“](?P<quote>[^"”]*)["”])?\s*\]"#,
        )
        .expect("citation marker regex is valid")
    })
}

/// Any bracketed span mentioning a source label.
fn loose_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"\[[^\[\]]*\b[Ss]\d+\b[^\[\]]*\]").expect("loose marker regex is valid")
    })
}

/// Source references in `text` that overlap none of the parsed `markers`.
pub fn find_malformed(text: &str, markers: &[CitationMarker]) -> Vec<MalformedMarker> {
    loose_marker_regex()
        .find_iter(text)
        .filter(|m| {
            !markers
                .iter()
                .any(|k| k.start < m.end() && m.start() < k.end)
        })
        .map(|m| MalformedMarker {
            start: m.start(),
            end: m.end(),
            raw: m.as_str().to_string(),
        })
        .collect()
}

/// Find every citation marker in `text` and resolve labels against `evidence`.
///
/// A label that does not resolve keeps the raw label as its chunk id so the
/// marker is still reported (and rejected) instead of disappearing.
pub fn parse_citations(text: &str, evidence: &RetrievalResult) -> Vec<CitationMarker> {
    marker_regex()
        .captures_iter(text)
        .filter_map(|caps| {
            let whole = caps.get(0)?;
            let label = caps.name("label")?.as_str().to_ascii_uppercase();
            let page: u32 = caps.name("page")?.as_str().parse().ok()?;
            let quote = caps
                .name("quote")
                .map(|m| m.as_str().to_string())
                .filter(|q| !q.is_empty());
            let paper_tag = caps.name("tag").map(|m| normalize_tag(m.as_str()));

            let item = evidence.by_label(&label);
            let citation = Citation {
                chunk_id: item.map_or_else(|| label.clone(), |e| e.chunk.id.clone()),
                document_id: item.map(|e| e.chunk.document_id.clone()).unwrap_or_default(),
                page,
                quote,
                paper_tag,
            };
            Some(CitationMarker {
                start: whole.start(),
                end: whole.end(),
                raw: whole.as_str().to_string(),
                label,
                resolved: item.is_some(),
                citation,
            })
        })
        .collect()
}

fn normalize_tag(tag: &str) -> String {
    tag.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Validate every citation marker in an answer.
pub fn validate_answer(
    text: &str,
    evidence: &RetrievalResult,
    opts: ValidationOptions<'_>,
) -> Validation {
    let markers = parse_citations(text, evidence);
    let malformed = find_malformed(text, &markers);
    let mut violations = Vec::new();

    if opts.require_citation && markers.is_empty() && malformed.is_empty() {
        violations.push(Violation {
            kind: ViolationKind::Uncited,
            marker: String::new(),
            citation: None,
            detail: "answer contains no citations".to_string(),
        });
    }

    for marker in &markers {
        if let Some(v) = check_marker(marker, evidence, &opts) {
            violations.push(v);
        }
    }
    for m in &malformed {
        violations.push(Violation {
            kind: ViolationKind::Malformed,
            marker: m.raw.clone(),
            citation: None,
            detail: "write citations as [S<n>, p. <page>] or [S<n>, p. <page>, \"quote\"]"
                .to_string(),
        });
    }

    Validation {
        markers,
        malformed,
        violations,
    }
}

fn check_marker(
    marker: &CitationMarker,
    evidence: &RetrievalResult,
    opts: &ValidationOptions<'_>,
) -> Option<Violation> {
    let c = &marker.citation;
    let violation = |kind: ViolationKind, detail: String| {
        Some(Violation {
            kind,
            marker: marker.raw.clone(),
            citation: Some(c.clone()),
            detail,
        })
    };

    let item = match evidence.by_chunk_id(&c.chunk_id).filter(|_| marker.resolved) {
        Some(item) => item,
        None => {
            return violation(
                ViolationKind::UnknownChunk,
                format!("{} is not one of the supplied sources", marker.label),
            )
        }
    };
    let chunk = &item.chunk;

    if !chunk.contains_page(c.page) {
        return violation(
            ViolationKind::PageOutOfRange,
            format!(
                "{} covers pages {}-{}, not page {}",
                marker.label, chunk.page_start, chunk.page_end, c.page
            ),
        );
    }

    if let Some(quote) = &c.quote {
        match chunk.quote_pages(quote) {
            None => {
                return violation(
                    ViolationKind::QuoteNotFound,
                    format!("quoted text does not appear in {}", marker.label),
                )
            }
            Some(pages) if !pages.contains(&c.page) => {
                return violation(
                    ViolationKind::QuotePageMismatch,
                    format!("quoted text in {} is on page(s) {:?}, not page {}", marker.label, pages, c.page),
                )
            }
            Some(_) => {}
        }
    }

    if opts.check_paper_tags {
        if let Some(expected) = &item.paper_tag {
            let matches = c
                .paper_tag
                .as_deref()
                .is_some_and(|claimed| claimed.eq_ignore_ascii_case(expected));
            if !matches {
                return violation(
                    ViolationKind::PaperMismatch,
                    format!(
                        "{} belongs to {}, answer attributes it to {}",
                        marker.label,
                        expected,
                        c.paper_tag.as_deref().unwrap_or("no paper")
                    ),
                );
            }
        }
    }

    if let Some(allowed) = opts.allowed {
        let permitted = allowed
            .iter()
            .any(|a| a.chunk_id == c.chunk_id && a.page == c.page);
        if !permitted {
            return violation(
                ViolationKind::IntroducedCitation,
                format!("{} p. {} was not cited by the source answer", marker.label, c.page),
            );
        }
    }

    None
}

impl Validation {
    pub fn is_valid(&self) -> bool {
        self.violations.is_empty()
    }

    fn is_bad(&self, marker: &CitationMarker) -> bool {
        self.violations.iter().any(|v| v.marker == marker.raw)
    }

    /// Citations from markers that passed every check, de-duplicated, in
    /// order of first appearance.
    pub fn valid_citations(&self) -> Vec<Citation> {
        let mut seen = HashSet::new();
        self.markers
            .iter()
            .filter(|m| !self.is_bad(m))
            .map(|m| m.citation.clone())
            .filter(|c| seen.insert(c.clone()))
            .collect()
    }

    /// Answer text with every offending or malformed marker removed.
    pub fn degraded_text(&self, text: &str) -> String {
        let mut spans: Vec<(usize, usize)> = self
            .markers
            .iter()
            .filter(|m| self.is_bad(m))
            .map(|m| (m.start, m.end))
            .chain(self.malformed.iter().map(|m| (m.start, m.end)))
            .collect();
        spans.sort_unstable();

        let mut out = String::with_capacity(text.len());
        let mut cursor = 0;
        for (start, end) in spans {
            let kept = &text[cursor..start];
            out.push_str(kept.strip_suffix(' ').unwrap_or(kept));
            cursor = end;
        }
        out.push_str(&text[cursor..]);
        out.trim().to_string()
    }

    /// Human-readable list of problems for a corrective prompt.
    pub fn describe(&self) -> String {
        self.violations
            .iter()
            .map(|v| {
                if v.marker.is_empty() {
                    format!("- {}", v.detail)
                } else {
                    format!("- {} ({}): {}", v.marker, v.kind.as_str(), v.detail)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}
