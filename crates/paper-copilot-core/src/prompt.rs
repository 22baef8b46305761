//! Prompt construction for each query mode.
//!
//! Every prompt lists the available sources by label, embeds the evidence
//! text in labelled context blocks, and spells out the citation marker
//! format that [`crate::citation`] parses.

use std::fmt::Write;

use crate::citation::Validation;
use crate::models::{DocumentSummary, QueryMode, RetrievalResult};

const CITATION_RULES: &str = "\
Cite every claim with a marker of the form [S<n>, p. <page>] where S<n> is a source label \
and <page> is a page that source covers. To quote, use [S<n>, p. <page>, \"exact words\"] \
and copy the words exactly from the source. Cite only the sources listed above. \
If the sources do not answer the question, say so.";

const PAPER_RULES: &str = "\
Prefix each marker with the paper it belongs to, as in [Paper 1 / S<n>, p. <page>].";

pub fn mode_instruction(mode: QueryMode) -> &'static str {
    match mode {
        QueryMode::Standard => "Answer the question using the context and cite sources.",
        QueryMode::Comparison => "Compare information across the sources and cite each claim.",
        QueryMode::Simplification => "Explain in simple terms and cite sources.",
    }
}

fn source_title(documents: &[DocumentSummary], document_id: &str) -> String {
    documents
        .iter()
        .find(|d| d.id == document_id)
        .map(|d| d.display_name())
        .unwrap_or_else(|| document_id.chars().take(12).collect())
}

fn write_sources(out: &mut String, evidence: &RetrievalResult, documents: &[DocumentSummary]) {
    out.push_str("AVAILABLE SOURCES:\n");
    for item in &evidence.items {
        let c = &item.chunk;
        let _ = write!(out, "{}: ", item.label);
        if let Some(tag) = &item.paper_tag {
            let _ = write!(out, "{} / ", tag);
        }
        let title = source_title(documents, &c.document_id);
        if c.page_start == c.page_end {
            let _ = writeln!(out, "{}, page {}", title, c.page_start);
        } else {
            let _ = writeln!(out, "{}, pages {}-{}", title, c.page_start, c.page_end);
        }
    }
}

fn write_context(out: &mut String, evidence: &RetrievalResult) {
    out.push_str("\nCONTEXT:\n");
    for item in &evidence.items {
        let c = &item.chunk;
        let _ = writeln!(
            out,
            "--- {} (pages {}-{}) ---\n{}\n",
            item.label, c.page_start, c.page_end, c.text
        );
    }
}

/// Prompt for the first generation of a query.
pub fn build_prompt(
    question: &str,
    mode: QueryMode,
    evidence: &RetrievalResult,
    documents: &[DocumentSummary],
) -> String {
    let mut out = String::new();
    out.push_str(mode_instruction(mode));
    out.push_str("\n\n");
    write_sources(&mut out, evidence, documents);
    write_context(&mut out, evidence);
    out.push_str(CITATION_RULES);
    if mode == QueryMode::Comparison {
        out.push(' ');
        out.push_str(PAPER_RULES);
    }
    let _ = write!(out, "\n\nQUESTION: {}\n\nANSWER:", question.trim());
    out
}

/// Re-prompt after a rejected attempt.
pub fn corrective_prompt(base: &str, rejected: &Validation) -> String {
    format!(
        "{}\n\nYour previous answer was rejected because these citations could not be verified:\n{}\n\
         Answer again. Cite only the supplied evidence, only pages each source covers, \
         and quote only text that appears verbatim in the cited source.\n\nANSWER:",
        base.trim_end().trim_end_matches("ANSWER:").trim_end(),
        rejected.describe()
    )
}

/// Prompt for rewriting a validated answer at a lower reading level.
pub fn simplify_prompt(
    answer_text: &str,
    evidence: &RetrievalResult,
    documents: &[DocumentSummary],
) -> String {
    let mut out = String::new();
    out.push_str(mode_instruction(QueryMode::Simplification));
    out.push_str("\n\n");
    write_sources(&mut out, evidence, documents);
    let _ = write!(
        out,
        "\nRewrite the answer below for a reader without a technical background. \
         Use short sentences and everyday words. Keep every citation marker exactly as written \
         and do not add any new citations.\n\nANSWER TO REWRITE:\n{}\n\nSIMPLIFIED ANSWER:",
        answer_text.trim()
    );
    out
}
