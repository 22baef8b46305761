//! Hybrid retriever.
//!
//! Runs entirely through the [`VectorIndex`] trait. The caller embeds the
//! query and supplies [`RetrievalParams`]; the retriever owns the policy of
//! what to do with raw index hits.
//!
//! # Scoring
//!
//! 1. Fetch `candidate_k` nearest chunks from the index.
//! 2. Drop hits with similarity below `similarity_cutoff`.
//! 3. Secondary score: fraction of distinct query terms (lowercased,
//!    alphanumeric, at least 3 characters) that occur in the chunk.
//! 4. Fuse with the configured [`FusionStrategy`].
//! 5. Sort by combined score (desc), `page_start` (asc), `position` (asc),
//!    chunk id (asc), then keep `top_k`.
//! 6. Label survivors `S1..Sn` in final order.
//!
//! An empty result after filtering is [`CopilotError::NoRelevantEvidence`],
//! never a silently empty list.

use std::cmp::Ordering;
use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CopilotError, Result};
use crate::index::VectorIndex;
use crate::models::{EvidenceItem, RetrievalResult};

/// How vector similarity and lexical overlap combine into one score.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "lowercase")]
pub enum FusionStrategy {
    /// `vector_weight × similarity + lexical_weight × overlap`
    Weighted {
        #[serde(default = "default_vector_weight")]
        vector_weight: f64,
        #[serde(default = "default_lexical_weight")]
        lexical_weight: f64,
    },
    /// `similarity × (1 + lexical_boost × overlap)`
    Multiplicative {
        #[serde(default = "default_lexical_boost")]
        lexical_boost: f64,
    },
}

fn default_vector_weight() -> f64 {
    0.8
}
fn default_lexical_weight() -> f64 {
    0.2
}
fn default_lexical_boost() -> f64 {
    0.5
}

impl Default for FusionStrategy {
    fn default() -> Self {
        FusionStrategy::Weighted {
            vector_weight: default_vector_weight(),
            lexical_weight: default_lexical_weight(),
        }
    }
}

impl FusionStrategy {
    pub fn combine(&self, similarity: f64, lexical: f64) -> f64 {
        match *self {
            FusionStrategy::Weighted {
                vector_weight,
                lexical_weight,
            } => vector_weight * similarity + lexical_weight * lexical,
            FusionStrategy::Multiplicative { lexical_boost } => {
                similarity * (1.0 + lexical_boost * lexical)
            }
        }
    }
}

/// Retrieval tuning parameters, decoupled from application config.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalParams {
    /// Nearest neighbours fetched from the index before filtering.
    pub candidate_k: usize,
    /// Evidence items kept after fusion.
    pub top_k: usize,
    /// Hits below this cosine similarity are discarded.
    pub similarity_cutoff: f64,
    pub fusion: FusionStrategy,
}

impl Default for RetrievalParams {
    fn default() -> Self {
        Self {
            candidate_k: 20,
            top_k: 5,
            similarity_cutoff: 0.5,
            fusion: FusionStrategy::default(),
        }
    }
}

/// Bundles all inputs for one retrieval.
#[derive(Debug, Clone)]
pub struct RetrievalRequest<'a> {
    pub query_id: &'a str,
    pub query: &'a str,
    /// Pre-computed query embedding.
    pub query_vec: &'a [f32],
    /// Restrict to these document ids.
    pub scope: Option<&'a [String]>,
    pub params: &'a RetrievalParams,
}

/// Retrieve ranked, labelled evidence for a query.
pub async fn retrieve<I>(index: &I, req: &RetrievalRequest<'_>) -> Result<RetrievalResult>
where
    I: VectorIndex + ?Sized,
{
    let params = req.params;
    let hits = index
        .query(req.query_vec, params.candidate_k.max(params.top_k), req.scope)
        .await?;
    let candidates = hits.len();

    let terms = query_terms(req.query);
    let mut items = Vec::new();
    for hit in hits
        .into_iter()
        .filter(|h| h.similarity >= params.similarity_cutoff)
    {
        let chunk = index.get_chunk(&hit.chunk_id).await?.ok_or_else(|| {
            CopilotError::IndexUnavailable(format!(
                "vector for chunk {} has no metadata record",
                hit.chunk_id
            ))
        })?;
        let secondary = lexical_overlap(&terms, &chunk.text);
        items.push(EvidenceItem {
            label: String::new(),
            combined: params.fusion.combine(hit.similarity, secondary),
            similarity: hit.similarity,
            secondary,
            chunk,
            paper_tag: None,
        });
    }

    sort_evidence(&mut items);
    items.truncate(params.top_k);

    debug!(
        query_id = req.query_id,
        candidates,
        kept = items.len(),
        cutoff = params.similarity_cutoff,
        "retrieval finished"
    );

    if items.is_empty() {
        return Err(CopilotError::NoRelevantEvidence {
            query_id: req.query_id.to_string(),
        });
    }

    let mut result = RetrievalResult {
        query_id: req.query_id.to_string(),
        items,
    };
    result.relabel();
    Ok(result)
}

/// Deterministic evidence order.
pub fn sort_evidence(items: &mut [EvidenceItem]) {
    items.sort_by(|a, b| {
        b.combined
            .partial_cmp(&a.combined)
            .unwrap_or(Ordering::Equal)
            .then(a.chunk.page_start.cmp(&b.chunk.page_start))
            .then(a.chunk.position.cmp(&b.chunk.position))
            .then_with(|| a.chunk.id.cmp(&b.chunk.id))
    });
}

/// Distinct lowercase alphanumeric terms of at least 3 characters.
pub fn query_terms(text: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    terms_of(text)
        .filter(|t| seen.insert(t.clone()))
        .collect()
}

fn terms_of(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(|t| t.to_lowercase())
}

/// Fraction of `terms` present as whole terms in `text`, in `[0.0, 1.0]`.
pub fn lexical_overlap(terms: &[String], text: &str) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let present: HashSet<String> = terms_of(text).collect();
    let hits = terms.iter().filter(|t| present.contains(*t)).count();
    hits as f64 / terms.len() as f64
}
