//! Query mode dispatcher.
//!
//! Routes a question through retrieval, generation, and citation
//! validation according to its [`QueryMode`]:
//!
//! - **Standard**: one retrieval over the scope, one generation, validation loop.
//! - **Comparison**: one retrieval per document, tagged `Paper 1..n` in scope
//!   order and merged round-robin by rank; markers must carry the right paper tag.
//! - **Simplification**: a standard answer, then a plain-language rewrite whose
//!   citations must be a subset of the standard answer's.
//!
//! # Validation loop
//!
//! A rejected attempt is regenerated with a corrective prompt listing the
//! violations, up to `validation.max_retries` times. After that the answer
//! is released as [`AnswerStatus::Degraded`]: offending markers stripped, only
//! valid citations kept, and a disclaimer appended. Unverified citations are
//! never released.
//!
//! Every generation call runs under `generation.timeout_secs`; timeouts,
//! transient provider errors, and an unavailable index are retried with
//! backoff. The [`CancelToken`]
//! is checked between stages, before every fragment, and before release.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use paper_copilot_core::citation::{validate_answer, Validation, ValidationOptions, DEGRADED_DISCLAIMER};
use paper_copilot_core::embedding::{embed_one, Embedder};
use paper_copilot_core::generation::Generator;
use paper_copilot_core::index::VectorIndex;
use paper_copilot_core::models::{
    Answer, AnswerStatus, DocumentSummary, EvidenceItem, Query, QueryMode, RetrievalResult,
};
use paper_copilot_core::prompt::{build_prompt, corrective_prompt, simplify_prompt};
use paper_copilot_core::retrieve::{retrieve, RetrievalParams, RetrievalRequest};
use paper_copilot_core::{CopilotError, Result};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::cancel::CancelToken;
use crate::config::{Config, ValidationConfig};
use crate::retry::{with_backoff, RetryPolicy};

pub struct Dispatcher {
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
    retrieval: RetrievalParams,
    validation: ValidationConfig,
    retry: RetryPolicy,
    generation_timeout: Duration,
}

/// Turn a failed validation into the corresponding error.
fn ensure_valid(query_id: &str, validation: &Validation) -> Result<()> {
    if validation.is_valid() {
        return Ok(());
    }
    Err(CopilotError::CitationValidation {
        query_id: query_id.to_string(),
        violations: validation.violations.clone(),
    })
}

/// Interleave per-document evidence by rank: every paper's best item, then
/// every paper's second best, and so on.
fn merge_round_robin(per_document: Vec<Vec<EvidenceItem>>) -> Vec<EvidenceItem> {
    let total = per_document.iter().map(Vec::len).sum();
    let mut merged = Vec::with_capacity(total);
    let mut iters: Vec<_> = per_document.into_iter().map(Vec::into_iter).collect();
    while merged.len() < total {
        for it in iters.iter_mut() {
            if let Some(item) = it.next() {
                merged.push(item);
            }
        }
    }
    merged
}

impl Dispatcher {
    pub fn new(
        config: &Config,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn Embedder>,
        generator: Arc<dyn Generator>,
    ) -> Self {
        Self {
            index,
            embedder,
            generator,
            retrieval: config.retrieval.params(),
            validation: config.validation.clone(),
            retry: RetryPolicy::from_config(&config.retry),
            generation_timeout: Duration::from_secs(config.generation.timeout_secs),
        }
    }

    /// Answer a question.
    ///
    /// # Errors
    ///
    /// - [`CopilotError::InvalidQuery`] for empty text, an empty or unknown
    ///   scope, or a comparison over fewer than two documents.
    /// - [`CopilotError::NoRelevantEvidence`] when nothing passes the cutoff.
    /// - [`CopilotError::Cancelled`] when `cancel` fires before release.
    /// - Embedding, generation, timeout, and index errors after retries.
    #[instrument(skip(self, question, scope, cancel), fields(query_id = tracing::field::Empty, mode = %mode))]
    pub async fn ask(
        &self,
        question: &str,
        mode: QueryMode,
        scope: Option<Vec<String>>,
        cancel: &CancelToken,
    ) -> Result<Answer> {
        let query = Query {
            id: Uuid::new_v4().to_string(),
            text: question.trim().to_string(),
            mode,
            scope,
        };
        tracing::Span::current().record("query_id", query.id.as_str());

        if query.text.is_empty() {
            return Err(CopilotError::InvalidQuery("question is empty".to_string()));
        }
        self.check_scope(&query).await?;
        cancel.check(&query.id)?;

        let index = self.index.as_ref();
        let documents =
            with_backoff(&self.retry, "list_documents", || index.list_documents()).await?;
        let embedder = self.embedder.as_ref();
        let text = query.text.as_str();
        let query_vec =
            with_backoff(&self.retry, "embed_query", || embed_one(embedder, text)).await?;
        cancel.check(&query.id)?;

        let answer = match mode {
            QueryMode::Standard => self.standard(&query, &query_vec, &documents, cancel).await?,
            QueryMode::Comparison => {
                self.comparison(&query, &query_vec, &documents, cancel).await?
            }
            QueryMode::Simplification => {
                self.simplification(&query, &query_vec, &documents, cancel)
                    .await?
            }
        };

        info!(
            query_id = %answer.query_id,
            status = ?answer.status,
            attempts = answer.attempts,
            citations = answer.citations.len(),
            "answer released"
        );
        Ok(answer)
    }

    async fn check_scope(&self, query: &Query) -> Result<()> {
        let Some(scope) = &query.scope else {
            return Ok(());
        };
        if scope.is_empty() {
            return Err(CopilotError::InvalidQuery("scope is empty".to_string()));
        }
        let index = self.index.as_ref();
        for id in scope {
            let found =
                with_backoff(&self.retry, "get_document", || index.get_document(id)).await?;
            if found.is_none() {
                return Err(CopilotError::InvalidQuery(format!(
                    "scope names unknown document {}",
                    id
                )));
            }
        }
        Ok(())
    }

    async fn retrieve_scoped(
        &self,
        query: &Query,
        query_vec: &[f32],
        scope: Option<&[String]>,
    ) -> Result<RetrievalResult> {
        let request = RetrievalRequest {
            query_id: &query.id,
            query: &query.text,
            query_vec,
            scope,
            params: &self.retrieval,
        };
        let index = self.index.as_ref();
        with_backoff(&self.retry, "retrieve", || retrieve(index, &request)).await
    }

    async fn standard(
        &self,
        query: &Query,
        query_vec: &[f32],
        documents: &[DocumentSummary],
        cancel: &CancelToken,
    ) -> Result<Answer> {
        let evidence = self
            .retrieve_scoped(query, query_vec, query.scope.as_deref())
            .await?;
        let prompt = build_prompt(&query.text, QueryMode::Standard, &evidence, documents);
        let opts = ValidationOptions {
            require_citation: self.validation.require_citation,
            ..Default::default()
        };
        self.generate_validated(&query.id, QueryMode::Standard, &prompt, &evidence, opts, cancel)
            .await
    }

    async fn comparison(
        &self,
        query: &Query,
        query_vec: &[f32],
        documents: &[DocumentSummary],
        cancel: &CancelToken,
    ) -> Result<Answer> {
        let mut doc_ids: Vec<String> = match &query.scope {
            Some(ids) => ids.clone(),
            None => documents.iter().map(|d| d.id.clone()).collect(),
        };
        let mut seen = std::collections::HashSet::new();
        doc_ids.retain(|id| seen.insert(id.clone()));
        if doc_ids.len() < 2 {
            return Err(CopilotError::InvalidQuery(format!(
                "comparison needs at least two documents, found {}",
                doc_ids.len()
            )));
        }

        let mut per_document = Vec::with_capacity(doc_ids.len());
        for (i, doc_id) in doc_ids.iter().enumerate() {
            cancel.check(&query.id)?;
            let tag = format!("Paper {}", i + 1);
            match self
                .retrieve_scoped(query, query_vec, Some(std::slice::from_ref(doc_id)))
                .await
            {
                Ok(result) => {
                    let items: Vec<EvidenceItem> = result
                        .items
                        .into_iter()
                        .map(|mut item| {
                            item.paper_tag = Some(tag.clone());
                            item
                        })
                        .collect();
                    debug!(document_id = %doc_id, paper = %tag, items = items.len(), "retrieved paper evidence");
                    per_document.push(items);
                }
                Err(CopilotError::NoRelevantEvidence { .. }) => {
                    info!(document_id = %doc_id, paper = %tag, "no relevant evidence in paper, skipping");
                }
                Err(e) => return Err(e),
            }
        }

        let mut evidence = RetrievalResult {
            query_id: query.id.clone(),
            items: merge_round_robin(per_document),
        };
        if evidence.is_empty() {
            return Err(CopilotError::NoRelevantEvidence {
                query_id: query.id.clone(),
            });
        }
        evidence.relabel();

        let prompt = build_prompt(&query.text, QueryMode::Comparison, &evidence, documents);
        let opts = ValidationOptions {
            check_paper_tags: true,
            require_citation: self.validation.require_citation,
            ..Default::default()
        };
        self.generate_validated(&query.id, QueryMode::Comparison, &prompt, &evidence, opts, cancel)
            .await
    }

    async fn simplification(
        &self,
        query: &Query,
        query_vec: &[f32],
        documents: &[DocumentSummary],
        cancel: &CancelToken,
    ) -> Result<Answer> {
        let evidence = self
            .retrieve_scoped(query, query_vec, query.scope.as_deref())
            .await?;
        let opts = ValidationOptions {
            require_citation: self.validation.require_citation,
            ..Default::default()
        };

        let prompt = build_prompt(&query.text, QueryMode::Standard, &evidence, documents);
        let base = self
            .generate_validated(&query.id, QueryMode::Standard, &prompt, &evidence, opts, cancel)
            .await?;

        let base_text = base
            .text
            .trim_end()
            .trim_end_matches(DEGRADED_DISCLAIMER)
            .trim_end();
        let rewrite = simplify_prompt(base_text, &evidence, documents);
        let allowed = base.citations.clone();
        let rewrite_opts = ValidationOptions {
            allowed: Some(&allowed),
            ..opts
        };
        let mut answer = self
            .generate_validated(
                &query.id,
                QueryMode::Simplification,
                &rewrite,
                &evidence,
                rewrite_opts,
                cancel,
            )
            .await?;

        answer.attempts += base.attempts;
        if base.status == AnswerStatus::Degraded && answer.status == AnswerStatus::Validated {
            answer.text = format!("{}\n\n{}", answer.text, DEGRADED_DISCLAIMER);
            answer.status = AnswerStatus::Degraded;
            answer.disclaimer = Some(DEGRADED_DISCLAIMER.to_string());
        }
        Ok(answer)
    }

    /// Generate, validate, and regenerate until the answer passes or the
    /// retry budget is spent.
    async fn generate_validated(
        &self,
        query_id: &str,
        mode: QueryMode,
        base_prompt: &str,
        evidence: &RetrievalResult,
        opts: ValidationOptions<'_>,
        cancel: &CancelToken,
    ) -> Result<Answer> {
        let mut prompt = base_prompt.to_string();
        let mut attempts = 0u32;

        loop {
            cancel.check(query_id)?;
            attempts += 1;
            let text = self.generate_text(query_id, &prompt, cancel).await?;
            let validation = validate_answer(&text, evidence, opts);

            match ensure_valid(query_id, &validation) {
                Ok(()) => {
                    cancel.check(query_id)?;
                    return Ok(Answer {
                        query_id: query_id.to_string(),
                        mode,
                        citations: validation.valid_citations(),
                        text: text.trim().to_string(),
                        status: AnswerStatus::Validated,
                        attempts,
                        disclaimer: None,
                    });
                }
                Err(CopilotError::CitationValidation { violations, .. }) => {
                    warn!(
                        query_id,
                        attempt = attempts,
                        violations = violations.len(),
                        "answer rejected by citation validation"
                    );
                    if attempts > self.validation.max_retries {
                        cancel.check(query_id)?;
                        return Ok(Answer {
                            query_id: query_id.to_string(),
                            mode,
                            citations: validation.valid_citations(),
                            text: format!(
                                "{}\n\n{}",
                                validation.degraded_text(&text),
                                DEGRADED_DISCLAIMER
                            ),
                            status: AnswerStatus::Degraded,
                            attempts,
                            disclaimer: Some(DEGRADED_DISCLAIMER.to_string()),
                        });
                    }
                    prompt = corrective_prompt(base_prompt, &validation);
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// One generation with deadline and backoff, fragments concatenated.
    async fn generate_text(
        &self,
        query_id: &str,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let timeout = self.generation_timeout;
        with_backoff(&self.retry, "generation", || async move {
            match tokio::time::timeout(timeout, self.collect_fragments(query_id, prompt, cancel))
                .await
            {
                Ok(result) => result,
                Err(_) => Err(CopilotError::Timeout {
                    operation: "generation".to_string(),
                    secs: timeout.as_secs(),
                }),
            }
        })
        .await
    }

    async fn collect_fragments(
        &self,
        query_id: &str,
        prompt: &str,
        cancel: &CancelToken,
    ) -> Result<String> {
        let cancelled = || CopilotError::Cancelled {
            query_id: query_id.to_string(),
        };

        let mut stream = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(cancelled()),
            stream = self.generator.generate(prompt) => stream?,
        };

        let mut text = String::new();
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(cancelled()),
                next = stream.next() => match next {
                    Some(fragment) => text.push_str(&fragment?),
                    None => return Ok(text),
                },
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paper_copilot_core::models::Chunk;

    fn item(doc: &str, id: &str) -> EvidenceItem {
        EvidenceItem {
            label: String::new(),
            chunk: Chunk {
                id: id.to_string(),
                document_id: doc.to_string(),
                position: 0,
                text: String::new(),
                token_count: 0,
                page_start: 1,
                page_end: 1,
                start_offset: 0,
                end_offset: 0,
                start_in_page: 0,
                end_in_page: 0,
                page_spans: vec![],
                overlap_prev: None,
                overlap_next: None,
                hash: String::new(),
            },
            similarity: 0.9,
            secondary: 0.0,
            combined: 0.9,
            paper_tag: None,
        }
    }

    #[test]
    fn test_round_robin_interleaves_by_rank() {
        let merged = merge_round_robin(vec![
            vec![item("a", "a1"), item("a", "a2"), item("a", "a3")],
            vec![item("b", "b1")],
            vec![item("c", "c1"), item("c", "c2")],
        ]);
        let ids: Vec<&str> = merged.iter().map(|e| e.chunk.id.as_str()).collect();
        assert_eq!(ids, vec!["a1", "b1", "c1", "a2", "c2", "a3"]);
    }

    #[test]
    fn test_ensure_valid_maps_violations() {
        let evidence = RetrievalResult {
            query_id: "q".into(),
            items: vec![],
        };
        let v = validate_answer("claim [S3, p. 1]", &evidence, ValidationOptions::default());
        match ensure_valid("q", &v) {
            Err(CopilotError::CitationValidation { query_id, violations }) => {
                assert_eq!(query_id, "q");
                assert_eq!(violations.len(), 1);
            }
            other => panic!("expected CitationValidation, got {:?}", other),
        }
    }
}
