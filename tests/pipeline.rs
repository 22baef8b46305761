//! End-to-end pipeline tests over the in-memory index with fake providers.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::*;
use paper_copilot::cancel::CancelToken;
use paper_copilot::copilot::Copilot;
use paper_copilot_core::citation::DEGRADED_DISCLAIMER;
use paper_copilot_core::embedding::Embedder;
use paper_copilot_core::models::{AnswerStatus, QueryMode};
use paper_copilot_core::{CopilotError, Result};

const DATASET_QUESTION: &str = "Which dataset is used to measure accuracy?";
const MODEL_QUESTION: &str = "Does the transformer attention model report accuracy on a dataset?";

async fn ingest_paper(copilot: &paper_copilot::copilot::Copilot) -> String {
    copilot
        .ingest(&paper_bytes(), "txt", Some("Attention Study".into()))
        .await
        .unwrap()
        .document_id
}

async fn ingest_second(copilot: &paper_copilot::copilot::Copilot) -> String {
    copilot
        .ingest(SECOND_PAPER.as_bytes(), "txt", Some("Custom Study".into()))
        .await
        .unwrap()
        .document_id
}

// ============ Ingestion ============

#[tokio::test]
async fn test_ingest_tracks_pages_per_chunk() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let (copilot, index) = copilot_with(test_config(""), Arc::new(KeywordEmbedder::new()), generator);

    let report = copilot
        .ingest(&paper_bytes(), "txt", Some("Attention Study".into()))
        .await
        .unwrap();
    assert_eq!(report.page_count, 3);
    assert_eq!(report.chunk_count, 3);
    assert_eq!(report.indexed_chunks, 3);
    assert!(report.skipped.is_empty());
    assert!(!report.already_indexed);
    assert_eq!(index.len(), 3);

    let doc = copilot.get_document(&report.document_id).await.unwrap();
    assert_eq!(doc.title.as_deref(), Some("Attention Study"));
    assert_eq!(doc.chunk_count, 3);
    assert_eq!(doc.embedding_model, "keyword-v1");
}

#[tokio::test]
async fn test_reingest_same_bytes_is_noop() {
    let embedder = Arc::new(KeywordEmbedder::new());
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let (copilot, index) = copilot_with(test_config(""), embedder.clone(), generator);

    let first = copilot.ingest(&paper_bytes(), "txt", None).await.unwrap();
    let calls = embedder.calls();
    let second = copilot.ingest(&paper_bytes(), "txt", None).await.unwrap();

    assert_eq!(first.document_id, second.document_id);
    assert!(second.already_indexed);
    assert_eq!(embedder.calls(), calls);
    assert_eq!(copilot.list_documents().await.unwrap().len(), 1);
    assert_eq!(index.len(), 3);
}

struct RenamedEmbedder(KeywordEmbedder);

#[async_trait]
impl Embedder for RenamedEmbedder {
    fn model_name(&self) -> &str {
        "keyword-v2"
    }
    fn dims(&self) -> usize {
        self.0.dims()
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.0.embed(texts).await
    }
}

#[tokio::test]
async fn test_model_change_reembeds_and_keeps_ingest_time() {
    let index = Arc::new(paper_copilot_core::index::memory::InMemoryIndex::new());
    let old = paper_copilot::copilot::Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::new(&[])),
    );
    let first = old
        .ingest(&paper_bytes(), "txt", Some("Attention Study".into()))
        .await
        .unwrap();
    let before = old.get_document(&first.document_id).await.unwrap();

    let new = paper_copilot::copilot::Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(RenamedEmbedder(KeywordEmbedder::new())),
        Arc::new(ScriptedGenerator::new(&[])),
    );
    let second = new.ingest(&paper_bytes(), "txt", None).await.unwrap();
    assert!(second.reembedded);
    assert!(!second.already_indexed);

    let after = new.get_document(&first.document_id).await.unwrap();
    assert_eq!(after.embedding_model, "keyword-v2");
    assert_eq!(after.ingested_at, before.ingested_at);
    assert_eq!(after.title.as_deref(), Some("Attention Study"));
    assert_eq!(index.len(), 3);
}

#[tokio::test]
async fn test_failed_batch_is_skipped_and_reported() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::poisoned("gradient")),
        generator,
    );

    let report = copilot.ingest(&paper_bytes(), "txt", None).await.unwrap();
    assert_eq!(report.chunk_count, 3);
    assert_eq!(report.indexed_chunks, 2);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].page_start, 3);
    assert!(report.skipped[0].reason.contains("gradient"));
}

#[tokio::test]
async fn test_skipped_chunks_are_recorded_and_filled_on_reingest() {
    let index = Arc::new(paper_copilot_core::index::memory::InMemoryIndex::new());
    let partial = Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(KeywordEmbedder::poisoned("gradient")),
        Arc::new(ScriptedGenerator::new(&[])),
    );
    let first = partial.ingest(&paper_bytes(), "txt", None).await.unwrap();
    assert_eq!(first.skipped.len(), 1);

    let stored = partial.get_document(&first.document_id).await.unwrap();
    assert_eq!(stored.chunk_count, 2);
    assert_eq!(stored.skipped_chunks, 1);
    assert!(!stored.is_complete());

    let healthy = Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::new(&[])),
    );
    let second = healthy.ingest(&paper_bytes(), "txt", None).await.unwrap();
    assert!(!second.already_indexed);
    assert!(second.reembedded);
    assert_eq!(second.indexed_chunks, 3);
    assert!(second.skipped.is_empty());
    assert_eq!(index.len(), 3);

    let stored = healthy.get_document(&first.document_id).await.unwrap();
    assert_eq!(stored.chunk_count, 3);
    assert!(stored.is_complete());

    let third = healthy.ingest(&paper_bytes(), "txt", None).await.unwrap();
    assert!(third.already_indexed);
}

#[tokio::test]
async fn test_embedding_outage_fails_without_partial_document() {
    let embedder = Arc::new(UnavailableEmbedder {
        calls: AtomicUsize::new(0),
    });
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let (copilot, index) = copilot_with(test_config(""), embedder.clone(), generator);

    let err = copilot.ingest(&paper_bytes(), "txt", None).await.unwrap_err();
    assert!(matches!(err, CopilotError::Embedding { .. }));
    // two batches, three attempts each
    assert_eq!(embedder.calls.load(Ordering::SeqCst), 6);
    assert!(copilot.list_documents().await.unwrap().is_empty());
    assert!(index.is_empty());
}

#[tokio::test]
async fn test_unknown_format_rejected() {
    let generator = Arc::new(ScriptedGenerator::new(&[]));
    let (copilot, _index) = copilot_with(test_config(""), Arc::new(KeywordEmbedder::new()), generator);
    let err = copilot.ingest(b"slides", "pptx", None).await.unwrap_err();
    assert!(matches!(err, CopilotError::UnsupportedFormat(_)));
}

// ============ Standard mode ============

#[tokio::test]
async fn test_standard_answer_cites_quoted_page() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "Evaluation uses ImageNet [{p2}, p. 2, \"imagenet dataset\"].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    let doc_id = ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();

    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(answer.attempts, 1);
    assert!(answer.disclaimer.is_none());
    assert_eq!(answer.citations.len(), 1);

    let citation = &answer.citations[0];
    assert_eq!(citation.document_id, doc_id);
    assert_eq!(citation.page, 2);
    assert_eq!(citation.quote.as_deref(), Some("imagenet dataset"));

    let chunk = copilot.get_chunk(&citation.chunk_id).await.unwrap();
    assert_eq!((chunk.page_start, chunk.page_end), (2, 2));
    assert!(chunk.text.contains("imagenet dataset"));

    // only the relevant page reaches the prompt
    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 1);
    assert!(prompts[0].contains("imagenet dataset"));
    assert!(!prompts[0].contains("transformer model"));
    assert!(prompts[0].contains("Attention Study, page 2"));
}

#[tokio::test]
async fn test_rejected_answer_regenerates_once_then_degrades() {
    let generator = Arc::new(ScriptedGenerator::new(&["Accuracy is high [{p2}, p. 3]."]));
    let (copilot, _index) = copilot_with(
        test_config("[validation]\nmax_retries = 1\n"),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(answer.attempts, 2);
    assert_eq!(answer.status, AnswerStatus::Degraded);
    assert!(answer.citations.is_empty());
    assert!(answer.text.starts_with("Accuracy is high."));
    assert!(!answer.text.contains("p. 3"));
    assert!(answer.text.ends_with(DEGRADED_DISCLAIMER));
    assert_eq!(answer.disclaimer.as_deref(), Some(DEGRADED_DISCLAIMER));

    let prompts = generator.prompts();
    assert!(prompts[1].contains("rejected"));
    assert!(prompts[1].contains("page_out_of_range"));
}

#[tokio::test]
async fn test_unknown_source_regenerates_once_then_degrades() {
    let generator = Arc::new(ScriptedGenerator::new(&["ImageNet is used [S9, p. 2]."]));
    let (copilot, _index) = copilot_with(
        test_config("[validation]\nmax_retries = 1\n"),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(answer.status, AnswerStatus::Degraded);
    assert!(answer.citations.is_empty());
    assert!(answer.text.starts_with("ImageNet is used."));
    assert!(!answer.text.contains("S9"));
    assert!(answer.text.ends_with(DEGRADED_DISCLAIMER));
    assert!(generator.prompts()[1].contains("unknown_chunk"));
}

#[tokio::test]
async fn test_malformed_markers_are_not_released() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "ImageNet [{p2}, p. 2]. Also [S9, pp. 7-8] and [S7, p. 1, \"a \"quoted\" word\"].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config("[validation]\nmax_retries = 1\n"),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 2);
    assert_eq!(answer.status, AnswerStatus::Degraded);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].page, 2);
    assert!(!answer.text.contains("S9"));
    assert!(!answer.text.contains("S7"));
    assert!(!answer.text.contains("quoted"));
    assert!(generator.prompts()[1].contains("malformed"));
}

#[tokio::test]
async fn test_corrected_answer_is_validated() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "ImageNet is used [S7, p. 2].",
        "ImageNet is used [{p2}, p. 2].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(answer.attempts, 2);
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].page, 2);
    assert!(generator.prompts()[1].contains("unknown_chunk"));
}

#[tokio::test]
async fn test_uncited_answer_is_rejected() {
    let generator = Arc::new(ScriptedGenerator::new(&["ImageNet is used."]));
    let (copilot, _index) = copilot_with(
        test_config("[validation]\nmax_retries = 0\n"),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();
    assert_eq!(generator.calls(), 1);
    assert_eq!(answer.status, AnswerStatus::Degraded);
    assert!(answer.citations.is_empty());
}

#[tokio::test]
async fn test_no_relevant_evidence_skips_generation() {
    let generator = Arc::new(ScriptedGenerator::new(&["unused"]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let err = copilot
        .ask("How does protein folding work?", QueryMode::Standard, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::NoRelevantEvidence { .. }));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_invalid_queries_rejected() {
    let generator = Arc::new(ScriptedGenerator::new(&["unused"]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let err = copilot.ask("   ", QueryMode::Standard, None).await.unwrap_err();
    assert!(matches!(err, CopilotError::InvalidQuery(_)));

    let err = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, Some(vec!["missing".into()]))
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::InvalidQuery(_)));

    let err = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, Some(vec![]))
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::InvalidQuery(_)));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_scope_limits_evidence() {
    let generator = Arc::new(ScriptedGenerator::new(&["Custom data [S1, p. 1]."]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;
    let second = ingest_second(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, Some(vec![second.clone()]))
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(answer.citations[0].document_id, second);
    assert!(!generator.prompts()[0].contains("imagenet"));
}

#[tokio::test]
async fn test_deleted_document_is_not_retrieved() {
    let generator = Arc::new(ScriptedGenerator::new(&["unused"]));
    let (copilot, index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator,
    );
    let doc_id = ingest_paper(&copilot).await;

    copilot.delete_document(&doc_id).await.unwrap();
    assert!(index.is_empty());
    let err = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::NoRelevantEvidence { .. }));

    let err = copilot.delete_document(&doc_id).await.unwrap_err();
    assert!(matches!(err, CopilotError::NotFound(_)));
}

// ============ Index availability ============

#[tokio::test]
async fn test_transient_index_failures_are_retried() {
    let index = Arc::new(FlakyIndex::new());
    let generator = Arc::new(ScriptedGenerator::new(&["ImageNet is used [{p2}, p. 2]."]));
    let copilot = Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );

    index.fail_commits(1);
    let doc_id = ingest_paper(&copilot).await;
    assert_eq!(index.commit_calls(), 2);
    assert!(copilot.get_document(&doc_id).await.unwrap().is_complete());

    index.fail_queries(1);
    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(index.query_calls(), 2);
}

#[tokio::test]
async fn test_index_outage_surfaces_after_retries() {
    let index = Arc::new(FlakyIndex::new());
    let generator = Arc::new(ScriptedGenerator::new(&["ImageNet is used [{p2}, p. 2]."]));
    let copilot = Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    index.fail_queries(10);
    let err = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::IndexUnavailable(_)));
    // first attempt plus two retries
    assert_eq!(index.query_calls(), 3);
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_failed_commit_leaves_no_document() {
    let index = Arc::new(FlakyIndex::new());
    let copilot = Copilot::with_components(
        test_config(""),
        index.clone(),
        Arc::new(KeywordEmbedder::new()),
        Arc::new(ScriptedGenerator::new(&[])),
    );

    index.fail_commits(10);
    let err = copilot.ingest(&paper_bytes(), "txt", None).await.unwrap_err();
    assert!(matches!(err, CopilotError::IndexUnavailable(_)));
    assert_eq!(index.commit_calls(), 3);
    assert!(copilot.list_documents().await.unwrap().is_empty());
    assert!(index.inner.is_empty());
}

// ============ Comparison mode ============

#[tokio::test]
async fn test_comparison_tags_papers_in_scope_order() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "Paper 1 uses ImageNet [Paper 1 / S1, p. 2] while Paper 2 uses its own data [Paper 2 / S2, p. 1].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    let first = ingest_paper(&copilot).await;
    let second = ingest_second(&copilot).await;

    let answer = copilot
        .ask(
            DATASET_QUESTION,
            QueryMode::Comparison,
            Some(vec![first.clone(), second.clone()]),
        )
        .await
        .unwrap();

    assert_eq!(answer.mode, QueryMode::Comparison);
    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(answer.citations.len(), 2);
    assert_eq!(answer.citations[0].document_id, first);
    assert_eq!(answer.citations[0].paper_tag.as_deref(), Some("Paper 1"));
    assert_eq!(answer.citations[1].document_id, second);
    assert_eq!(answer.citations[1].paper_tag.as_deref(), Some("Paper 2"));

    let prompt = &generator.prompts()[0];
    assert!(prompt.contains("S1: Paper 1 / Attention Study, page 2"));
    assert!(prompt.contains("S2: Paper 2 / Custom Study, page 1"));
}

#[tokio::test]
async fn test_comparison_rejects_misattributed_paper() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "ImageNet appears in [Paper 2 / S1, p. 2].",
        "ImageNet appears in [Paper 1 / S1, p. 2].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    let first = ingest_paper(&copilot).await;
    let second = ingest_second(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Comparison, Some(vec![first, second]))
        .await
        .unwrap();
    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(answer.attempts, 2);
    assert!(generator.prompts()[1].contains("paper_mismatch"));
}

#[tokio::test]
async fn test_comparison_needs_two_documents() {
    let generator = Arc::new(ScriptedGenerator::new(&["unused"]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    let first = ingest_paper(&copilot).await;

    let err = copilot
        .ask(DATASET_QUESTION, QueryMode::Comparison, None)
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::InvalidQuery(_)));

    let err = copilot
        .ask(
            DATASET_QUESTION,
            QueryMode::Comparison,
            Some(vec![first.clone(), first]),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::InvalidQuery(_)));
    assert_eq!(generator.calls(), 0);
}

// ============ Simplification mode ============

#[tokio::test]
async fn test_simplification_keeps_source_citations() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "The transformer relies on attention [{p1}, p. 1].",
        "It is a model that focuses on the important words [{p1}, p. 1].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(MODEL_QUESTION, QueryMode::Simplification, None)
        .await
        .unwrap();

    assert_eq!(answer.mode, QueryMode::Simplification);
    assert_eq!(answer.status, AnswerStatus::Validated);
    assert_eq!(answer.attempts, 2);
    assert!(answer.text.starts_with("It is a model"));
    assert_eq!(answer.citations.len(), 1);
    assert_eq!(answer.citations[0].page, 1);

    let prompts = generator.prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[1].contains("ANSWER TO REWRITE"));
    assert!(prompts[1].contains("The transformer relies on attention"));
}

#[tokio::test]
async fn test_simplification_cannot_add_citations() {
    let generator = Arc::new(ScriptedGenerator::new(&[
        "The transformer relies on attention [{p1}, p. 1].",
        "Results were measured on pictures [{p2}, p. 2].",
    ]));
    let (copilot, _index) = copilot_with(
        test_config("[validation]\nmax_retries = 1\n"),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(MODEL_QUESTION, QueryMode::Simplification, None)
        .await
        .unwrap();

    assert_eq!(generator.calls(), 3);
    assert_eq!(answer.attempts, 3);
    assert_eq!(answer.status, AnswerStatus::Degraded);
    assert!(answer.citations.is_empty());
    assert!(generator.prompts()[2].contains("introduced_citation"));
}

// ============ Cancellation and deadlines ============

#[tokio::test]
async fn test_cancel_during_generation() {
    let generator =
        Arc::new(ScriptedGenerator::new(&["ImageNet [{p2}, p. 2]."]).slow(Duration::from_secs(30), 1));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let cancel = CancelToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });

    let result = tokio::time::timeout(
        Duration::from_secs(5),
        copilot.ask_with_cancel(DATASET_QUESTION, QueryMode::Standard, None, &cancel),
    )
    .await
    .expect("cancellation should end the query promptly");
    assert!(matches!(result, Err(CopilotError::Cancelled { .. })));
}

#[tokio::test]
async fn test_cancel_before_start_skips_generation() {
    let generator = Arc::new(ScriptedGenerator::new(&["unused"]));
    let (copilot, _index) = copilot_with(
        test_config(""),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let cancel = CancelToken::new();
    cancel.cancel();
    let err = copilot
        .ask_with_cancel(DATASET_QUESTION, QueryMode::Standard, None, &cancel)
        .await
        .unwrap_err();
    assert!(matches!(err, CopilotError::Cancelled { .. }));
    assert_eq!(generator.calls(), 0);
}

#[tokio::test]
async fn test_generation_timeout_is_retried() {
    let generator =
        Arc::new(ScriptedGenerator::new(&["ImageNet [{p2}, p. 2]."]).slow(Duration::from_secs(3), 1));
    let (copilot, _index) = copilot_with(
        test_config("[generation]\ntimeout_secs = 1\n"),
        Arc::new(KeywordEmbedder::new()),
        generator.clone(),
    );
    ingest_paper(&copilot).await;

    let answer = copilot
        .ask(DATASET_QUESTION, QueryMode::Standard, None)
        .await
        .unwrap();
    assert_eq!(generator.calls(), 2);
    assert_eq!(answer.attempts, 1);
    assert_eq!(answer.status, AnswerStatus::Validated);
}
