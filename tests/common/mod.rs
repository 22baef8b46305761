//! Shared fakes for integration tests.
//!
//! `KeywordEmbedder` maps text to term-count vectors over a fixed
//! vocabulary, so similarity is predictable from the words a page contains.
//! `ScriptedGenerator` replays canned answers and records every prompt.
//! `FlakyIndex` wraps the in-memory index and fails a set number of calls.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use paper_copilot::config::{parse_config, Config};
use paper_copilot::copilot::Copilot;
use paper_copilot_core::embedding::Embedder;
use paper_copilot_core::generation::{fragments, FragmentStream, Generator};
use paper_copilot_core::index::memory::InMemoryIndex;
use paper_copilot_core::index::{IndexHit, VectorIndex};
use paper_copilot_core::models::{Chunk, DocumentSummary};
use paper_copilot_core::{CopilotError, Result};

pub const VOCAB: &[&str] = &[
    "transformer",
    "attention",
    "dataset",
    "imagenet",
    "accuracy",
    "baseline",
    "convolution",
    "gradient",
    "protein",
    "folding",
];

/// Three pages of ten words each; with ten-token chunks every page is one chunk.
pub const PAPER_PAGES: &[&str] = &[
    "This paper introduces the transformer model built on attention layers.",
    "We evaluate on the imagenet dataset and report top accuracy.",
    "Training uses gradient descent with one convolution baseline for comparison.",
];

/// A single ten-word page.
pub const SECOND_PAPER: &str = "Our second study also reports accuracy on a custom dataset.";

pub fn paper_bytes() -> Vec<u8> {
    PAPER_PAGES.join("\x0c").into_bytes()
}

/// Config with page-sized chunks and fast retries.
pub fn test_config(extra: &str) -> Config {
    let base = r#"
[chunking]
chunk_size = 10
overlap_ratio = 0.0
min_chunk_tokens = 1

[retrieval]
candidate_k = 10
top_k = 5
similarity_cutoff = 0.5

[embedding]
batch_size = 2

[retry]
max_retries = 2
base_delay_ms = 1
max_delay_ms = 5
"#;
    parse_config(&format!("{}\n{}", base, extra)).expect("test config parses")
}

pub struct KeywordEmbedder {
    pub calls: AtomicUsize,
    /// Texts containing this word fail with a terminal error.
    pub poison: Option<String>,
}

impl KeywordEmbedder {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poison: None,
        }
    }

    pub fn poisoned(word: &str) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            poison: Some(word.to_string()),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

pub fn keyword_vector(text: &str) -> Vec<f32> {
    let words: Vec<String> = text
        .split(|c: char| !c.is_alphanumeric())
        .map(|w| w.to_lowercase())
        .collect();
    VOCAB
        .iter()
        .map(|v| words.iter().filter(|w| w == v).count() as f32)
        .collect()
}

#[async_trait]
impl Embedder for KeywordEmbedder {
    fn model_name(&self) -> &str {
        "keyword-v1"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(word) = &self.poison {
            if texts.iter().any(|t| t.contains(word.as_str())) {
                return Err(CopilotError::embedding(
                    format!("rejected input containing {}", word),
                    false,
                ));
            }
        }
        Ok(texts.iter().map(|t| keyword_vector(t)).collect())
    }
}

/// Always fails with a retryable error.
pub struct UnavailableEmbedder {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Embedder for UnavailableEmbedder {
    fn model_name(&self) -> &str {
        "unavailable"
    }

    fn dims(&self) -> usize {
        VOCAB.len()
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CopilotError::embedding("HTTP 503", true))
    }
}

/// Replays answer templates in order, repeating the last one.
///
/// `{pN}` in a template is replaced with the source label the prompt lists
/// for page N, so answers stay valid regardless of ranking order.
pub struct ScriptedGenerator {
    responses: Mutex<VecDeque<String>>,
    last: Mutex<String>,
    pub prompts: Mutex<Vec<String>>,
    /// Delay before the first `slow_calls` responses.
    delay: Duration,
    slow_calls: AtomicUsize,
}

impl ScriptedGenerator {
    pub fn new(responses: &[&str]) -> Self {
        Self {
            responses: Mutex::new(responses.iter().map(|s| s.to_string()).collect()),
            last: Mutex::new(String::new()),
            prompts: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
            slow_calls: AtomicUsize::new(0),
        }
    }

    /// The first `calls` generations stall for `delay`.
    pub fn slow(mut self, delay: Duration, calls: usize) -> Self {
        self.delay = delay;
        self.slow_calls = AtomicUsize::new(calls);
        self
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

/// Label of the first source the prompt lists for `page`.
pub fn label_for_page(prompt: &str, page: u32) -> Option<String> {
    let suffix = format!(", page {}", page);
    prompt
        .lines()
        .skip_while(|l| !l.starts_with("AVAILABLE SOURCES:"))
        .skip(1)
        .take_while(|l| !l.trim().is_empty())
        .find(|l| l.ends_with(&suffix))
        .and_then(|l| l.split(':').next())
        .map(|s| s.trim().to_string())
}

fn fill_template(template: &str, prompt: &str) -> String {
    let mut out = template.to_string();
    for page in 1..=9u32 {
        let key = format!("{{p{}}}", page);
        if out.contains(&key) {
            let label = label_for_page(prompt, page).unwrap_or_else(|| "S99".to_string());
            out = out.replace(&key, &label);
        }
    }
    out
}

#[async_trait]
impl Generator for ScriptedGenerator {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<FragmentStream> {
        self.prompts.lock().unwrap().push(prompt.to_string());

        let stall = self
            .slow_calls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if stall {
            tokio::time::sleep(self.delay).await;
        }

        let template = {
            let mut queue = self.responses.lock().unwrap();
            let mut last = self.last.lock().unwrap();
            if let Some(next) = queue.pop_front() {
                *last = next;
            }
            last.clone()
        };
        let text = fill_template(&template, prompt);
        let parts = text.split_inclusive(' ').map(String::from).collect();
        Ok(fragments(parts))
    }
}

pub fn copilot_with(
    config: Config,
    embedder: Arc<dyn Embedder>,
    generator: Arc<dyn Generator>,
) -> (Copilot, Arc<InMemoryIndex>) {
    let index = Arc::new(InMemoryIndex::new());
    let copilot = Copilot::with_components(config, index.clone(), embedder, generator);
    (copilot, index)
}

/// In-memory index whose `query` and `commit` fail with `IndexUnavailable`
/// for the next N calls.
#[derive(Default)]
pub struct FlakyIndex {
    pub inner: InMemoryIndex,
    query_failures: AtomicUsize,
    commit_failures: AtomicUsize,
    pub query_calls: AtomicUsize,
    pub commit_calls: AtomicUsize,
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

impl FlakyIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_queries(&self, n: usize) {
        self.query_failures.store(n, Ordering::SeqCst);
    }

    pub fn fail_commits(&self, n: usize) {
        self.commit_failures.store(n, Ordering::SeqCst);
    }

    pub fn query_calls(&self) -> usize {
        self.query_calls.load(Ordering::SeqCst)
    }

    pub fn commit_calls(&self) -> usize {
        self.commit_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorIndex for FlakyIndex {
    async fn insert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        self.inner.insert(chunk, vector).await
    }

    async fn commit(&self, document: &DocumentSummary) -> Result<()> {
        self.commit_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.commit_failures) {
            return Err(CopilotError::IndexUnavailable("database is locked".into()));
        }
        self.inner.commit(document).await
    }

    async fn abort(&self, document_id: &str) -> Result<()> {
        self.inner.abort(document_id).await
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<IndexHit>> {
        self.query_calls.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.query_failures) {
            return Err(CopilotError::IndexUnavailable("transient".into()));
        }
        self.inner.query(vector, k, scope).await
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        self.inner.get_chunk(chunk_id).await
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        self.inner.get_document(document_id).await
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        self.inner.list_documents().await
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.inner.delete_document(document_id).await
    }
}
