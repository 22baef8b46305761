//! Configuration parsing and validation.
//!
//! Paper Copilot is configured via a TOML file (default: `config/pcp.toml`).
//! Every section is optional; missing keys fall back to the defaults below.
//!
//! # Example Configuration
//!
//! ```toml
//! [index]
//! path = "./data/papers.sqlite"
//!
//! [chunking]
//! chunk_size = 500
//! overlap_ratio = 0.1
//! min_chunk_tokens = 50
//!
//! [retrieval]
//! candidate_k = 20
//! top_k = 5
//! similarity_cutoff = 0.5
//!
//! [retrieval.fusion]
//! strategy = "weighted"
//! vector_weight = 0.8
//! lexical_weight = 0.2
//!
//! [validation]
//! max_retries = 2
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [generation]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! timeout_secs = 60
//!
//! [retry]
//! max_retries = 3
//! base_delay_ms = 500
//!
//! [server]
//! bind = "127.0.0.1:7341"
//! ```
//!
//! [`load_config`] rejects out-of-range values at startup so a bad file never
//! reaches the pipeline.

use anyhow::{bail, Context, Result};
use paper_copilot_core::chunk::ChunkParams;
use paper_copilot_core::retrieve::{FusionStrategy, RetrievalParams};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Top-level configuration.
#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub index: IndexConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub generation: GenerationConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexConfig {
    /// SQLite database file. Parent directories are created on connect.
    #[serde(default = "default_index_path")]
    pub path: PathBuf,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            path: default_index_path(),
        }
    }
}

fn default_index_path() -> PathBuf {
    PathBuf::from("./data/papers.sqlite")
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap_ratio")]
    pub overlap_ratio: f64,
    #[serde(default = "default_min_chunk_tokens")]
    pub min_chunk_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap_ratio: default_overlap_ratio(),
            min_chunk_tokens: default_min_chunk_tokens(),
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> ChunkParams {
        ChunkParams {
            chunk_size: self.chunk_size,
            overlap_ratio: self.overlap_ratio,
            min_chunk_tokens: self.min_chunk_tokens,
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap_ratio() -> f64 {
    0.1
}
fn default_min_chunk_tokens() -> usize {
    50
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_candidate_k")]
    pub candidate_k: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_similarity_cutoff")]
    pub similarity_cutoff: f64,
    #[serde(default)]
    pub fusion: FusionStrategy,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            candidate_k: default_candidate_k(),
            top_k: default_top_k(),
            similarity_cutoff: default_similarity_cutoff(),
            fusion: FusionStrategy::default(),
        }
    }
}

impl RetrievalConfig {
    pub fn params(&self) -> RetrievalParams {
        RetrievalParams {
            candidate_k: self.candidate_k,
            top_k: self.top_k,
            similarity_cutoff: self.similarity_cutoff,
            fusion: self.fusion,
        }
    }
}

fn default_candidate_k() -> usize {
    20
}
fn default_top_k() -> usize {
    5
}
fn default_similarity_cutoff() -> f64 {
    0.5
}

#[derive(Debug, Deserialize, Clone)]
pub struct ValidationConfig {
    /// Re-generations after a rejected answer before degrading.
    #[serde(default = "default_validation_retries")]
    pub max_retries: u32,
    /// Reject answers that contain no citation markers.
    #[serde(default = "default_true")]
    pub require_citation: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_retries: default_validation_retries(),
            require_citation: true,
        }
    }
}

fn default_validation_retries() -> u32 {
    2
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    /// Base URL override (OpenAI-compatible gateway or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    /// Texts per embedding request.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Embedding requests in flight at once, shared across documents.
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            dims: None,
            url: None,
            batch_size: default_batch_size(),
            max_concurrency: default_max_concurrency(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_concurrency() -> usize {
    4
}
fn default_embedding_timeout() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct GenerationConfig {
    /// `disabled`, `openai`, or `ollama`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Deadline for one generation call, fragments included.
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            timeout_secs: default_generation_timeout(),
            temperature: default_temperature(),
        }
    }
}

impl GenerationConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

fn default_generation_timeout() -> u64 {
    60
}
fn default_temperature() -> f32 {
    0.2
}

/// Bounded exponential backoff for retryable failures.
#[derive(Debug, Deserialize, Clone)]
pub struct RetryConfig {
    #[serde(default = "default_retry_max")]
    pub max_retries: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_retry_max(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

fn default_retry_max() -> u32 {
    3
}
fn default_base_delay_ms() -> u64 {
    500
}
fn default_max_delay_ms() -> u64 {
    16_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct IngestConfig {
    /// Documents processed concurrently by `ingest_many`.
    #[serde(default = "default_max_concurrent_documents")]
    pub max_concurrent_documents: usize,
    /// Inputs larger than this are rejected before extraction.
    #[serde(default = "default_max_document_bytes")]
    pub max_document_bytes: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_documents: default_max_concurrent_documents(),
            max_document_bytes: default_max_document_bytes(),
        }
    }
}

fn default_max_concurrent_documents() -> usize {
    2
}
fn default_max_document_bytes() -> usize {
    50 * 1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:7341".to_string()
}

impl Config {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        let c = &self.chunking;
        if c.chunk_size == 0 {
            bail!("chunking.chunk_size must be > 0");
        }
        if !(0.0..1.0).contains(&c.overlap_ratio) {
            bail!("chunking.overlap_ratio must be in [0.0, 1.0)");
        }
        if c.min_chunk_tokens > c.chunk_size {
            bail!("chunking.min_chunk_tokens must not exceed chunking.chunk_size");
        }

        let r = &self.retrieval;
        if r.top_k == 0 {
            bail!("retrieval.top_k must be >= 1");
        }
        if r.candidate_k < r.top_k {
            bail!("retrieval.candidate_k must be >= retrieval.top_k");
        }
        if !(-1.0..=1.0).contains(&r.similarity_cutoff) {
            bail!("retrieval.similarity_cutoff must be in [-1.0, 1.0]");
        }
        match r.fusion {
            FusionStrategy::Weighted {
                vector_weight,
                lexical_weight,
            } => {
                if vector_weight < 0.0 || lexical_weight < 0.0 {
                    bail!("retrieval.fusion weights must be >= 0");
                }
                if vector_weight + lexical_weight <= 0.0 {
                    bail!("retrieval.fusion weights must not both be 0");
                }
            }
            FusionStrategy::Multiplicative { lexical_boost } => {
                if lexical_boost < 0.0 {
                    bail!("retrieval.fusion.lexical_boost must be >= 0");
                }
            }
        }

        let e = &self.embedding;
        match e.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if e.is_enabled() {
            if e.model.is_none() {
                bail!(
                    "embedding.model must be specified when provider is '{}'",
                    e.provider
                );
            }
            if e.dims.unwrap_or(0) == 0 {
                bail!("embedding.dims must be > 0 when provider is '{}'", e.provider);
            }
        }
        if e.batch_size == 0 || e.max_concurrency == 0 {
            bail!("embedding.batch_size and embedding.max_concurrency must be > 0");
        }

        let g = &self.generation;
        match g.provider.as_str() {
            "disabled" | "openai" | "ollama" => {}
            other => bail!(
                "Unknown generation provider: '{}'. Must be disabled, openai, or ollama.",
                other
            ),
        }
        if g.is_enabled() && g.model.is_none() {
            bail!(
                "generation.model must be specified when provider is '{}'",
                g.provider
            );
        }
        if g.timeout_secs == 0 {
            bail!("generation.timeout_secs must be > 0");
        }

        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            bail!("retry.base_delay_ms must not exceed retry.max_delay_ms");
        }
        if self.ingest.max_concurrent_documents == 0 {
            bail!("ingest.max_concurrent_documents must be > 0");
        }

        Ok(())
    }
}

/// Read, parse, and validate a configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

/// Parse and validate configuration from a TOML string.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).context("Failed to parse config file")?;
    config.validate()?;
    Ok(config)
}
