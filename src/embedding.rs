//! Embedding providers.
//!
//! Concrete [`Embedder`] implementations selected by `embedding.provider`:
//! - **[`DisabledEmbedder`]**: every call fails; used when embeddings are not configured.
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings` on the OpenAI API or a compatible gateway.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//!
//! Each provider makes exactly one HTTP request per call. Retries live in
//! [`crate::retry::with_backoff`]; providers only classify failures:
//! - HTTP 429 (rate limited) and 5xx (server error): retryable
//! - network errors and client timeouts: retryable
//! - other HTTP 4xx, malformed bodies, wrong vector counts: terminal

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::bail;
use async_trait::async_trait;
use paper_copilot_core::embedding::Embedder;
use paper_copilot_core::{CopilotError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::EmbeddingConfig;

pub const DEFAULT_OPENAI_URL: &str = "https://api.openai.com";
pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Instantiate the provider named in the configuration.
pub fn create_embedder(config: &EmbeddingConfig) -> anyhow::Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

/// Map a transport error onto the retry classification.
pub(crate) fn classify_transport(err: reqwest::Error) -> (String, bool) {
    let retryable = err.is_timeout() || err.is_connect() || err.is_request();
    (format!("request failed: {}", err), retryable)
}

/// 429 and 5xx are worth retrying, every other non-success status is not.
pub(crate) fn status_is_retryable(status: reqwest::StatusCode) -> bool {
    status.as_u16() == 429 || status.is_server_error()
}

fn http_client(timeout_secs: u64) -> anyhow::Result<Client> {
    Ok(Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

fn check_count(model: &str, expected: usize, got: usize) -> Result<()> {
    if expected != got {
        return Err(CopilotError::embedding(
            format!("model {} returned {} vectors for {} inputs", model, got, expected),
            false,
        ));
    }
    Ok(())
}

// ============ Disabled ============

pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }

    fn dims(&self) -> usize {
        0
    }

    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Err(CopilotError::embedding(
            "embedding provider is disabled; set [embedding] provider in the config",
            false,
        ))
    }
}

// ============ OpenAI ============

/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIEmbedder {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[derive(Serialize)]
struct OpenAIEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAIEmbeddingResponse {
    data: Vec<OpenAIEmbeddingItem>,
}

#[derive(Deserialize)]
struct OpenAIEmbeddingItem {
    index: usize,
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    #[instrument(skip(self, texts), fields(component = "openai", op = "embed", model = %self.model, input_count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/v1/embeddings", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&OpenAIEmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                let (message, retryable) = classify_transport(e);
                CopilotError::embedding(message, retryable)
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::embedding(
                format!("OpenAI API error {}: {}", status, body),
                status_is_retryable(status),
            ));
        }

        let mut parsed: OpenAIEmbeddingResponse = response.json().await.map_err(|e| {
            CopilotError::embedding(format!("invalid OpenAI response: {}", e), false)
        })?;
        parsed.data.sort_by_key(|item| item.index);
        check_count(&self.model, texts.len(), parsed.data.len())?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(duration_ms = elapsed, "embedding complete");
        if elapsed > 5000 {
            warn!(duration_ms = elapsed, slow = true, "slow embedding request");
        }
        Ok(parsed.data.into_iter().map(|item| item.embedding).collect())
    }
}

// ============ Ollama ============

pub struct OllamaEmbedder {
    client: Client,
    base_url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[derive(Serialize)]
struct OllamaEmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OllamaEmbeddingResponse {
    embeddings: Vec<Vec<f32>>,
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    #[instrument(skip(self, texts), fields(component = "ollama", op = "embed", model = %self.model, input_count = texts.len()))]
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }
        let start = Instant::now();

        let response = self
            .client
            .post(format!("{}/api/embed", self.base_url))
            .json(&OllamaEmbeddingRequest {
                model: &self.model,
                input: texts,
            })
            .send()
            .await
            .map_err(|e| {
                let (message, retryable) = classify_transport(e);
                CopilotError::embedding(
                    format!("{} (is Ollama running at {}?)", message, self.base_url),
                    retryable,
                )
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::embedding(
                format!("Ollama returned {}: {}", status, body),
                status_is_retryable(status),
            ));
        }

        let parsed: OllamaEmbeddingResponse = response.json().await.map_err(|e| {
            CopilotError::embedding(format!("invalid Ollama response: {}", e), false)
        })?;
        check_count(&self.model, texts.len(), parsed.embeddings.len())?;

        let elapsed = start.elapsed().as_millis() as u64;
        debug!(duration_ms = elapsed, "embedding complete");
        if elapsed > 5000 {
            warn!(duration_ms = elapsed, slow = true, "slow embedding request");
        }
        Ok(parsed.embeddings)
    }
}
