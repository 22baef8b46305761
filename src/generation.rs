//! Generation providers.
//!
//! Concrete [`Generator`] implementations selected by `generation.provider`.
//! Both HTTP providers request a non-streaming completion and hand it back
//! as a single fragment; the dispatcher treats fragment streams uniformly.
//! Failure classification matches [`crate::embedding`].

use std::sync::Arc;
use std::time::Instant;

use anyhow::bail;
use async_trait::async_trait;
use paper_copilot_core::generation::{single_fragment, FragmentStream, Generator};
use paper_copilot_core::{CopilotError, Result};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument, warn};

use crate::config::GenerationConfig;
use crate::embedding::{classify_transport, status_is_retryable, DEFAULT_OLLAMA_URL, DEFAULT_OPENAI_URL};

const SYSTEM_PROMPT: &str = "You answer questions about research papers using only the supplied \
context. Every claim carries a citation marker in the requested format.";

pub fn create_generator(config: &GenerationConfig) -> anyhow::Result<Arc<dyn Generator>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledGenerator)),
        "openai" => Ok(Arc::new(OpenAIGenerator::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaGenerator::new(config)?)),
        other => bail!("Unknown generation provider: {}", other),
    }
}

/// Client without its own timeout; the dispatcher enforces the deadline.
fn http_client() -> anyhow::Result<Client> {
    Ok(Client::builder().build()?)
}

fn transport_error(e: reqwest::Error) -> CopilotError {
    let (message, retryable) = classify_transport(e);
    CopilotError::generation(message, retryable)
}

fn log_timing(start: Instant, prompt_len: usize, response_len: usize) {
    let elapsed = start.elapsed().as_millis() as u64;
    debug!(response_len, duration_ms = elapsed, "generation complete");
    if elapsed > 30_000 {
        warn!(duration_ms = elapsed, prompt_len, slow = true, "slow generation request");
    }
}

#[derive(Serialize, Deserialize, Clone)]
struct ChatMessage {
    role: String,
    content: String,
}

fn messages(prompt: &str) -> Vec<ChatMessage> {
    vec![
        ChatMessage {
            role: "system".to_string(),
            content: SYSTEM_PROMPT.to_string(),
        },
        ChatMessage {
            role: "user".to_string(),
            content: prompt.to_string(),
        },
    ]
}

// ============ Disabled ============

pub struct DisabledGenerator;

#[async_trait]
impl Generator for DisabledGenerator {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn generate(&self, _prompt: &str) -> Result<FragmentStream> {
        Err(CopilotError::generation(
            "generation provider is disabled; set [generation] provider in the config",
            false,
        ))
    }
}

// ============ OpenAI ============

/// Chat completions. Requires `OPENAI_API_KEY`.
pub struct OpenAIGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
}

impl OpenAIGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OPENAI_URL.to_string());

        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature: config.temperature,
        })
    }
}

#[derive(Serialize)]
struct OpenAIChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

#[derive(Deserialize)]
struct OpenAIChatResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: ChatMessage,
}

#[async_trait]
impl Generator for OpenAIGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(component = "openai", op = "generate", model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<FragmentStream> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/v1/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&OpenAIChatRequest {
                model: &self.model,
                messages: messages(prompt),
                temperature: self.temperature,
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::generation(
                format!("OpenAI API error {}: {}", status, body),
                status_is_retryable(status),
            ));
        }

        let parsed: OpenAIChatResponse = response.json().await.map_err(|e| {
            CopilotError::generation(format!("invalid OpenAI response: {}", e), false)
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CopilotError::generation("OpenAI response had no choices", false))?;

        log_timing(start, prompt.len(), content.len());
        Ok(single_fragment(content))
    }
}

// ============ Ollama ============

pub struct OllamaGenerator {
    client: Client,
    base_url: String,
    model: String,
    temperature: f32,
}

impl OllamaGenerator {
    pub fn new(config: &GenerationConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("generation.model required for Ollama provider"))?;
        let base_url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http_client()?,
            base_url: base_url.trim_end_matches('/').to_string(),
            model,
            temperature: config.temperature,
        })
    }
}

#[derive(Serialize)]
struct OllamaChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage>,
    stream: bool,
    options: OllamaOptions,
}

#[derive(Serialize)]
struct OllamaOptions {
    temperature: f32,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    message: ChatMessage,
}

#[async_trait]
impl Generator for OllamaGenerator {
    fn model_name(&self) -> &str {
        &self.model
    }

    #[instrument(skip(self, prompt), fields(component = "ollama", op = "generate", model = %self.model, prompt_len = prompt.len()))]
    async fn generate(&self, prompt: &str) -> Result<FragmentStream> {
        let start = Instant::now();
        let response = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&OllamaChatRequest {
                model: &self.model,
                messages: messages(prompt),
                stream: false,
                options: OllamaOptions {
                    temperature: self.temperature,
                },
            })
            .send()
            .await
            .map_err(transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(CopilotError::generation(
                format!("Ollama returned {}: {}", status, body),
                status_is_retryable(status),
            ));
        }

        let parsed: OllamaChatResponse = response.json().await.map_err(|e| {
            CopilotError::generation(format!("invalid Ollama response: {}", e), false)
        })?;
        let content = parsed.message.content;

        log_timing(start, prompt.len(), content.len());
        Ok(single_fragment(content))
    }
}
