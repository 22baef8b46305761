//! Embedding gateway trait and vector utilities.
//!
//! Defines the [`Embedder`] trait that all embedding backends implement,
//! plus pure helper functions for vector serialization and similarity
//! computation.
//!
//! Concrete providers (OpenAI, Ollama) live in the `paper-copilot` app
//! crate. A provider must return exactly one vector per input text, in
//! input order, each of length [`Embedder::dims`].

use async_trait::async_trait;

use crate::error::{CopilotError, Result};

/// Maps text to fixed-dimension vectors.
///
/// Implementations report failures as [`CopilotError::Embedding`] with the
/// `retryable` flag set for rate limits, timeouts, and 5xx responses.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier (e.g. `"text-embedding-3-small"`). Stored next to
    /// every vector so a model change can be detected on re-ingest.
    fn model_name(&self) -> &str;

    /// Vector dimensionality.
    fn dims(&self) -> usize;

    /// Embed a batch of texts.
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Embed a single text.
pub async fn embed_one(embedder: &dyn Embedder, text: &str) -> Result<Vec<f32>> {
    let mut vectors = embedder.embed(&[text.to_string()]).await?;
    let vector = vectors
        .pop()
        .ok_or_else(|| CopilotError::embedding("provider returned no vectors", false))?;
    check_dims(embedder, &vector)?;
    Ok(vector)
}

/// Reject vectors whose length disagrees with the embedder's declared dims.
pub fn check_dims(embedder: &dyn Embedder, vector: &[f32]) -> Result<()> {
    if vector.len() != embedder.dims() {
        return Err(CopilotError::embedding(
            format!(
                "model {} returned {} dims, expected {}",
                embedder.model_name(),
                vector.len(),
                embedder.dims()
            ),
            false,
        ));
    }
    Ok(())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use paper_copilot_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12);
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB produced by [`vec_to_blob`].
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        .collect()
}

/// Cosine similarity in `[-1.0, 1.0]`.
///
/// Returns `0.0` for empty vectors, zero vectors, or length mismatches.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}
