//! Generation gateway trait.
//!
//! A [`Generator`] turns a prompt into a stream of text fragments. The
//! dispatcher concatenates fragments, checking for cancellation between
//! them, and validates the assembled answer before releasing it.

use async_trait::async_trait;
use futures::stream::{self, BoxStream, StreamExt};

use crate::error::Result;

/// Ordered answer fragments. Errors end the stream.
pub type FragmentStream = BoxStream<'static, Result<String>>;

#[async_trait]
pub trait Generator: Send + Sync {
    fn model_name(&self) -> &str;

    /// Start generating a completion for `prompt`.
    ///
    /// Failures are reported as [`CopilotError::Generation`](crate::CopilotError::Generation)
    /// with `retryable` set for rate limits and server errors.
    async fn generate(&self, prompt: &str) -> Result<FragmentStream>;
}

/// Wrap a complete response as a single-fragment stream.
pub fn single_fragment(text: String) -> FragmentStream {
    stream::once(async move { Ok(text) }).boxed()
}

/// Wrap pre-split fragments as a stream.
pub fn fragments(parts: Vec<String>) -> FragmentStream {
    stream::iter(parts.into_iter().map(Ok)).boxed()
}
