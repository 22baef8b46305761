//! # Paper Copilot Core
//!
//! Runtime-free logic for Paper Copilot: data models, the page normalizer,
//! the boundary-tracking chunker, the vector index abstraction, the hybrid
//! retriever, prompt construction, and citation validation.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. Everything
//! that talks to the outside world (extractors, embedding and generation
//! providers, the SQLite index, the query dispatcher) lives in the
//! `paper-copilot` application crate and plugs in through the traits
//! defined here.

pub mod chunk;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod generation;
pub mod index;
pub mod models;
pub mod normalize;
pub mod prompt;
pub mod retrieve;

pub use error::{CopilotError, Result};
