//! # Paper Copilot
//!
//! Question answering over research papers with page-accurate, validated
//! citations.
//!
//! Documents are extracted page by page, normalized into one text with a page
//! map, and chunked so every chunk knows exactly which pages it spans.
//! Questions are answered from retrieved chunks only; every citation in a
//! generated answer is checked against the evidence before the answer is
//! released.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────┐   ┌──────────────────┐   ┌──────────┐
//! │ Extractor │──▶│ Normalize+Chunk  │──▶│  SQLite   │
//! │ PDF/DOCX  │   │ Embed (batched)  │   │  Vectors  │
//! └───────────┘   └──────────────────┘   └────┬─────┘
//!                                              │
//!                 ┌──────────────┐             │
//!                 │  Dispatcher  │◀────────────┘
//!                 │ retrieve →   │
//!                 │ generate →   │
//!                 │ validate     │
//!                 └──────┬───────┘
//!                ┌───────┴───────┐
//!                ▼               ▼
//!          ┌──────────┐    ┌──────────┐
//!          │   CLI    │    │   HTTP   │
//!          │  (pcp)   │    │   API    │
//!          └──────────┘    └──────────┘
//! ```
//!
//! The runtime-free pieces (models, normalizer, chunker, retriever, citation
//! validator, prompts) live in the `paper-copilot-core` crate.
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`copilot`] | Facade wiring index, providers, ingestion, and queries |
//! | [`extract`] | Per-page text extraction (PDF, DOCX, plain text) |
//! | [`ingest`] | Ingestion pipeline |
//! | [`embedding`] | Embedding providers (OpenAI, Ollama) |
//! | [`generation`] | Generation providers (OpenAI, Ollama) |
//! | [`dispatch`] | Query modes and the generate-validate loop |
//! | [`retry`] | Bounded exponential backoff |
//! | [`cancel`] | Query cancellation |
//! | [`sqlite_index`] | SQLite-backed vector index |
//! | [`server`] | HTTP API |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |

pub mod cancel;
pub mod config;
pub mod copilot;
pub mod db;
pub mod dispatch;
pub mod embedding;
pub mod extract;
pub mod generation;
pub mod ingest;
pub mod migrate;
pub mod retry;
pub mod server;
pub mod sqlite_index;
