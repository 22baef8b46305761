//! # Paper Copilot CLI (`pcp`)
//!
//! Ingest research papers and ask questions answered only from their text,
//! with every claim tied to a page.
//!
//! ## Usage
//!
//! ```bash
//! pcp --config ./config/pcp.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `pcp init` | Create the SQLite index and run schema migrations |
//! | `pcp ingest <paths>...` | Extract, chunk, embed, and index documents |
//! | `pcp ask "<question>"` | Answer a question with validated citations |
//! | `pcp chunk <id>` | Show a chunk's text and page span |
//! | `pcp documents [id]` | List indexed documents, or show one |
//! | `pcp delete <id>` | Remove a document from the index |
//! | `pcp serve` | Start the HTTP API |
//!
//! ## Examples
//!
//! ```bash
//! pcp init
//! pcp ingest papers/attention.pdf papers/bert.pdf
//! pcp ask "What dataset is used for evaluation?"
//! pcp ask "How do the training objectives differ?" --mode comparison \
//!     --scope <doc-id-a> --scope <doc-id-b>
//! pcp ask "What is self-attention?" --mode simplification
//! ```
//!
//! Logs go to stderr and are controlled with `RUST_LOG`.

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use paper_copilot::cancel::CancelToken;
use paper_copilot::config;
use paper_copilot::copilot::Copilot;
use paper_copilot::server;
use paper_copilot::sqlite_index::SqliteIndex;
use paper_copilot_core::models::{Answer, AnswerStatus, QueryMode};
use paper_copilot_core::CopilotError;
use tracing_subscriber::EnvFilter;

/// Paper Copilot: question answering over research papers with
/// page-accurate, validated citations.
#[derive(Parser)]
#[command(
    name = "pcp",
    about = "Paper Copilot: question answering over research papers with validated citations",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/pcp.toml`. Index, provider, retrieval, and
    /// server settings are read from this file.
    #[arg(long, global = true, default_value = "./config/pcp.toml")]
    config: PathBuf,

    /// Print results as JSON instead of text.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the index schema.
    ///
    /// Creates the SQLite file and its tables. Safe to run repeatedly.
    Init,

    /// Ingest one or more documents.
    ///
    /// The format is taken from each file's extension (`pdf`, `docx`, `txt`, `md`).
    /// Re-ingesting identical bytes is a no-op unless the embedding model changed.
    Ingest {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
    },

    /// Ask a question about the indexed papers.
    Ask {
        question: String,

        /// `standard`, `comparison`, or `simplification`.
        #[arg(long, default_value = "standard")]
        mode: String,

        /// Restrict retrieval to these document ids (repeatable).
        #[arg(long)]
        scope: Vec<String>,
    },

    /// Show one chunk by id.
    Chunk { id: String },

    /// List indexed documents, or show one.
    Documents { id: Option<String> },

    /// Remove a document and its chunks from the index.
    Delete { id: String },

    /// Start the HTTP API on `[server].bind`.
    Serve,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    match cli.command {
        Commands::Init => {
            let index = SqliteIndex::open(&cfg.index).await?;
            index.close().await;
            println!("Index initialized at {}", cfg.index.path.display());
        }
        Commands::Ingest { paths } => {
            let copilot = Copilot::from_config(cfg).await?;
            run_ingest(&copilot, &paths, cli.json).await?;
        }
        Commands::Ask {
            question,
            mode,
            scope,
        } => {
            let mode: QueryMode = mode.parse()?;
            let scope = if scope.is_empty() { None } else { Some(scope) };
            let copilot = Copilot::from_config(cfg).await?;
            run_ask(&copilot, &question, mode, scope, cli.json).await?;
        }
        Commands::Chunk { id } => {
            let copilot = Copilot::from_config(cfg).await?;
            let chunk = copilot.get_chunk(&id).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&chunk)?);
            } else {
                println!("chunk:    {}", chunk.id);
                println!("document: {}", chunk.document_id);
                println!("pages:    {}-{}", chunk.page_start, chunk.page_end);
                println!("tokens:   {}", chunk.token_count);
                println!();
                println!("{}", chunk.text);
            }
        }
        Commands::Documents { id } => {
            let copilot = Copilot::from_config(cfg).await?;
            let docs = match id {
                Some(id) => vec![copilot.get_document(&id).await?],
                None => copilot.list_documents().await?,
            };
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&docs)?);
            } else if docs.is_empty() {
                println!("No documents indexed.");
            } else {
                for d in &docs {
                    println!(
                        "{}  {:<5} pages={:<4} chunks={:<5} model={}  {}",
                        d.id,
                        d.format,
                        d.page_count,
                        d.chunk_count,
                        d.embedding_model,
                        d.display_name()
                    );
                }
            }
        }
        Commands::Delete { id } => {
            let copilot = Copilot::from_config(cfg).await?;
            copilot.delete_document(&id).await?;
            println!("Deleted {}", id);
        }
        Commands::Serve => {
            server::run_server(cfg).await?;
        }
    }

    Ok(())
}

async fn run_ingest(copilot: &Copilot, paths: &[PathBuf], json: bool) -> anyhow::Result<()> {
    let results = copilot.ingest_many(paths).await;
    let mut failed = 0usize;
    let mut reports = Vec::new();

    for (path, result) in results {
        match result {
            Ok(report) => {
                if !json {
                    let state = if report.already_indexed {
                        "already indexed"
                    } else if report.reembedded {
                        "re-embedded"
                    } else {
                        "indexed"
                    };
                    println!(
                        "{}: {} {} ({} pages, {}/{} chunks)",
                        path.display(),
                        state,
                        report.document_id,
                        report.page_count,
                        report.indexed_chunks,
                        report.chunk_count
                    );
                    for s in &report.skipped {
                        println!(
                            "  skipped chunk {} (pages {}-{}): {}",
                            s.chunk_id, s.page_start, s.page_end, s.reason
                        );
                    }
                }
                reports.push(report);
            }
            Err(e) => {
                failed += 1;
                eprintln!("{}: {}", path.display(), e);
            }
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&reports)?);
    }
    if failed > 0 {
        bail!("{} of {} documents failed to ingest", failed, paths.len());
    }
    Ok(())
}

async fn run_ask(
    copilot: &Copilot,
    question: &str,
    mode: QueryMode,
    scope: Option<Vec<String>>,
    json: bool,
) -> anyhow::Result<()> {
    let cancel = CancelToken::new();
    let watcher = {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        })
    };

    let result = copilot
        .ask_with_cancel(question, mode, scope, &cancel)
        .await;
    watcher.abort();

    match result {
        Ok(answer) => {
            if json {
                println!("{}", serde_json::to_string_pretty(&answer)?);
            } else {
                print_answer(&answer);
            }
            Ok(())
        }
        Err(CopilotError::NoRelevantEvidence { query_id }) => {
            if json {
                println!(
                    "{}",
                    serde_json::json!({ "status": "no_relevant_evidence", "query_id": query_id })
                );
            } else {
                println!("No relevant passages found in the indexed papers.");
            }
            Ok(())
        }
        Err(e) => Err(e).context("ask failed"),
    }
}

fn print_answer(answer: &Answer) {
    println!("{}", answer.text);
    if !answer.citations.is_empty() {
        println!();
        println!("Sources:");
        for c in &answer.citations {
            let tag = c
                .paper_tag
                .as_deref()
                .map(|t| format!("[{}] ", t))
                .unwrap_or_default();
            println!("  {}{} p.{} (chunk {})", tag, c.document_id, c.page, c.chunk_id);
            if let Some(q) = &c.quote {
                println!("    \"{}\"", q);
            }
        }
    }
    let status = match answer.status {
        AnswerStatus::Validated => "validated",
        AnswerStatus::Rejected => "rejected",
        AnswerStatus::Degraded => "degraded",
    };
    println!();
    println!(
        "[{} | {} | {} attempt(s) | query {}]",
        answer.mode, status, answer.attempts, answer.query_id
    );
}
