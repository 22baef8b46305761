//! SQLite-backed [`VectorIndex`].
//!
//! Chunks and vectors are staged in memory by [`VectorIndex::insert`] and
//! written in a single transaction by [`VectorIndex::commit`], which also
//! removes whatever the document had committed before. Readers only ever
//! query the tables, so a document is either fully visible or not at all.
//!
//! Vector search is brute-force cosine similarity over `chunk_vectors`,
//! computed in Rust.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::DateTime;
use paper_copilot_core::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use paper_copilot_core::index::{sort_hits, IndexHit, VectorIndex};
use paper_copilot_core::models::{Chunk, DocumentSummary, FormatTag};
use paper_copilot_core::{CopilotError, Result};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::config::IndexConfig;
use crate::{db, migrate};

type Staged = HashMap<String, Vec<(Chunk, Vec<f32>)>>;

pub struct SqliteIndex {
    pool: SqlitePool,
    staged: Mutex<Staged>,
}

fn unavailable(e: sqlx::Error) -> CopilotError {
    CopilotError::IndexUnavailable(e.to_string())
}

fn corrupt(what: &str, e: impl std::fmt::Display) -> CopilotError {
    CopilotError::IndexUnavailable(format!("corrupt {} row: {}", what, e))
}

impl SqliteIndex {
    /// Connect, creating the database file and schema if needed.
    pub async fn open(config: &IndexConfig) -> anyhow::Result<Self> {
        let pool = db::connect(config).await?;
        migrate::run_migrations(&pool).await?;
        Ok(Self::new(pool))
    }

    /// Wrap a pool whose schema is already migrated.
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            staged: Mutex::new(HashMap::new()),
        }
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn staged(&self) -> Result<std::sync::MutexGuard<'_, Staged>> {
        self.staged
            .lock()
            .map_err(|_| CopilotError::IndexUnavailable("staging lock poisoned".into()))
    }
}

fn row_to_chunk(row: &SqliteRow) -> Result<Chunk> {
    let page_spans: String = row.get("page_spans_json");
    let overlap_prev: Option<String> = row.get("overlap_prev_json");
    let overlap_next: Option<String> = row.get("overlap_next_json");

    Ok(Chunk {
        id: row.get("id"),
        document_id: row.get("document_id"),
        position: row.get::<i64, _>("position") as usize,
        text: row.get("text"),
        token_count: row.get::<i64, _>("token_count") as usize,
        page_start: row.get::<i64, _>("page_start") as u32,
        page_end: row.get::<i64, _>("page_end") as u32,
        start_offset: row.get::<i64, _>("start_offset") as usize,
        end_offset: row.get::<i64, _>("end_offset") as usize,
        start_in_page: row.get::<i64, _>("start_in_page") as usize,
        end_in_page: row.get::<i64, _>("end_in_page") as usize,
        page_spans: serde_json::from_str(&page_spans).map_err(|e| corrupt("chunk", e))?,
        overlap_prev: overlap_prev
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| corrupt("chunk", e))?,
        overlap_next: overlap_next
            .map(|s| serde_json::from_str(&s))
            .transpose()
            .map_err(|e| corrupt("chunk", e))?,
        hash: row.get("hash"),
    })
}

fn row_to_document(row: &SqliteRow) -> Result<DocumentSummary> {
    let format: String = row.get("format");
    let ingested_ms: i64 = row.get("ingested_at");
    Ok(DocumentSummary {
        id: row.get("id"),
        title: row.get("title"),
        format: format
            .parse::<FormatTag>()
            .map_err(|e| corrupt("document", e))?,
        page_count: row.get::<i64, _>("page_count") as usize,
        chunk_count: row.get::<i64, _>("chunk_count") as usize,
        skipped_chunks: row.get::<i64, _>("skipped_chunks") as usize,
        embedding_model: row.get("embedding_model"),
        ingested_at: DateTime::from_timestamp_millis(ingested_ms)
            .ok_or_else(|| corrupt("document", "ingested_at out of range"))?,
    })
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<String> {
    serde_json::to_string(value)
        .map_err(|e| CopilotError::IndexUnavailable(format!("serialize failed: {}", e)))
}

#[async_trait]
impl VectorIndex for SqliteIndex {
    async fn insert(&self, chunk: &Chunk, vector: &[f32]) -> Result<()> {
        let mut staged = self.staged()?;
        let entries = staged.entry(chunk.document_id.clone()).or_default();
        entries.retain(|(c, _)| c.id != chunk.id);
        entries.push((chunk.clone(), vector.to_vec()));
        Ok(())
    }

    async fn commit(&self, document: &DocumentSummary) -> Result<()> {
        let entries = self.staged()?.remove(&document.id);
        let entries = match entries {
            Some(entries) => entries,
            None => {
                return match self.get_document(&document.id).await? {
                    Some(_) => Ok(()),
                    None => Err(CopilotError::NotFound(format!(
                        "no staged chunks for document {}",
                        document.id
                    ))),
                }
            }
        };

        let mut tx = self.pool.begin().await.map_err(unavailable)?;

        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(&document.id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

        sqlx::query(
            r#"
            INSERT INTO documents (id, title, format, page_count, chunk_count, skipped_chunks,
                embedding_model, ingested_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                title = excluded.title,
                format = excluded.format,
                page_count = excluded.page_count,
                chunk_count = excluded.chunk_count,
                skipped_chunks = excluded.skipped_chunks,
                embedding_model = excluded.embedding_model,
                ingested_at = excluded.ingested_at
            "#,
        )
        .bind(&document.id)
        .bind(&document.title)
        .bind(document.format.as_str())
        .bind(document.page_count as i64)
        .bind(document.chunk_count as i64)
        .bind(document.skipped_chunks as i64)
        .bind(&document.embedding_model)
        .bind(document.ingested_at.timestamp_millis())
        .execute(&mut *tx)
        .await
        .map_err(unavailable)?;

        for (chunk, vector) in &entries {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, position, text, token_count, page_start, page_end,
                    start_offset, end_offset, start_in_page, end_in_page,
                    page_spans_json, overlap_prev_json, overlap_next_json, hash)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.position as i64)
            .bind(&chunk.text)
            .bind(chunk.token_count as i64)
            .bind(chunk.page_start as i64)
            .bind(chunk.page_end as i64)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(chunk.start_in_page as i64)
            .bind(chunk.end_in_page as i64)
            .bind(to_json(&chunk.page_spans)?)
            .bind(chunk.overlap_prev.as_ref().map(to_json).transpose()?)
            .bind(chunk.overlap_next.as_ref().map(to_json).transpose()?)
            .bind(&chunk.hash)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;

            sqlx::query(
                "INSERT INTO chunk_vectors (chunk_id, document_id, model, dims, embedding) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(&document.embedding_model)
            .bind(vector.len() as i64)
            .bind(vec_to_blob(vector))
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        }

        tx.commit().await.map_err(unavailable)?;
        debug!(document_id = %document.id, chunks = entries.len(), "committed document");
        Ok(())
    }

    async fn abort(&self, document_id: &str) -> Result<()> {
        self.staged()?.remove(document_id);
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        scope: Option<&[String]>,
    ) -> Result<Vec<IndexHit>> {
        let rows = match scope {
            Some([]) => return Ok(vec![]),
            Some(ids) => {
                let placeholders = vec!["?"; ids.len()].join(", ");
                let sql = format!(
                    "SELECT chunk_id, document_id, embedding FROM chunk_vectors WHERE document_id IN ({})",
                    placeholders
                );
                let mut q = sqlx::query(&sql);
                for id in ids {
                    q = q.bind(id);
                }
                q.fetch_all(&self.pool).await.map_err(unavailable)?
            }
            None => sqlx::query("SELECT chunk_id, document_id, embedding FROM chunk_vectors")
                .fetch_all(&self.pool)
                .await
                .map_err(unavailable)?,
        };

        let mut hits: Vec<IndexHit> = rows
            .iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("embedding");
                IndexHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    similarity: cosine_similarity(vector, &blob_to_vec(&blob)) as f64,
                }
            })
            .collect();
        sort_hits(&mut hits);
        hits.truncate(k);
        Ok(hits)
    }

    async fn get_chunk(&self, chunk_id: &str) -> Result<Option<Chunk>> {
        let row = sqlx::query("SELECT * FROM chunks WHERE id = ?")
            .bind(chunk_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.as_ref().map(row_to_chunk).transpose()
    }

    async fn get_document(&self, document_id: &str) -> Result<Option<DocumentSummary>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?")
            .bind(document_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(unavailable)?;
        row.as_ref().map(row_to_document).transpose()
    }

    async fn list_documents(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query("SELECT * FROM documents ORDER BY ingested_at ASC, id ASC")
            .fetch_all(&self.pool)
            .await
            .map_err(unavailable)?;
        rows.iter().map(row_to_document).collect()
    }

    async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.staged()?.remove(document_id);

        let mut tx = self.pool.begin().await.map_err(unavailable)?;
        sqlx::query("DELETE FROM chunk_vectors WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?;
        let deleted = sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(document_id)
            .execute(&mut *tx)
            .await
            .map_err(unavailable)?
            .rows_affected();
        tx.commit().await.map_err(unavailable)?;

        Ok(deleted > 0)
    }
}
