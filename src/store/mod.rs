//! Durable chunk, document, and video-segment persistence.
//!
//! A thin sqlx/SQLite layer. Writes serialize on the pool's connections;
//! read paths for retrieval surface through the hot index, which loads the
//! whole chunk table once and mirrors mutations (see [`crate::index`]).

mod error;


pub use error::{StoreError, StoreResult};

use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use tracing::{debug, instrument};

use crate::constants::chunk_id;
use crate::vector;

/// A chunk as handed to [`ChunkStore::store_chunks`].
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// Owning document id.
    pub document_id: String,
    /// Display name of the owning document.
    pub document_name: String,
    /// Position of this chunk within the document.
    pub chunk_index: i64,
    /// Chunk text; non-empty by contract.
    pub text: String,
    /// Optional image URL; empty string when absent.
    pub image_url: String,
    /// Partition (tenant) id; empty string is the public/shared library.
    pub partition: String,
    /// Dense embedding.
    pub embedding: Vec<f32>,
}

/// A chunk row as loaded for the hot index, embedding still serialized.
#[derive(Debug, Clone)]
pub struct StoredChunk {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub image_url: String,
    pub partition: String,
    /// Serialized embedding bytes (either on-disk format).
    pub embedding: Vec<u8>,
}

/// Ingest status of a document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentStatus {
    Success,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "failed" => Self::Failed,
            _ => Self::Success,
        }
    }
}

/// A row of the documents table.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    pub id: String,
    pub name: String,
    pub doc_type: String,
    pub status: DocumentStatus,
    pub error: Option<String>,
    pub partition: String,
    pub content_hash: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl DocumentRecord {
    /// A freshly ingested document with status `success`.
    pub fn new(id: impl Into<String>, name: impl Into<String>, doc_type: impl Into<String>, partition: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            doc_type: doc_type.into(),
            status: DocumentStatus::Success,
            error: None,
            partition: partition.into(),
            content_hash: None,
            created_at: Utc::now(),
        }
    }
}

/// Kind of a video segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SegmentType {
    Transcript,
    Keyframe,
}

impl SegmentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Transcript => "transcript",
            Self::Keyframe => "keyframe",
        }
    }
}

/// A row of the video_segments table.
#[derive(Debug, Clone)]
pub struct VideoSegment {
    pub id: String,
    pub document_id: String,
    pub segment_type: SegmentType,
    pub start_time: f64,
    pub end_time: f64,
    pub content: String,
    /// External chunk id this segment maps to (`"<doc>-<index>"`).
    pub chunk_id: String,
}

/// A chunk row carrying an image, as returned by the supplemental-image
/// lookup of the source builder.
#[derive(Debug, Clone)]
pub struct ImageChunkRow {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub image_url: String,
}

/// Opens (or creates) a file-backed database with WAL journaling.
pub async fn connect(db_path: &Path) -> StoreResult<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| StoreError::Connect {
            path: db_path.display().to_string(),
            source: sqlx::Error::Io(e),
        })?;
    }

    let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
        .map_err(|e| StoreError::Connect {
            path: db_path.display().to_string(),
            source: e,
        })?
        .create_if_missing(true)
        .foreign_keys(false)
        .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

    SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Connect {
            path: db_path.display().to_string(),
            source: e,
        })
}

/// Opens an in-memory database.
///
/// Capped at one connection: each SQLite in-memory connection is its own
/// database, so a wider pool would fracture the store.
pub async fn connect_in_memory() -> StoreResult<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .map_err(|e| StoreError::Connect {
            path: ":memory:".to_string(),
            source: e,
        })?
        .foreign_keys(false);

    SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .map_err(|e| StoreError::Connect {
            path: ":memory:".to_string(),
            source: e,
        })
}

/// SQLite persistence for chunks, documents, and video segments.
#[derive(Debug, Clone)]
pub struct ChunkStore {
    pool: SqlitePool,
}

impl ChunkStore {
    /// Wraps a pool and ensures the schema exists.
    pub async fn new(pool: SqlitePool) -> StoreResult<Self> {
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    /// Underlying pool, shared with the pending store.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn init_schema(&self) -> StoreResult<()> {
        for statement in SCHEMA {
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .map_err(|e| StoreError::Schema { source: e })?;
        }
        Ok(())
    }

    /// Inserts a chunk batch for one document in a single transaction.
    ///
    /// Each row gets the synthetic id `"<document_id>-<chunk_index>"`. Any
    /// row failure rolls back the whole batch.
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    pub async fn store_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> StoreResult<()> {
        let wrap = |source| StoreError::StoreChunks {
            document_id: document_id.to_string(),
            source,
        };

        let mut tx = self.pool.begin().await.map_err(wrap)?;
        let now = Utc::now();

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (id, document_id, document_name, chunk_index,
                                    chunk_text, embedding, image_url, product_id, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(chunk_id(document_id, chunk.chunk_index))
            .bind(document_id)
            .bind(&chunk.document_name)
            .bind(chunk.chunk_index)
            .bind(&chunk.text)
            .bind(vector::encode(&chunk.embedding))
            .bind(&chunk.image_url)
            .bind(&chunk.partition)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(wrap)?;
        }

        tx.commit().await.map_err(wrap)?;
        debug!(document_id, count = chunks.len(), "chunk batch committed");
        Ok(())
    }

    /// Deletes all chunks of a document. Silently succeeds when none match.
    pub async fn delete_chunks_by_doc(&self, document_id: &str) -> StoreResult<u64> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(document_id)
            .execute(&self.pool)
            .await
            .map_err(|e| StoreError::DeleteChunks {
                document_id: document_id.to_string(),
                source: e,
            })?;
        Ok(result.rows_affected())
    }

    /// Loads the entire chunk table for the hot index, oldest first.
    pub async fn load_all_chunks(&self) -> StoreResult<Vec<StoredChunk>> {
        let rows = sqlx::query(
            r#"
            SELECT document_id, document_name, chunk_index, chunk_text,
                   embedding, image_url, product_id
            FROM chunks
            ORDER BY created_at, id
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| StoreError::LoadChunks { source: e })?;

        rows.iter()
            .map(|row| {
                Ok(StoredChunk {
                    document_id: row.try_get("document_id")?,
                    document_name: row.try_get("document_name")?,
                    chunk_index: row.try_get("chunk_index")?,
                    text: row.try_get("chunk_text")?,
                    image_url: row.try_get("image_url")?,
                    partition: row.try_get("product_id")?,
                    embedding: row.try_get("embedding")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(|e| StoreError::LoadChunks { source: e })
    }

    /// Inserts or replaces a document row.
    pub async fn insert_document(&self, doc: &DocumentRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT OR REPLACE INTO documents (id, name, type, status, error,
                                              product_id, content_hash, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&doc.id)
        .bind(&doc.name)
        .bind(&doc.doc_type)
        .bind(doc.status.as_str())
        .bind(&doc.error)
        .bind(&doc.partition)
        .bind(&doc.content_hash)
        .bind(doc.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Deletes a document row. Chunk cleanup is the caller's concern.
    pub async fn delete_document(&self, id: &str) -> StoreResult<()> {
        sqlx::query("DELETE FROM documents WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Batched document lookup, one `IN (…)` query.
    pub async fn documents_by_ids(
        &self,
        ids: &[String],
    ) -> StoreResult<HashMap<String, DocumentRecord>> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = placeholder_list(ids.len());
        let sql = format!(
            "SELECT id, name, type, status, error, product_id, content_hash, created_at \
             FROM documents WHERE id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql);
        for id in ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let doc = document_from_row(row)?;
            map.insert(doc.id.clone(), doc);
        }
        Ok(map)
    }

    /// Lists documents, newest first, optionally scoped to a partition
    /// (which always includes the shared library).
    pub async fn list_documents(&self, partition: Option<&str>) -> StoreResult<Vec<DocumentRecord>> {
        let rows = match partition {
            Some(p) => {
                sqlx::query(
                    "SELECT id, name, type, status, error, product_id, content_hash, created_at \
                     FROM documents WHERE product_id = ? OR product_id = '' \
                     ORDER BY created_at DESC",
                )
                .bind(p)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(
                    "SELECT id, name, type, status, error, product_id, content_hash, created_at \
                     FROM documents ORDER BY created_at DESC",
                )
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(document_from_row).collect()
    }

    /// Inserts a video segment row.
    pub async fn insert_video_segment(&self, segment: &VideoSegment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO video_segments (id, document_id, segment_type, start_time,
                                        end_time, content, chunk_id)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&segment.id)
        .bind(&segment.document_id)
        .bind(segment.segment_type.as_str())
        .bind(segment.start_time)
        .bind(segment.end_time)
        .bind(&segment.content)
        .bind(&segment.chunk_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Batched time-range lookup for search-result enrichment: external
    /// chunk id → (start, end) of its video segment.
    pub async fn video_ranges_for_chunk_ids(
        &self,
        chunk_ids: &[String],
    ) -> StoreResult<HashMap<String, (f64, f64)>> {
        if chunk_ids.is_empty() {
            return Ok(HashMap::new());
        }

        let placeholders = placeholder_list(chunk_ids.len());
        let sql = format!(
            "SELECT chunk_id, start_time, end_time FROM video_segments \
             WHERE chunk_id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql);
        for id in chunk_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        let mut map = HashMap::with_capacity(rows.len());
        for row in &rows {
            let chunk_id: String = row.try_get("chunk_id")?;
            let start: f64 = row.try_get("start_time")?;
            let end: f64 = row.try_get("end_time")?;
            map.insert(chunk_id, (start, end));
        }
        Ok(map)
    }

    /// All image-carrying chunks of the given documents, one `IN (…)` query.
    pub async fn images_for_documents(
        &self,
        document_ids: &[String],
    ) -> StoreResult<Vec<ImageChunkRow>> {
        if document_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = placeholder_list(document_ids.len());
        let sql = format!(
            "SELECT document_id, document_name, chunk_index, chunk_text, image_url \
             FROM chunks WHERE image_url != '' AND document_id IN ({placeholders}) \
             ORDER BY document_id, chunk_index"
        );

        let mut query = sqlx::query(&sql);
        for id in document_ids {
            query = query.bind(id);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| {
                Ok(ImageChunkRow {
                    document_id: row.try_get("document_id")?,
                    document_name: row.try_get("document_name")?,
                    chunk_index: row.try_get("chunk_index")?,
                    text: row.try_get("chunk_text")?,
                    image_url: row.try_get("image_url")?,
                })
            })
            .collect::<Result<Vec<_>, sqlx::Error>>()
            .map_err(StoreError::from)
    }
}

fn document_from_row(row: &sqlx::sqlite::SqliteRow) -> StoreResult<DocumentRecord> {
    let status: String = row.try_get("status")?;
    Ok(DocumentRecord {
        id: row.try_get("id")?,
        name: row.try_get("name")?,
        doc_type: row.try_get("type")?,
        status: DocumentStatus::parse(&status),
        error: row.try_get("error")?,
        partition: row.try_get("product_id")?,
        content_hash: row.try_get("content_hash")?,
        created_at: row.try_get("created_at")?,
    })
}

fn placeholder_list(n: usize) -> String {
    let mut s = String::with_capacity(n * 2);
    for i in 0..n {
        if i > 0 {
            s.push(',');
        }
        s.push('?');
    }
    s
}

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS documents (
        id TEXT PRIMARY KEY,
        name TEXT NOT NULL DEFAULT '',
        type TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'success',
        error TEXT,
        product_id TEXT NOT NULL DEFAULT '',
        content_hash TEXT,
        created_at TIMESTAMP NOT NULL
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS chunks (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id),
        document_name TEXT NOT NULL DEFAULT '',
        chunk_index INTEGER NOT NULL,
        chunk_text TEXT NOT NULL,
        embedding BLOB NOT NULL,
        image_url TEXT NOT NULL DEFAULT '',
        product_id TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_chunks_document_id ON chunks(document_id)",
    "CREATE INDEX IF NOT EXISTS idx_chunks_product_id ON chunks(product_id)",
    r#"
    CREATE TABLE IF NOT EXISTS video_segments (
        id TEXT PRIMARY KEY,
        document_id TEXT NOT NULL REFERENCES documents(id),
        segment_type TEXT NOT NULL,
        start_time REAL NOT NULL DEFAULT 0,
        end_time REAL NOT NULL DEFAULT 0,
        content TEXT NOT NULL DEFAULT '',
        chunk_id TEXT NOT NULL DEFAULT ''
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS pending_questions (
        id TEXT PRIMARY KEY,
        question TEXT NOT NULL,
        user_id TEXT NOT NULL DEFAULT '',
        status TEXT NOT NULL DEFAULT 'pending',
        answer TEXT,
        llm_answer TEXT,
        image_data TEXT,
        product_id TEXT NOT NULL DEFAULT '',
        created_at TIMESTAMP NOT NULL,
        answered_at TIMESTAMP
    )
    "#,
];
