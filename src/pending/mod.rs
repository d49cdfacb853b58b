//! Pending-question lifecycle.
//!
//! Questions the retrieval pipeline could not answer queue here for a
//! human. An administrator's answer is materialized as a synthetic
//! document (`"pending-answer-<question_id>"`) whose chunks flow through
//! the regular ingest path, so answered questions become first-class
//! retrievable knowledge rather than a side cache.
//!
//! Duplicate detection over open questions runs purely in-process on
//! bigram jaccard; it never costs an embedding call.

mod error;


pub use error::{PendingError, PendingResult};

use chrono::{DateTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqlitePool;
use tracing::{debug, info, instrument, warn};

use crate::constants::{
    IMAGE_CHUNK_INDEX_BASE, MAX_ANSWER_IMAGES, MAX_IMAGE_BASE64_BYTES, MAX_QUESTION_CHARS,
    PENDING_DEDUP_THRESHOLD, PENDING_DEDUP_WINDOW, SUMMARY_MAX_CHARS, pending_answer_doc_id,
};
use crate::providers::{EmbeddingService, LlmService, TextChunker};
use crate::search::SearchEngine;
use crate::store::{ChunkRecord, DocumentRecord};
use crate::text::{bigram_similarity, truncate_chars};

/// Summary instruction for step 6 of the answer flow.
const SUMMARY_PROMPT: &str = "Summarize the following customer-support answer in at most 100 \
characters, in the same language as the answer. Reply with the summary only.";

/// Display names of synthetic answer documents truncate the question here.
const ANSWER_DOC_NAME_CHARS: usize = 50;

/// Lifecycle state of a pending question.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingStatus {
    Pending,
    Answered,
}

impl PendingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Answered => "answered",
        }
    }

    /// Strict parse for status filters.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "answered" => Some(Self::Answered),
            _ => None,
        }
    }
}

/// A row of the pending_questions table.
#[derive(Debug, Clone)]
pub struct PendingQuestion {
    pub id: String,
    pub question: String,
    pub user_id: String,
    pub status: PendingStatus,
    /// Administrator's full answer text.
    pub answer: Option<String>,
    /// Model-generated short summary, what Tier-1 serves.
    pub llm_answer: Option<String>,
    /// Image attached by the asking user, as a data URL.
    pub image_data: Option<String>,
    pub partition: String,
    pub created_at: DateTime<Utc>,
    pub answered_at: Option<DateTime<Utc>>,
}

/// An administrator answering (or editing the answer of) a question.
#[derive(Debug, Clone, Default)]
pub struct AnswerRequest {
    pub question_id: String,
    pub answer: String,
    /// Image URLs illustrating the answer, at most
    /// [`MAX_ANSWER_IMAGES`].
    pub image_urls: Vec<String>,
    /// Re-answer an already answered question, tearing down the previous
    /// synthetic document first.
    pub is_edit: bool,
}

/// Store for human-review questions.
#[derive(Debug, Clone)]
pub struct PendingStore {
    pool: SqlitePool,
}

impl PendingStore {
    /// Wraps a pool. The table is created by [`crate::store::ChunkStore::new`],
    /// which shares the same pool.
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Queues a question for human response with a fresh 128-bit hex id.
    #[instrument(skip(self, question, image_data), fields(question_len = question.len(), partition))]
    pub async fn create(
        &self,
        question: &str,
        user_id: &str,
        image_data: Option<&str>,
        partition: &str,
    ) -> PendingResult<PendingQuestion> {
        let question_chars = question.chars().count();
        if question_chars > MAX_QUESTION_CHARS {
            return Err(PendingError::QuestionTooLong {
                len: question_chars,
                max: MAX_QUESTION_CHARS,
            });
        }
        if let Some(image) = image_data {
            if image.len() > MAX_IMAGE_BASE64_BYTES {
                return Err(PendingError::ImageTooLarge {
                    bytes: image.len(),
                    max: MAX_IMAGE_BASE64_BYTES,
                });
            }
        }

        let row = PendingQuestion {
            id: uuid::Uuid::new_v4().simple().to_string(),
            question: question.to_string(),
            user_id: user_id.to_string(),
            status: PendingStatus::Pending,
            answer: None,
            llm_answer: None,
            image_data: image_data.map(str::to_string),
            partition: partition.to_string(),
            created_at: Utc::now(),
            answered_at: None,
        };

        sqlx::query(
            r#"
            INSERT INTO pending_questions (id, question, user_id, status, answer,
                                           llm_answer, image_data, product_id,
                                           created_at, answered_at)
            VALUES (?, ?, ?, ?, NULL, NULL, ?, ?, ?, NULL)
            "#,
        )
        .bind(&row.id)
        .bind(&row.question)
        .bind(&row.user_id)
        .bind(row.status.as_str())
        .bind(&row.image_data)
        .bind(&row.partition)
        .bind(row.created_at)
        .execute(&self.pool)
        .await?;

        info!(id = %row.id, "pending question created");
        Ok(row)
    }

    /// Fetches one question by id.
    pub async fn get(&self, id: &str) -> PendingResult<Option<PendingQuestion>> {
        let row = sqlx::query(
            "SELECT id, question, user_id, status, answer, llm_answer, image_data, \
             product_id, created_at, answered_at FROM pending_questions WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(pending_from_row).transpose()
    }

    /// Lists questions, newest first, optionally filtered by status and by
    /// partition (a partition filter always includes the shared library).
    pub async fn list(
        &self,
        status: Option<&str>,
        partition: Option<&str>,
    ) -> PendingResult<Vec<PendingQuestion>> {
        let status = status
            .map(|s| {
                PendingStatus::parse(s).ok_or_else(|| PendingError::InvalidStatusFilter {
                    value: s.to_string(),
                })
            })
            .transpose()?;

        let mut sql = String::from(
            "SELECT id, question, user_id, status, answer, llm_answer, image_data, \
             product_id, created_at, answered_at FROM pending_questions WHERE 1=1",
        );
        if status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if partition.is_some() {
            sql.push_str(" AND (product_id = ? OR product_id = '')");
        }
        sql.push_str(" ORDER BY created_at DESC");

        let mut query = sqlx::query(&sql);
        if let Some(status) = status {
            query = query.bind(status.as_str());
        }
        if let Some(partition) = partition {
            query = query.bind(partition);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(pending_from_row).collect()
    }

    /// Deletes a question; for an answered one, the synthetic answer
    /// document and its chunks go with it.
    #[instrument(skip(self, search))]
    pub async fn delete(&self, id: &str, search: &SearchEngine) -> PendingResult<()> {
        let row = self
            .get(id)
            .await?
            .ok_or_else(|| PendingError::NotFound { id: id.to_string() })?;

        if row.status == PendingStatus::Answered {
            let doc_id = pending_answer_doc_id(id);
            search.delete_by_doc_id(&doc_id).await?;
            search.chunk_store().delete_document(&doc_id).await?;
            debug!(%doc_id, "synthetic answer document removed");
        }

        sqlx::query("DELETE FROM pending_questions WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Scans the newest open questions for a near-duplicate of `question`
    /// by bigram jaccard. Purely in-process.
    pub async fn find_similar(
        &self,
        question: &str,
        partition: &str,
    ) -> PendingResult<Option<PendingQuestion>> {
        let rows = sqlx::query(
            "SELECT id, question, user_id, status, answer, llm_answer, image_data, \
             product_id, created_at, answered_at FROM pending_questions \
             WHERE status = 'pending' AND (product_id = ? OR product_id = '') \
             ORDER BY created_at DESC LIMIT ?",
        )
        .bind(partition)
        .bind(PENDING_DEDUP_WINDOW)
        .fetch_all(&self.pool)
        .await?;

        for row in &rows {
            let candidate = pending_from_row(row)?;
            let similarity = bigram_similarity(question, &candidate.question);
            if similarity >= PENDING_DEDUP_THRESHOLD {
                debug!(id = %candidate.id, similarity, "similar open question found");
                return Ok(Some(candidate));
            }
        }
        Ok(None)
    }

    /// Answers a question and materializes the answer as indexed knowledge.
    ///
    /// Step order matters: the answer text persists before chunking, the
    /// synthetic document and chunks are indexed before the summary, and
    /// only then does the row flip to `answered`. An embedding failure
    /// aborts; already-written rows are cleaned up by the next delete.
    /// A summary failure never aborts (the raw answer is truncated
    /// instead), and per-image failures are logged and skipped.
    #[instrument(skip_all, fields(question_id = %request.question_id, is_edit = request.is_edit))]
    pub async fn answer<E, L>(
        &self,
        request: &AnswerRequest,
        chunker: &dyn TextChunker,
        embedding: &E,
        llm: &L,
        search: &SearchEngine,
    ) -> PendingResult<()>
    where
        E: EmbeddingService,
        L: LlmService,
    {
        let row = self
            .get(&request.question_id)
            .await?
            .ok_or_else(|| PendingError::NotFound {
                id: request.question_id.clone(),
            })?;

        if row.status == PendingStatus::Answered && !request.is_edit {
            return Err(PendingError::AlreadyAnswered {
                id: request.question_id.clone(),
            });
        }
        if request.image_urls.len() > MAX_ANSWER_IMAGES {
            return Err(PendingError::TooManyImages {
                count: request.image_urls.len(),
                max: MAX_ANSWER_IMAGES,
            });
        }

        let doc_id = pending_answer_doc_id(&request.question_id);

        if request.is_edit && row.status == PendingStatus::Answered {
            search.delete_by_doc_id(&doc_id).await?;
            search.chunk_store().delete_document(&doc_id).await?;
            debug!(%doc_id, "previous synthetic answer document torn down for edit");
        }

        sqlx::query("UPDATE pending_questions SET answer = ? WHERE id = ?")
            .bind(&request.answer)
            .bind(&request.question_id)
            .execute(&self.pool)
            .await?;

        if !request.answer.trim().is_empty() {
            self.index_answer(&row, request, &doc_id, chunker, embedding, search)
                .await?;
        }

        let summary = match llm.generate(SUMMARY_PROMPT, &[], &request.answer).await {
            Ok(s) if !s.trim().is_empty() => truncate_chars(s.trim(), SUMMARY_MAX_CHARS),
            Ok(_) => truncate_chars(&request.answer, SUMMARY_MAX_CHARS),
            Err(e) => {
                warn!(error = %e, "summary generation failed, truncating raw answer");
                truncate_chars(&request.answer, SUMMARY_MAX_CHARS)
            }
        };

        sqlx::query(
            "UPDATE pending_questions SET llm_answer = ?, status = 'answered', answered_at = ? \
             WHERE id = ?",
        )
        .bind(&summary)
        .bind(Utc::now())
        .bind(&request.question_id)
        .execute(&self.pool)
        .await?;

        info!(question_id = %request.question_id, "question answered and indexed");
        Ok(())
    }

    /// Steps 4 and 5 of the answer flow: text chunks, then image chunks
    /// sharing one caption embedding.
    async fn index_answer<E>(
        &self,
        row: &PendingQuestion,
        request: &AnswerRequest,
        doc_id: &str,
        chunker: &dyn TextChunker,
        embedding: &E,
        search: &SearchEngine,
    ) -> PendingResult<()>
    where
        E: EmbeddingService,
    {
        let combined = format!("{}\n{}", row.question, request.answer);
        let pieces = chunker.split(&combined, doc_id);
        let doc_name = truncate_chars(&row.question, ANSWER_DOC_NAME_CHARS);

        if !pieces.is_empty() {
            let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
            let vectors = embedding
                .embed_batch(&texts)
                .await
                .map_err(|e| PendingError::Embedding { source: e })?;

            let doc = DocumentRecord::new(doc_id, doc_name.clone(), "answer", row.partition.clone());
            search.chunk_store().insert_document(&doc).await?;

            let chunks: Vec<ChunkRecord> = pieces
                .iter()
                .zip(vectors)
                .map(|(piece, vector)| ChunkRecord {
                    document_id: doc_id.to_string(),
                    document_name: doc_name.clone(),
                    chunk_index: piece.index,
                    text: piece.text.clone(),
                    image_url: String::new(),
                    partition: row.partition.clone(),
                    embedding: vector,
                })
                .collect();
            search.store(doc_id, &chunks).await?;
        }

        if !request.image_urls.is_empty() {
            let caption = format!(
                "[图片回答: {}] {}",
                truncate_chars(&row.question, ANSWER_DOC_NAME_CHARS),
                request.answer
            );
            // One embedding shared by every image chunk.
            match embedding.embed(&caption).await {
                Ok(vector) => {
                    let image_chunks: Vec<ChunkRecord> = request
                        .image_urls
                        .iter()
                        .enumerate()
                        .map(|(i, url)| ChunkRecord {
                            document_id: doc_id.to_string(),
                            document_name: doc_name.clone(),
                            chunk_index: IMAGE_CHUNK_INDEX_BASE + i as i64,
                            text: caption.clone(),
                            image_url: url.clone(),
                            partition: row.partition.clone(),
                            embedding: vector.clone(),
                        })
                        .collect();
                    if let Err(e) = search.store(doc_id, &image_chunks).await {
                        warn!(error = %e, "storing answer image chunks failed, skipping");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "image caption embedding failed, skipping image chunks");
                }
            }
        }

        Ok(())
    }
}

fn pending_from_row(row: &sqlx::sqlite::SqliteRow) -> PendingResult<PendingQuestion> {
    let status: String = row.try_get("status")?;
    Ok(PendingQuestion {
        id: row.try_get("id")?,
        question: row.try_get("question")?,
        user_id: row.try_get("user_id")?,
        status: PendingStatus::parse(&status).unwrap_or(PendingStatus::Pending),
        answer: row.try_get("answer")?,
        llm_answer: row.try_get("llm_answer")?,
        image_data: row.try_get("image_data")?,
        partition: row.try_get("product_id")?,
        created_at: row.try_get("created_at")?,
        answered_at: row.try_get("answered_at")?,
    })
}
