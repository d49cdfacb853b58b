//! Three-tier query pipeline.
//!
//! Tier 0 routes intent (greeting / product / irrelevant) unless bypassed.
//! Tier 1 is a cheap lexical match that can serve a cached administrator
//! answer with zero external cost. Tier 2 embeds the question, retrieves,
//! optionally fuses an image-query search, falls back to a relaxed search,
//! and either synthesizes an answer or escalates to the pending queue.
//!
//! Every request takes exactly one read-locked snapshot of the
//! (embedding, generative, config) triple at entry; `update_services`
//! swaps the triple atomically and clears the per-provider embedding
//! cache.

mod detect;
mod error;
mod prompts;
mod types;

#[cfg(test)]
mod tests;

pub use detect::is_unable_to_answer;
pub use error::{EngineError, EngineResult};
pub use types::{DebugInfo, DebugResult, Intent, QueryRequest, QueryResponse, SourceRef};

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use moka::sync::Cache;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::config::Config;
use crate::constants::{
    EMBED_CACHE_CAPACITY, EMBED_CACHE_TTL_SECS, IMAGE_CHUNK_INDEX_BASE,
    IMAGE_FUSION_THRESHOLD_FLOOR, IMAGE_FUSION_THRESHOLD_SCALE, KNOWLEDGE_BASE_PRODUCT_TYPE,
    MAX_ANSWER_IMAGES, PENDING_ANSWER_DOC_PREFIX, RELAXED_MIN_SCORE, RELAXED_MIN_SCORE_IMAGE,
    RELAXED_TOP_K, SNIPPET_MAX_CHARS, STRONG_MATCH_THRESHOLD, TEXT_MATCH_THRESHOLD,
    TEXT_MATCH_TOP_K, TRANSLATE_TIMEOUT_SECS, TRANSLATION_CACHE_CAPACITY,
    TRANSLATION_CACHE_TTL_SECS,
};
use crate::pending::{AnswerRequest, PendingQuestion, PendingStore};
use crate::providers::{EmbeddingService, LlmService, TextChunker};
use crate::search::{SearchEngine, SearchResult, merge_results, rerank_by_priority};
use crate::store::{ChunkRecord, DocumentRecord};
use crate::text::{language_class, truncate_chars};
use prompts::{
    INTENT_PROMPT, PENDING_MESSAGE, RAG_SYSTEM_PROMPT, RAG_SYSTEM_PROMPT_WITH_IMAGE,
    REFUSAL_MESSAGE, TRANSLATE_PROMPT,
};
use types::parse_intent;

/// The provider triple swapped atomically by `update_services`.
struct Services<E, L> {
    embedding: Arc<E>,
    llm: Arc<L>,
    config: Arc<Config>,
}

impl<E, L> Clone for Services<E, L> {
    fn clone(&self) -> Self {
        Self {
            embedding: Arc::clone(&self.embedding),
            llm: Arc::clone(&self.llm),
            config: Arc::clone(&self.config),
        }
    }
}

/// The retrieval-augmented answer engine.
pub struct QueryEngine<E, L> {
    search: Arc<SearchEngine>,
    pending: Arc<PendingStore>,
    chunker: Arc<dyn TextChunker>,
    services: RwLock<Services<E, L>>,
    /// Question-text → vector. Per-provider: cleared on service swap.
    embed_cache: Cache<String, Arc<Vec<f32>>>,
    /// (language class, text) → translated text.
    translation_cache: Cache<String, String>,
}

impl<E, L> QueryEngine<E, L>
where
    E: EmbeddingService,
    L: LlmService,
{
    pub fn new(
        search: Arc<SearchEngine>,
        pending: Arc<PendingStore>,
        chunker: Arc<dyn TextChunker>,
        embedding: Arc<E>,
        llm: Arc<L>,
        config: Arc<Config>,
    ) -> Self {
        Self {
            search,
            pending,
            chunker,
            services: RwLock::new(Services {
                embedding,
                llm,
                config,
            }),
            embed_cache: Cache::builder()
                .max_capacity(EMBED_CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(EMBED_CACHE_TTL_SECS))
                .build(),
            translation_cache: Cache::builder()
                .max_capacity(TRANSLATION_CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(TRANSLATION_CACHE_TTL_SECS))
                .build(),
        }
    }

    /// Swaps the provider triple atomically.
    ///
    /// The embedding cache is keyed by text only, so it must not survive a
    /// provider change; it is cleared inside the write-lock critical
    /// section.
    pub async fn update_services(&self, embedding: Arc<E>, llm: Arc<L>, config: Arc<Config>) {
        let mut guard = self.services.write().await;
        *guard = Services {
            embedding,
            llm,
            config,
        };
        self.embed_cache.invalidate_all();
        info!("engine services swapped");
    }

    /// The retrieval engine, for ingest and admin surfaces.
    pub fn search_engine(&self) -> &SearchEngine {
        &self.search
    }

    /// The pending-question store, for admin surfaces.
    pub fn pending_store(&self) -> &PendingStore {
        &self.pending
    }

    /// Answers a user question through the tiered pipeline.
    #[instrument(skip(self, request), fields(question_len = request.question.len(), partition = %request.partition))]
    pub async fn query(&self, request: &QueryRequest) -> EngineResult<QueryResponse> {
        let services = self.services.read().await.clone();
        let config = Arc::clone(&services.config);

        let mut dbg = config.vector.debug_mode.then(|| DebugInfo {
            top_k: config.vector.top_k,
            threshold: config.vector.threshold,
            ..DebugInfo::default()
        });

        // Tier 0: intent routing, skipped for image queries and raw
        // knowledge-base products.
        if request.image_data.is_none() && request.product_type != KNOWLEDGE_BASE_PRODUCT_TYPE {
            if let Some(response) = self.route_intent(&services, request, &mut dbg).await? {
                return Ok(self.finish(response, dbg));
            }
        } else {
            note(&mut dbg, "intent routing bypassed");
        }

        // Tier 1: lexical match with cached-answer reuse.
        if config.vector.text_match_enabled {
            if let Some(response) = self.try_text_match(&services, request, &mut dbg).await? {
                return Ok(self.finish(response, dbg));
            }
        }

        // Tier 2: full retrieval and synthesis.
        let response = self.full_retrieval(&services, request, &mut dbg).await?;
        Ok(self.finish(response, dbg))
    }

    /// Tier 0. Returns a terminal response for greeting/irrelevant, `None`
    /// to fall through.
    async fn route_intent(
        &self,
        services: &Services<E, L>,
        request: &QueryRequest,
        dbg: &mut Option<DebugInfo>,
    ) -> EngineResult<Option<QueryResponse>> {
        let classified = match services
            .llm
            .generate(INTENT_PROMPT, &[], &request.question)
            .await
        {
            Ok(reply) => parse_intent(&reply),
            Err(e) => {
                warn!(error = %e, "intent classification failed, falling through");
                None
            }
        };

        let Some((intent, reason)) = classified else {
            note(dbg, "intent unparsable, treated as product");
            if let Some(d) = dbg.as_mut() {
                d.intent = Intent::Product.as_str().to_string();
            }
            return Ok(None);
        };

        if let Some(d) = dbg.as_mut() {
            d.intent = intent.as_str().to_string();
        }
        note(dbg, &format!("intent: {}", intent.as_str()));

        match intent {
            Intent::Greeting => {
                let answer = self
                    .translate(services, &services.config.product_intro, &request.question)
                    .await;
                Ok(Some(empty_response(answer, false)))
            }
            Intent::Irrelevant => {
                let base = match reason {
                    Some(r) if !r.is_empty() => format!("{REFUSAL_MESSAGE}（{r}）"),
                    _ => REFUSAL_MESSAGE.to_string(),
                };
                let answer = self.translate(services, &base, &request.question).await;
                Ok(Some(empty_response(answer, false)))
            }
            Intent::Product => Ok(None),
        }
    }

    /// Tier 1. Returns a terminal response when a strong lexical match
    /// leads to a cached administrator answer.
    async fn try_text_match(
        &self,
        services: &Services<E, L>,
        request: &QueryRequest,
        dbg: &mut Option<DebugInfo>,
    ) -> EngineResult<Option<QueryResponse>> {
        let hits = self
            .search
            .text_search(
                &request.question,
                TEXT_MATCH_TOP_K,
                TEXT_MATCH_THRESHOLD,
                &request.partition,
            )
            .await?;

        let Some(top) = hits.first() else {
            note(dbg, "text match: no hits");
            return Ok(None);
        };
        if top.score < STRONG_MATCH_THRESHOLD {
            note(dbg, "text match below strong threshold");
            return Ok(None);
        }

        // A direct hit on a synthetic answer document serves the cached
        // summary with zero external cost.
        if top.document_id.starts_with(PENDING_ANSWER_DOC_PREFIX) {
            if let Some(cached) = self.cached_answer_for(&top.document_id).await? {
                note(dbg, "text match served cached answer");
                debug!(document_id = %top.document_id, "tier-1 cached answer (zero cost)");
                let mut results = hits;
                self.search.enrich_video_times(&mut results).await;
                let sources = self.build_sources(&results).await?;
                return Ok(Some(answer_response(cached, sources)));
            }
            return Ok(None);
        }

        // Otherwise confirm with a vector search (embedding cost only).
        let query_vec = self.embed_cached(services, &request.question).await?;
        let vector_hits = self
            .search
            .search(
                &query_vec,
                services.config.vector.top_k,
                services.config.vector.threshold,
                &request.partition,
            )
            .await?;

        if let Some(vtop) = vector_hits.first() {
            if vtop.score >= STRONG_MATCH_THRESHOLD
                && vtop.document_id.starts_with(PENDING_ANSWER_DOC_PREFIX)
            {
                if let Some(cached) = self.cached_answer_for(&vtop.document_id).await? {
                    note(dbg, "vector confirmation served cached answer");
                    debug!(document_id = %vtop.document_id, "tier-1 cached answer (embedding cost)");
                    let mut results = vector_hits;
                    self.search.enrich_video_times(&mut results).await;
                    let sources = self.build_sources(&results).await?;
                    return Ok(Some(answer_response(cached, sources)));
                }
            }
        }

        note(dbg, "text match found no cached answer");
        Ok(None)
    }

    /// Tier 2.
    async fn full_retrieval(
        &self,
        services: &Services<E, L>,
        request: &QueryRequest,
        dbg: &mut Option<DebugInfo>,
    ) -> EngineResult<QueryResponse> {
        let config = &services.config;
        let query_vec = self.embed_cached(services, &request.question).await?;
        if let Some(d) = dbg.as_mut() {
            d.vector_dim = query_vec.len();
        }

        let mut results = self
            .search
            .search(
                &query_vec,
                config.vector.top_k,
                config.vector.threshold,
                &request.partition,
            )
            .await?;

        // Image-query fusion at a relaxed threshold.
        if let Some(image) = &request.image_data {
            match services.embedding.embed_image_url(image).await {
                Ok(image_vec) => {
                    let fusion_threshold = (config.vector.threshold
                        * IMAGE_FUSION_THRESHOLD_SCALE)
                        .max(IMAGE_FUSION_THRESHOLD_FLOOR);
                    let image_hits = self
                        .search
                        .search(
                            &image_vec,
                            config.vector.top_k,
                            fusion_threshold,
                            &request.partition,
                        )
                        .await?;
                    note(dbg, &format!("image fusion merged {} hits", image_hits.len()));
                    results = merge_results(results, image_hits, config.vector.top_k);
                }
                Err(e) => {
                    warn!(error = %e, "image embedding failed, text-only retrieval");
                    note(dbg, "image embedding failed");
                }
            }
        }

        // Relaxed fallback, then escalation to the pending queue.
        if results.is_empty() {
            let relaxed = self
                .search
                .search(&query_vec, RELAXED_TOP_K, 0.0, &request.partition)
                .await?;
            if let Some(d) = dbg.as_mut() {
                d.relaxed_search = true;
                d.relaxed_results = debug_results(&relaxed);
            }

            let floor = if request.image_data.is_some() {
                RELAXED_MIN_SCORE_IMAGE
            } else {
                RELAXED_MIN_SCORE
            };
            match relaxed.into_iter().next() {
                Some(first) if first.score >= floor => {
                    note(dbg, "relaxed search accepted best result");
                    results = vec![first];
                }
                _ => {
                    note(dbg, "retrieval empty, escalating to pending queue");
                    self.create_or_reuse_pending(request).await?;
                    let message = self.translate(services, PENDING_MESSAGE, &request.question).await;
                    return Ok(pending_response(message));
                }
            }
        }

        results = rerank_by_priority(results, config.vector.content_priority);
        self.search.enrich_video_times(&mut results).await;
        if let Some(d) = dbg.as_mut() {
            d.result_count = results.len();
            d.top_results = debug_results(&results);
        }

        // Synthesis.
        let any_image = results.iter().any(|r| !r.image_url.is_empty());
        let prompt = if any_image {
            RAG_SYSTEM_PROMPT_WITH_IMAGE
        } else {
            RAG_SYSTEM_PROMPT
        };
        let context: Vec<String> = results
            .iter()
            .map(|r| {
                if r.image_url.is_empty() {
                    r.text.clone()
                } else {
                    format!("{} (image attached)", r.text)
                }
            })
            .collect();

        let answer = match &request.image_data {
            Some(image) => {
                services
                    .llm
                    .generate_with_image(prompt, &context, &request.question, image)
                    .await?
            }
            None => services.llm.generate(prompt, &context, &request.question).await?,
        };

        let unable = is_unable_to_answer(&answer);
        if let Some(d) = dbg.as_mut() {
            d.llm_unable_answer = unable;
        }
        let mut is_pending = false;
        let mut message = String::new();
        if unable {
            note(dbg, "model declined, escalating to pending queue");
            self.create_or_reuse_pending(request).await?;
            is_pending = true;
            message = self.translate(services, PENDING_MESSAGE, &request.question).await;
        }

        let sources = self.build_sources(&results).await?;
        let allow_download = !is_pending && !sources.is_empty();
        Ok(QueryResponse {
            answer,
            sources,
            is_pending,
            allow_download,
            message,
            debug_info: None,
        })
    }

    /// Queues the question for a human unless a similar open question
    /// already exists. At most one new row per failed retrieval.
    async fn create_or_reuse_pending(&self, request: &QueryRequest) -> EngineResult<()> {
        if self
            .pending
            .find_similar(&request.question, &request.partition)
            .await?
            .is_none()
        {
            self.pending
                .create(
                    &request.question,
                    &request.user_id,
                    request.image_data.as_deref(),
                    &request.partition,
                )
                .await?;
        } else {
            debug!("similar open question exists, not queuing another");
        }
        Ok(())
    }

    /// Explicit user escalation: returns the existing similar open
    /// question or creates a new one.
    pub async fn create_pending_question(
        &self,
        question: &str,
        user_id: &str,
        image_data: Option<&str>,
        partition: &str,
    ) -> EngineResult<PendingQuestion> {
        if let Some(existing) = self.pending.find_similar(question, partition).await? {
            return Ok(existing);
        }
        Ok(self
            .pending
            .create(question, user_id, image_data, partition)
            .await?)
    }

    /// Lists pending questions, newest first, with optional status and
    /// partition filters.
    pub async fn list_pending(
        &self,
        status: Option<&str>,
        partition: Option<&str>,
    ) -> EngineResult<Vec<PendingQuestion>> {
        Ok(self.pending.list(status, partition).await?)
    }

    /// Deletes a pending question and, if answered, its synthetic answer
    /// document.
    pub async fn delete_pending(&self, id: &str) -> EngineResult<()> {
        Ok(self.pending.delete(id, &self.search).await?)
    }

    /// Answers a pending question with the current provider snapshot.
    pub async fn answer_question(&self, request: &AnswerRequest) -> EngineResult<()> {
        let services = self.services.read().await.clone();
        self.pending
            .answer(
                request,
                self.chunker.as_ref(),
                services.embedding.as_ref(),
                services.llm.as_ref(),
                &self.search,
            )
            .await?;
        Ok(())
    }

    /// Ingests a curated question/answer pair as a searchable document.
    ///
    /// Image URLs (at most [`MAX_ANSWER_IMAGES`]) become extra chunks at
    /// indices 1000+i sharing one caption embedding; per-image failures
    /// are logged and skipped. Returns the new document id.
    #[instrument(skip(self, question, answer, image_urls), fields(images = image_urls.len(), partition))]
    pub async fn add_knowledge(
        &self,
        question: &str,
        answer: &str,
        image_urls: &[String],
        partition: &str,
    ) -> EngineResult<String> {
        if image_urls.len() > MAX_ANSWER_IMAGES {
            return Err(EngineError::TooManyImages {
                count: image_urls.len(),
                max: MAX_ANSWER_IMAGES,
            });
        }

        let services = self.services.read().await.clone();
        let doc_id = uuid::Uuid::new_v4().simple().to_string();
        let doc_name = truncate_chars(question, 50);

        let combined = format!("问题：{question}\n回答：{answer}");
        let pieces = self.chunker.split(&combined, &doc_id);

        if !pieces.is_empty() {
            let texts: Vec<String> = pieces.iter().map(|p| p.text.clone()).collect();
            let vectors = services.embedding.embed_batch(&texts).await?;

            let doc = DocumentRecord::new(doc_id.as_str(), doc_name.as_str(), "qa", partition);
            self.search.chunk_store().insert_document(&doc).await?;

            let chunks: Vec<ChunkRecord> = pieces
                .iter()
                .zip(vectors)
                .map(|(piece, vector)| ChunkRecord {
                    document_id: doc_id.clone(),
                    document_name: doc_name.clone(),
                    chunk_index: piece.index,
                    text: piece.text.clone(),
                    image_url: String::new(),
                    partition: partition.to_string(),
                    embedding: vector,
                })
                .collect();
            self.search.store(&doc_id, &chunks).await?;
        }

        if !image_urls.is_empty() {
            let caption = format!("[图片回答: {}] {}", truncate_chars(question, 50), answer);
            match services.embedding.embed(&caption).await {
                Ok(vector) => {
                    let image_chunks: Vec<ChunkRecord> = image_urls
                        .iter()
                        .enumerate()
                        .map(|(i, url)| ChunkRecord {
                            document_id: doc_id.clone(),
                            document_name: doc_name.clone(),
                            chunk_index: IMAGE_CHUNK_INDEX_BASE + i as i64,
                            text: caption.clone(),
                            image_url: url.clone(),
                            partition: partition.to_string(),
                            embedding: vector.clone(),
                        })
                        .collect();
                    if let Err(e) = self.search.store(&doc_id, &image_chunks).await {
                        warn!(error = %e, "storing knowledge image chunks failed, skipping");
                    }
                }
                Err(e) => warn!(error = %e, "knowledge image embedding failed, skipping"),
            }
        }

        info!(%doc_id, "knowledge ingested");
        Ok(doc_id)
    }

    /// The cached administrator summary behind a synthetic answer
    /// document, if any.
    async fn cached_answer_for(&self, document_id: &str) -> EngineResult<Option<String>> {
        let Some(question_id) = document_id.strip_prefix(PENDING_ANSWER_DOC_PREFIX) else {
            return Ok(None);
        };
        let Some(row) = self.pending.get(question_id).await? else {
            return Ok(None);
        };
        Ok(row.llm_answer.filter(|s| !s.trim().is_empty()))
    }

    /// Embeds a question through the per-provider LRU cache.
    async fn embed_cached(
        &self,
        services: &Services<E, L>,
        text: &str,
    ) -> EngineResult<Vec<f32>> {
        if let Some(hit) = self.embed_cache.get(text) {
            return Ok(hit.as_ref().clone());
        }
        let vector = services.embedding.embed(text).await?;
        self.embed_cache
            .insert(text.to_string(), Arc::new(vector.clone()));
        Ok(vector)
    }

    /// Translates a canned string into the language of the user's
    /// question, with a timeout falling back to the original.
    async fn translate(&self, services: &Services<E, L>, text: &str, question: &str) -> String {
        let key = format!("{}\x00{}", language_class(question), text);
        if let Some(hit) = self.translation_cache.get(&key) {
            return hit;
        }

        let translation = tokio::time::timeout(
            Duration::from_secs(TRANSLATE_TIMEOUT_SECS),
            services
                .llm
                .generate(TRANSLATE_PROMPT, &[text.to_string()], question),
        )
        .await;

        match translation {
            Ok(Ok(translated)) if !translated.trim().is_empty() => {
                let translated = translated.trim().to_string();
                self.translation_cache.insert(key, translated.clone());
                translated
            }
            Ok(Err(e)) => {
                warn!(error = %e, "translation failed, using original text");
                text.to_string()
            }
            _ => {
                warn!("translation timed out, using original text");
                text.to_string()
            }
        }
    }

    /// Builds source references: one per retrieval result, plus (when the
    /// result set itself carries no images) any images belonging to the
    /// same documents, found with one batched query.
    async fn build_sources(&self, results: &[SearchResult]) -> EngineResult<Vec<SourceRef>> {
        if results.is_empty() {
            return Ok(Vec::new());
        }

        let mut doc_ids: Vec<String> = Vec::new();
        let mut seen_docs = HashSet::new();
        for r in results {
            if seen_docs.insert(r.document_id.clone()) {
                doc_ids.push(r.document_id.clone());
            }
        }
        let docs = self.search.chunk_store().documents_by_ids(&doc_ids).await?;
        let doc_type = |id: &str| {
            docs.get(id)
                .map(|d| d.doc_type.clone())
                .unwrap_or_default()
        };

        let mut sources: Vec<SourceRef> = results
            .iter()
            .map(|r| SourceRef {
                document_id: r.document_id.clone(),
                document_name: r.document_name.clone(),
                document_type: doc_type(&r.document_id),
                chunk_index: r.chunk_index,
                snippet: truncate_chars(&r.text, SNIPPET_MAX_CHARS),
                image_url: r.image_url.clone(),
                start_time: r.start_time,
                end_time: r.end_time,
            })
            .collect();

        // Supplemental images, only when the primary set has none.
        if !results.iter().any(|r| !r.image_url.is_empty()) {
            let in_results: HashSet<(String, i64)> = results
                .iter()
                .map(|r| (r.document_id.clone(), r.chunk_index))
                .collect();
            let images = self
                .search
                .chunk_store()
                .images_for_documents(&doc_ids)
                .await?;
            for image in images {
                if in_results.contains(&(image.document_id.clone(), image.chunk_index)) {
                    continue;
                }
                sources.push(SourceRef {
                    document_type: doc_type(&image.document_id),
                    document_id: image.document_id,
                    document_name: image.document_name,
                    chunk_index: image.chunk_index,
                    snippet: truncate_chars(&image.text, SNIPPET_MAX_CHARS),
                    image_url: image.image_url,
                    start_time: None,
                    end_time: None,
                });
            }
        }

        Ok(sources)
    }

    fn finish(&self, mut response: QueryResponse, dbg: Option<DebugInfo>) -> QueryResponse {
        response.debug_info = dbg;
        response
    }
}

fn note(dbg: &mut Option<DebugInfo>, step: &str) {
    if let Some(d) = dbg.as_mut() {
        d.steps.push(step.to_string());
    }
}

fn debug_results(results: &[SearchResult]) -> Vec<DebugResult> {
    results
        .iter()
        .map(|r| DebugResult {
            document_id: r.document_id.clone(),
            score: r.score,
            snippet: truncate_chars(&r.text, 50),
        })
        .collect()
}

fn empty_response(answer: String, is_pending: bool) -> QueryResponse {
    QueryResponse {
        answer,
        sources: Vec::new(),
        is_pending,
        allow_download: false,
        message: String::new(),
        debug_info: None,
    }
}

fn answer_response(answer: String, sources: Vec<SourceRef>) -> QueryResponse {
    let allow_download = !sources.is_empty();
    QueryResponse {
        answer,
        sources,
        is_pending: false,
        allow_download,
        message: String::new(),
        debug_info: None,
    }
}

fn pending_response(message: String) -> QueryResponse {
    QueryResponse {
        answer: String::new(),
        sources: Vec::new(),
        is_pending: true,
        allow_download: false,
        message,
        debug_info: None,
    }
}
