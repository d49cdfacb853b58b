//! Parallel top-K similarity search over the hot index.
//!
//! Two scoring paths share one parallelization envelope: dense cosine
//! similarity (SIMD dot products against the arena) and lexical matching
//! (keyword overlap + bigram jaccard). Both partition the candidate index
//! slice into contiguous spans sized by the worker formula, keep a
//! per-span min-heap of capacity K, and merge the heaps at the end.
//!
//! Searches never hold the index lock while scoring: they snapshot the
//! `Arc` buffers under the read lock and compute lock-free. Ingest and
//! delete hold the write lock across the database transaction and the
//! in-memory update, which is what makes `Store` → `Search` read-your-writes
//! within a partition.

mod error;
mod topk;


pub use error::SearchError;

use std::collections::HashMap;

use rayon::prelude::*;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::config::ContentPriority;
use crate::constants::{ENTRIES_PER_WORKER, chunk_id};
use crate::index::{IndexSnapshot, IndexState, QueryCache, text_query_key, vector_query_key};
use crate::store::{ChunkRecord, ChunkStore};
use crate::text::{char_bigrams, keywords, text_score};
use crate::vector;
use topk::{Scored, TopK};

/// One retrieval hit.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SearchResult {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub image_url: String,
    pub partition: String,
    /// Similarity score, widened to f64 at the API boundary.
    pub score: f64,
    /// Video time range, filled by enrichment when the chunk maps to a
    /// transcript or keyframe segment.
    pub start_time: Option<f64>,
    pub end_time: Option<f64>,
}

/// The retrieval engine: durable chunk store plus its hot in-memory mirror.
pub struct SearchEngine {
    store: ChunkStore,
    index: RwLock<IndexState>,
    cache: QueryCache,
}

impl SearchEngine {
    /// Wraps a chunk store. The hot index loads lazily on first use.
    pub fn new(store: ChunkStore) -> Self {
        Self {
            store,
            index: RwLock::new(IndexState::new()),
            cache: QueryCache::new(),
        }
    }

    /// The underlying durable store, shared with the pending store and the
    /// engine's source builder.
    pub fn chunk_store(&self) -> &ChunkStore {
        &self.store
    }

    /// Top-K cosine search scoped to a partition (`""` searches everything;
    /// any other partition also sees the shared library).
    #[instrument(skip(self, query), fields(dim = query.len(), top_k, threshold, partition))]
    pub async fn search(
        &self,
        query: &[f32],
        top_k: usize,
        threshold: f32,
        partition: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let key = vector_query_key(query, top_k, threshold, partition);
        if let Some(cached) = self.cache.get(key) {
            debug!("query cache hit");
            return Ok(cached);
        }

        let snap = self.snapshot(partition).await?;
        if snap.indices.is_empty() {
            return Ok(Vec::new());
        }
        let inv_query = vector::inv_norm(query);
        if inv_query == 0.0 || query.len() != snap.dim {
            return Ok(Vec::new());
        }

        let scored = parallel_score(&snap.indices, top_k, |span| {
            let mut heap = TopK::new(top_k);
            for &entry in span {
                let i = entry as usize;
                let inv_norm = snap.inv_norms[i];
                if inv_norm == 0.0 {
                    continue;
                }
                let vec = &snap.arena[i * snap.dim..(i + 1) * snap.dim];
                let score = vector::dot(query, vec) * inv_query * inv_norm;
                if score >= threshold {
                    heap.push(Scored {
                        score: f64::from(score),
                        index: entry,
                    });
                }
            }
            heap
        });

        let results = self.materialize(&snap, scored);
        self.cache.put(key, &results);
        Ok(results)
    }

    /// Top-K lexical search with the same partition scoping and envelope
    /// as [`search`](Self::search). Zero external cost.
    #[instrument(skip(self, query), fields(query_len = query.len(), top_k, threshold, partition))]
    pub async fn text_search(
        &self,
        query: &str,
        top_k: usize,
        threshold: f32,
        partition: &str,
    ) -> Result<Vec<SearchResult>, SearchError> {
        let key = text_query_key(query, top_k, threshold, partition);
        if let Some(cached) = self.cache.get(key) {
            debug!("query cache hit");
            return Ok(cached);
        }

        let snap = self.snapshot(partition).await?;
        if snap.indices.is_empty() {
            return Ok(Vec::new());
        }

        let query_keywords = keywords(query);
        let query_bigrams = char_bigrams(&query.to_lowercase());
        let threshold = f64::from(threshold);

        let scored = parallel_score(&snap.indices, top_k, |span| {
            let mut heap = TopK::new(top_k);
            for &entry in span {
                let meta = &snap.meta[entry as usize];
                let score = text_score(
                    &query_keywords,
                    &query_bigrams,
                    &meta.lower_text,
                    &meta.bigrams,
                );
                if score >= threshold {
                    heap.push(Scored {
                        score,
                        index: entry,
                    });
                }
            }
            heap
        });

        let results = self.materialize(&snap, scored);
        self.cache.put(key, &results);
        Ok(results)
    }

    /// Persists a chunk batch and mirrors it into the hot index.
    ///
    /// Holds the index write lock across the database transaction, the
    /// in-place append, and the cache invalidation, so a search that
    /// observes the returned `Ok` also observes the new chunks.
    #[instrument(skip(self, chunks), fields(count = chunks.len()))]
    pub async fn store(
        &self,
        document_id: &str,
        chunks: &[ChunkRecord],
    ) -> Result<(), SearchError> {
        let mut guard = self.index.write().await;
        if !guard.loaded() {
            let rows = self.store.load_all_chunks().await?;
            guard.build(rows);
        }
        self.store.store_chunks(document_id, chunks).await?;
        guard.append(chunks);
        self.cache.invalidate_all();
        Ok(())
    }

    /// Deletes a document's chunks everywhere: rows, hot index (rebuilt),
    /// and query cache. Returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn delete_by_doc_id(&self, document_id: &str) -> Result<u64, SearchError> {
        let mut guard = self.index.write().await;
        let deleted = self.store.delete_chunks_by_doc(document_id).await?;
        if guard.loaded() {
            guard.remove_document(document_id);
        }
        self.cache.invalidate_all();
        Ok(deleted)
    }

    /// Fills video time ranges on results whose chunks map to segments.
    ///
    /// Enrichment failures degrade to un-enriched results; calling twice
    /// on the same list is idempotent.
    pub async fn enrich_video_times(&self, results: &mut [SearchResult]) {
        if results.is_empty() {
            return;
        }
        let ids: Vec<String> = results
            .iter()
            .map(|r| chunk_id(&r.document_id, r.chunk_index))
            .collect();
        match self.store.video_ranges_for_chunk_ids(&ids).await {
            Ok(ranges) => {
                for result in results.iter_mut() {
                    if let Some((start, end)) =
                        ranges.get(&chunk_id(&result.document_id, result.chunk_index))
                    {
                        result.start_time = Some(*start);
                        result.end_time = Some(*end);
                    }
                }
            }
            Err(e) => warn!(error = %e, "video enrichment failed, returning bare results"),
        }
    }

    /// Snapshots the index for a partition, loading it first if this is
    /// the first search or ingest since process start.
    async fn snapshot(&self, partition: &str) -> Result<IndexSnapshot, SearchError> {
        {
            let guard = self.index.read().await;
            if guard.loaded() {
                if let Some(snap) = guard.try_snapshot(partition) {
                    return Ok(snap);
                }
            }
        }

        // First load, or the partition's merged slice is not memoized yet.
        let mut guard = self.index.write().await;
        if !guard.loaded() {
            let rows = self.store.load_all_chunks().await?;
            guard.build(rows);
        }
        Ok(guard.snapshot_mut(partition))
    }

    fn materialize(&self, snap: &IndexSnapshot, scored: Vec<Scored>) -> Vec<SearchResult> {
        scored
            .into_iter()
            .map(|s| {
                let meta = &snap.meta[s.index as usize];
                SearchResult {
                    document_id: meta.document_id.clone(),
                    document_name: meta.document_name.clone(),
                    chunk_index: meta.chunk_index,
                    text: meta.text.clone(),
                    image_url: meta.image_url.clone(),
                    partition: meta.partition.clone(),
                    score: s.score,
                    start_time: None,
                    end_time: None,
                }
            })
            .collect()
    }
}

/// Scores spans of the candidate slice in parallel and merges the
/// per-span heaps. Span count = `max(1, min(#CPUs, ⌈n/500⌉))`.
fn parallel_score<F>(indices: &[u32], top_k: usize, score_span: F) -> Vec<Scored>
where
    F: Fn(&[u32]) -> TopK + Send + Sync,
{
    let workers = worker_count(indices.len());
    let span_len = indices.len().div_ceil(workers);

    let heaps: Vec<TopK> = indices
        .par_chunks(span_len.max(1))
        .map(|span| score_span(span))
        .collect();

    let mut merged = TopK::new(top_k);
    for heap in heaps {
        merged.merge(heap);
    }
    merged.into_descending()
}

fn worker_count(entries: usize) -> usize {
    let cpus = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    cpus.min(entries.div_ceil(ENTRIES_PER_WORKER)).max(1)
}

/// Unions two result lists, deduplicating by chunk identity and keeping
/// the higher score; sorted descending, truncated to `top_k`.
///
/// Used to fuse text-query and image-query search results.
pub fn merge_results(
    primary: Vec<SearchResult>,
    secondary: Vec<SearchResult>,
    top_k: usize,
) -> Vec<SearchResult> {
    let mut best: HashMap<(String, i64), SearchResult> = HashMap::new();
    for result in primary.into_iter().chain(secondary) {
        let key = (result.document_id.clone(), result.chunk_index);
        match best.get(&key) {
            Some(existing) if existing.score >= result.score => {}
            _ => {
                best.insert(key, result);
            }
        }
    }
    let mut merged: Vec<SearchResult> = best.into_values().collect();
    merged.sort_by(|a, b| b.score.total_cmp(&a.score));
    merged.truncate(top_k);
    merged
}

/// Stable re-partition of results by content priority: `image_text` moves
/// image-bearing entries first, `text_only` the inverse, `none` leaves the
/// order alone. Score order is preserved within each group.
pub fn rerank_by_priority(
    results: Vec<SearchResult>,
    priority: ContentPriority,
) -> Vec<SearchResult> {
    match priority {
        ContentPriority::None => results,
        ContentPriority::ImageText => {
            let (mut with_image, without): (Vec<_>, Vec<_>) =
                results.into_iter().partition(|r| !r.image_url.is_empty());
            with_image.extend(without);
            with_image
        }
        ContentPriority::TextOnly => {
            let (mut without, with_image): (Vec<_>, Vec<_>) =
                results.into_iter().partition(|r| r.image_url.is_empty());
            without.extend(with_image);
            without
        }
    }
}
