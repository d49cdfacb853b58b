//! Hot in-memory mirror of the chunk store.
//!
//! All vectors live back-to-back in one contiguous arena (entry `i` at
//! offset `i × dim`), with metadata and pre-computed inverse norms in
//! parallel arrays. A partition map takes each partition id (the empty
//! string is the public/shared library) to the sorted entry indices it
//! owns, plus memoized per-partition unions with the shared library.
//!
//! Buffers are `Arc`-wrapped so searches snapshot them under a read lock
//! and score lock-free; ingest appends in place via [`Arc::make_mut`],
//! copying only when an in-flight search still holds the old snapshot.
//! Deletes rebuild the whole structure (deletes are rare).

mod cache;

#[cfg(test)]
mod tests;

pub(crate) use cache::{QueryCache, text_query_key, vector_query_key};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::store::{ChunkRecord, StoredChunk};
use crate::text::{BigramSet, char_bigrams};
use crate::vector;

/// Partition-map key suffix under which merged (partition ∪ shared)
/// index slices are memoized. The NUL byte cannot occur in partition ids.
const MERGED_SUFFIX: &str = "\x00merged";

/// Per-entry metadata, parallel to the norm array and the arena.
#[derive(Debug, Clone)]
pub(crate) struct EntryMeta {
    pub document_id: String,
    pub document_name: String,
    pub chunk_index: i64,
    pub text: String,
    pub image_url: String,
    pub partition: String,
    /// Lowercased text, computed once for the text-match path.
    pub lower_text: String,
    /// Character bigrams of `lower_text`.
    pub bigrams: BigramSet,
}

/// The mutable hot-index state behind the engine's reader–writer lock.
pub(crate) struct IndexState {
    loaded: bool,
    /// Vector dimension; zero until the first non-empty vector arrives.
    dim: usize,
    meta: Arc<Vec<EntryMeta>>,
    /// Pre-computed `1/‖v‖` per entry; zero flags the entry skipped.
    inv_norms: Arc<Vec<f32>>,
    /// All vectors, entry `i` at `[i*dim .. (i+1)*dim]`.
    arena: Arc<Vec<f32>>,
    /// Partition id → sorted entry indices. Merged unions are memoized
    /// here under `<partition>\x00merged` and cleared on any mutation.
    partitions: HashMap<String, Arc<Vec<u32>>>,
    /// Pre-built `[0..n)` used for unscoped search.
    global: Arc<Vec<u32>>,
}

/// A consistent view of the index taken under the read lock; scoring runs
/// on it lock-free.
#[derive(Clone)]
pub(crate) struct IndexSnapshot {
    pub dim: usize,
    pub meta: Arc<Vec<EntryMeta>>,
    pub inv_norms: Arc<Vec<f32>>,
    pub arena: Arc<Vec<f32>>,
    pub indices: Arc<Vec<u32>>,
}

impl IndexState {
    pub fn new() -> Self {
        Self {
            loaded: false,
            dim: 0,
            meta: Arc::new(Vec::new()),
            inv_norms: Arc::new(Vec::new()),
            arena: Arc::new(Vec::new()),
            partitions: HashMap::new(),
            global: Arc::new(Vec::new()),
        }
    }

    pub fn loaded(&self) -> bool {
        self.loaded
    }

    pub fn len(&self) -> usize {
        self.meta.len()
    }

    /// Replaces the whole state from a freshly loaded chunk table.
    pub fn build(&mut self, rows: Vec<StoredChunk>) {
        self.reset();
        for row in rows {
            match vector::decode(&row.embedding) {
                Ok(vec) => self.push_entry(
                    row.document_id,
                    row.document_name,
                    row.chunk_index,
                    row.text,
                    row.image_url,
                    row.partition,
                    vec,
                ),
                Err(e) => {
                    warn!(
                        document_id = %row.document_id,
                        chunk_index = row.chunk_index,
                        error = %e,
                        "skipping chunk with undecodable embedding"
                    );
                }
            }
        }
        self.loaded = true;
        debug!(entries = self.len(), dim = self.dim, "hot index loaded");
    }

    /// Appends a committed ingest batch in place.
    pub fn append(&mut self, chunks: &[ChunkRecord]) {
        for chunk in chunks {
            self.push_entry(
                chunk.document_id.clone(),
                chunk.document_name.clone(),
                chunk.chunk_index,
                chunk.text.clone(),
                chunk.image_url.clone(),
                chunk.partition.clone(),
                chunk.embedding.clone(),
            );
        }
        self.clear_merged();
    }

    /// Rebuilds the state without the given document's entries.
    pub fn remove_document(&mut self, document_id: &str) {
        let dim = self.dim;
        let old_meta = Arc::clone(&self.meta);
        let old_norms = Arc::clone(&self.inv_norms);
        let old_arena = Arc::clone(&self.arena);

        self.reset();
        self.dim = dim;
        self.loaded = true;

        for (i, meta) in old_meta.iter().enumerate() {
            if meta.document_id == document_id {
                continue;
            }
            self.push_meta(meta.clone());
            Arc::make_mut(&mut self.inv_norms).push(old_norms[i]);
            if dim > 0 {
                Arc::make_mut(&mut self.arena)
                    .extend_from_slice(&old_arena[i * dim..(i + 1) * dim]);
            }
        }
        debug!(document_id, entries = self.len(), "hot index rebuilt after delete");
    }

    /// Snapshot for a partition whose index slice is already available
    /// without mutation (global, exact partition with no shared entries
    /// to merge, or a previously memoized union).
    pub fn try_snapshot(&self, partition: &str) -> Option<IndexSnapshot> {
        let indices = if partition.is_empty() {
            Arc::clone(&self.global)
        } else {
            Arc::clone(self.partitions.get(&merged_key(partition))?)
        };
        Some(self.snapshot_with(indices))
    }

    /// Snapshot for a partition, memoizing the merged slice if needed.
    pub fn snapshot_mut(&mut self, partition: &str) -> IndexSnapshot {
        let indices = self.indices_for(partition);
        self.snapshot_with(indices)
    }

    fn snapshot_with(&self, indices: Arc<Vec<u32>>) -> IndexSnapshot {
        IndexSnapshot {
            dim: self.dim,
            meta: Arc::clone(&self.meta),
            inv_norms: Arc::clone(&self.inv_norms),
            arena: Arc::clone(&self.arena),
            indices,
        }
    }

    /// The index slice a search over `partition` scans: the global slice
    /// for the empty partition, otherwise the memoized union of the
    /// partition's own entries and the shared library.
    fn indices_for(&mut self, partition: &str) -> Arc<Vec<u32>> {
        if partition.is_empty() {
            return Arc::clone(&self.global);
        }

        let key = merged_key(partition);
        if let Some(cached) = self.partitions.get(&key) {
            return Arc::clone(cached);
        }

        let own = self.partitions.get(partition).map(|v| v.as_slice()).unwrap_or(&[]);
        let shared = self.partitions.get("").map(|v| v.as_slice()).unwrap_or(&[]);
        let merged = Arc::new(merge_sorted(own, shared));
        self.partitions.insert(key, Arc::clone(&merged));
        merged
    }

    fn push_entry(
        &mut self,
        document_id: String,
        document_name: String,
        chunk_index: i64,
        text: String,
        image_url: String,
        partition: String,
        mut vec: Vec<f32>,
    ) {
        if self.dim == 0 && !vec.is_empty() {
            self.dim = vec.len();
            Arc::make_mut(&mut self.arena).reserve(self.dim * 64);
        }

        // A mismatched dimension cannot live in the fixed-stride arena;
        // zero the slot so the entry is skipped during vector scoring but
        // still participates in text search.
        let inv = if vec.len() == self.dim {
            vector::inv_norm(&vec)
        } else {
            warn!(
                document_id = %document_id,
                chunk_index,
                got = vec.len(),
                want = self.dim,
                "dimension mismatch, entry excluded from vector scoring"
            );
            vec.clear();
            0.0
        };
        vec.resize(self.dim, 0.0);

        let lower_text = text.to_lowercase();
        let bigrams = char_bigrams(&lower_text);
        self.push_meta(EntryMeta {
            document_id,
            document_name,
            chunk_index,
            text,
            image_url,
            partition,
            lower_text,
            bigrams,
        });

        Arc::make_mut(&mut self.inv_norms).push(inv);
        Arc::make_mut(&mut self.arena).extend_from_slice(&vec);
    }

    /// Appends metadata and registers the new entry index in its
    /// partition and the global slice.
    fn push_meta(&mut self, meta: EntryMeta) {
        let entry = self.meta.len() as u32;
        let partition = meta.partition.clone();
        Arc::make_mut(&mut self.meta).push(meta);
        Arc::make_mut(&mut self.global).push(entry);
        Arc::make_mut(
            self.partitions
                .entry(partition)
                .or_insert_with(|| Arc::new(Vec::new())),
        )
        .push(entry);
    }

    fn clear_merged(&mut self) {
        self.partitions.retain(|k, _| !k.ends_with(MERGED_SUFFIX));
    }

    fn reset(&mut self) {
        self.loaded = false;
        self.dim = 0;
        self.meta = Arc::new(Vec::new());
        self.inv_norms = Arc::new(Vec::new());
        self.arena = Arc::new(Vec::new());
        self.partitions.clear();
        self.global = Arc::new(Vec::new());
    }
}

fn merged_key(partition: &str) -> String {
    format!("{partition}{MERGED_SUFFIX}")
}

/// Union of two sorted, duplicate-free index slices.
fn merge_sorted(a: &[u32], b: &[u32]) -> Vec<u32> {
    let mut out = Vec::with_capacity(a.len() + b.len());
    let (mut i, mut j) = (0, 0);
    while i < a.len() && j < b.len() {
        match a[i].cmp(&b[j]) {
            std::cmp::Ordering::Less => {
                out.push(a[i]);
                i += 1;
            }
            std::cmp::Ordering::Greater => {
                out.push(b[j]);
                j += 1;
            }
            std::cmp::Ordering::Equal => {
                out.push(a[i]);
                i += 1;
                j += 1;
            }
        }
    }
    out.extend_from_slice(&a[i..]);
    out.extend_from_slice(&b[j..]);
    out
}
