//! Query-result cache.
//!
//! Keyed by a 64-bit FNV-1a hash over a sampled fingerprint of the query
//! (32 evenly spaced elements plus head and tail), the search parameters,
//! and the partition. A tag byte separates vector keys from text keys so
//! the two families cannot collide. Entries live for five minutes, the
//! cache holds at most 256 of them, and every store mutation clears it
//! wholesale before the write lock is released.

use moka::sync::Cache;
use std::sync::Arc;
use std::time::Duration;

use crate::constants::{QUERY_CACHE_CAPACITY, QUERY_CACHE_TTL_SECS};
use crate::search::SearchResult;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

/// Key-family tag for vector-query keys.
const TAG_VECTOR: u8 = 0x56;
/// Key-family tag for text-query keys.
const TAG_TEXT: u8 = 0x54;

/// How many query elements the vector fingerprint samples.
const SAMPLE_COUNT: usize = 32;

struct Fnv(u64);

impl Fnv {
    fn new(tag: u8) -> Self {
        let mut h = Self(FNV_OFFSET);
        h.write(&[tag]);
        h
    }

    fn write(&mut self, bytes: &[u8]) {
        for b in bytes {
            self.0 ^= u64::from(*b);
            self.0 = self.0.wrapping_mul(FNV_PRIME);
        }
    }

    fn write_u32(&mut self, v: u32) {
        self.write(&v.to_le_bytes());
    }

    fn write_u64(&mut self, v: u64) {
        self.write(&v.to_le_bytes());
    }

    fn finish(self) -> u64 {
        self.0
    }
}

/// Cache key for a vector search.
pub(crate) fn vector_query_key(query: &[f32], top_k: usize, threshold: f32, partition: &str) -> u64 {
    let mut h = Fnv::new(TAG_VECTOR);
    h.write_u64(query.len() as u64);

    if !query.is_empty() {
        let step = (query.len() / SAMPLE_COUNT).max(1);
        for i in (0..query.len()).step_by(step).take(SAMPLE_COUNT) {
            h.write_u32(query[i].to_bits());
        }
        h.write_u32(query[0].to_bits());
        h.write_u32(query[query.len() - 1].to_bits());
    }

    h.write_u64(top_k as u64);
    h.write_u32(threshold.to_bits());
    h.write(partition.as_bytes());
    h.finish()
}

/// Cache key for a text search.
pub(crate) fn text_query_key(query: &str, top_k: usize, threshold: f32, partition: &str) -> u64 {
    let mut h = Fnv::new(TAG_TEXT);
    h.write(query.as_bytes());
    h.write_u64(top_k as u64);
    h.write_u32(threshold.to_bits());
    h.write(partition.as_bytes());
    h.finish()
}

/// Bounded, TTL-evicted cache of recent search results.
pub(crate) struct QueryCache {
    entries: Cache<u64, Arc<Vec<SearchResult>>>,
}

impl QueryCache {
    pub fn new() -> Self {
        Self {
            entries: Cache::builder()
                .max_capacity(QUERY_CACHE_CAPACITY)
                .time_to_live(Duration::from_secs(QUERY_CACHE_TTL_SECS))
                .build(),
        }
    }

    /// Returns a defensive copy of a cached result list.
    pub fn get(&self, key: u64) -> Option<Vec<SearchResult>> {
        self.entries.get(&key).map(|cached| cached.as_ref().clone())
    }

    /// Stores a defensive copy of a result list.
    pub fn put(&self, key: u64, results: &[SearchResult]) {
        self.entries.insert(key, Arc::new(results.to_vec()));
    }

    /// Drops every entry. Called on any store mutation.
    pub fn invalidate_all(&self) {
        self.entries.invalidate_all();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vector_and_text_keys_do_not_collide() {
        // A vector whose bytes spell the same fingerprint as a short text
        // query still lands in a different family thanks to the tag byte.
        let v = vector_query_key(&[1.0, 2.0], 5, 0.5, "p");
        let t = text_query_key("anything", 5, 0.5, "p");
        assert_ne!(v, t);
    }

    #[test]
    fn test_vector_key_sensitive_to_parameters() {
        let q = vec![0.25f32; 64];
        let base = vector_query_key(&q, 5, 0.5, "p");
        assert_ne!(base, vector_query_key(&q, 6, 0.5, "p"));
        assert_ne!(base, vector_query_key(&q, 5, 0.51, "p"));
        assert_ne!(base, vector_query_key(&q, 5, 0.5, "q"));

        let mut tail_changed = q.clone();
        *tail_changed.last_mut().unwrap() = 0.75;
        assert_ne!(base, vector_query_key(&tail_changed, 5, 0.5, "p"));
    }

    #[test]
    fn test_vector_key_deterministic() {
        let q: Vec<f32> = (0..1536).map(|i| i as f32 / 1536.0).collect();
        assert_eq!(
            vector_query_key(&q, 10, 0.6, "tenant"),
            vector_query_key(&q, 10, 0.6, "tenant")
        );
    }
}
