//! Cross-cutting, shared constants.
//!
//! Prefer deriving secondary constants (e.g. byte sizes, strong thresholds)
//! from primary ones to avoid drift. Values that are part of an on-disk or
//! wire contract are called out as such on the item.

/// Embedding dimensions produced by models in the wild.
///
/// Drives the legacy-format detection in [`crate::vector::detect_format`];
/// part of the on-disk contract, do not reorder or extend casually.
pub const COMMON_EMBEDDING_DIMS: [usize; 10] =
    [128, 256, 384, 512, 768, 1024, 1536, 2048, 3072, 4096];

/// Bytes per vector element in the current serialization format.
pub const VECTOR_ELEMENT_BYTES: usize = 4;

/// Bytes per vector element in the legacy (f64) serialization format.
pub const LEGACY_VECTOR_ELEMENT_BYTES: usize = 8;

/// Default number of results a query retrieves before synthesis.
pub const DEFAULT_TOP_K: usize = 5;

/// Default cosine-similarity floor for vector retrieval.
pub const DEFAULT_THRESHOLD: f32 = 0.6;

/// Result count for the Tier-1 text match probe.
pub const TEXT_MATCH_TOP_K: usize = 3;

/// Score floor for the Tier-1 text match probe.
pub const TEXT_MATCH_THRESHOLD: f32 = 0.65;

/// Text/vector score above which a cached administrator answer is served
/// directly, skipping synthesis.
pub const STRONG_MATCH_THRESHOLD: f64 = 0.75;

/// Result count for the relaxed fallback search.
pub const RELAXED_TOP_K: usize = 3;

/// Minimum score for accepting the relaxed fallback's best result.
pub const RELAXED_MIN_SCORE: f64 = 0.3;

/// Relaxed floor when the query carries an image.
pub const RELAXED_MIN_SCORE_IMAGE: f64 = 0.2;

/// Image-fusion searches scale the configured threshold by this factor…
pub const IMAGE_FUSION_THRESHOLD_SCALE: f32 = 0.6;

/// …but never below this floor.
pub const IMAGE_FUSION_THRESHOLD_FLOOR: f32 = 0.3;

/// Query-result cache capacity (entries).
pub const QUERY_CACHE_CAPACITY: u64 = 256;

/// Query-result cache TTL in seconds.
pub const QUERY_CACHE_TTL_SECS: u64 = 300;

/// Question-embedding cache capacity (entries).
pub const EMBED_CACHE_CAPACITY: u64 = 512;

/// Question-embedding cache TTL in seconds.
pub const EMBED_CACHE_TTL_SECS: u64 = 600;

/// Translation cache capacity (entries).
pub const TRANSLATION_CACHE_CAPACITY: u64 = 256;

/// Translation cache TTL in seconds.
pub const TRANSLATION_CACHE_TTL_SECS: u64 = 1800;

/// Timeout for translating static product strings, in seconds.
pub const TRANSLATE_TIMEOUT_SECS: u64 = 10;

/// Upper bound on a pending question's length, in characters.
pub const MAX_QUESTION_CHARS: usize = 10_000;

/// Upper bound on an attached image data URL, in bytes of base64 text.
pub const MAX_IMAGE_BASE64_BYTES: usize = 5 * 1024 * 1024;

/// Upper bound on image URLs attached to one administrator answer.
pub const MAX_ANSWER_IMAGES: usize = 50;

/// Image chunks of a synthetic answer document start at this chunk index,
/// keeping them clear of the text chunks. Part of the chunk-id contract.
pub const IMAGE_CHUNK_INDEX_BASE: i64 = 1000;

/// How many of the newest open pending questions the dedup scan covers.
pub const PENDING_DEDUP_WINDOW: i64 = 50;

/// Bigram-jaccard similarity at or above which two pending questions are
/// considered duplicates.
pub const PENDING_DEDUP_THRESHOLD: f64 = 0.7;

/// Maximum texts per embedding batch request.
pub const MAX_EMBED_BATCH: usize = 256;

/// Source-reference snippets are truncated to this many characters.
pub const SNIPPET_MAX_CHARS: usize = 100;

/// Pending-question summaries are truncated to this many characters.
pub const SUMMARY_MAX_CHARS: usize = 100;

/// Each search worker scores roughly this many index entries.
pub const ENTRIES_PER_WORKER: usize = 500;

/// Keyword overlap weight in the text-match score.
pub const TEXT_SCORE_KEYWORD_WEIGHT: f64 = 0.6;

/// Bigram-jaccard weight in the text-match score.
pub const TEXT_SCORE_BIGRAM_WEIGHT: f64 = 1.0 - TEXT_SCORE_KEYWORD_WEIGHT;

/// Document-id prefix of synthetic answer documents. Part of the data
/// contract: Tier-1 uses it to recognize administrator-answered content.
pub const PENDING_ANSWER_DOC_PREFIX: &str = "pending-answer-";

/// Product type that bypasses intent routing.
pub const KNOWLEDGE_BASE_PRODUCT_TYPE: &str = "knowledge_base";

/// Builds the synthetic answer document id for a pending question.
pub fn pending_answer_doc_id(question_id: &str) -> String {
    format!("{PENDING_ANSWER_DOC_PREFIX}{question_id}")
}

/// Builds the external chunk id `"<document_id>-<chunk_index>"`.
pub fn chunk_id(document_id: &str, chunk_index: i64) -> String {
    format!("{document_id}-{chunk_index}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_id_format() {
        assert_eq!(chunk_id("doc1", 0), "doc1-0");
        assert_eq!(
            chunk_id("pending-answer-ab12", 1000),
            "pending-answer-ab12-1000"
        );
    }

    #[test]
    fn test_pending_answer_doc_id_roundtrip() {
        let id = pending_answer_doc_id("deadbeef");
        assert!(id.starts_with(PENDING_ANSWER_DOC_PREFIX));
        assert_eq!(&id[PENDING_ANSWER_DOC_PREFIX.len()..], "deadbeef");
    }

    #[test]
    fn test_text_score_weights_sum_to_one() {
        assert!((TEXT_SCORE_KEYWORD_WEIGHT + TEXT_SCORE_BIGRAM_WEIGHT - 1.0).abs() < f64::EPSILON);
    }
}
