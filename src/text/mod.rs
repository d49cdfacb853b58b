//! Lexical similarity primitives.
//!
//! The text-match path and the pending-question dedup both run entirely
//! in-process on these functions; neither ever costs an embedding call.

use std::collections::HashSet;

/// A set of adjacent character pairs from a lowercased string.
pub type BigramSet = HashSet<(char, char)>;

/// CJK punctuation treated as a token separator alongside ASCII
/// punctuation and whitespace.
const CJK_SEPARATORS: &[char] = &[
    '，', '。', '！', '？', '、', '；', '：', '“', '”', '‘', '’', '（', '）', '【', '】', '《',
    '》', '…', '—', '·', '￥',
];

fn is_separator(c: char) -> bool {
    c.is_whitespace() || c.is_ascii_punctuation() || CJK_SEPARATORS.contains(&c)
}

/// Character bigrams of a string. Caller lowercases.
///
/// Strings shorter than two characters yield an empty set.
pub fn char_bigrams(s: &str) -> BigramSet {
    let chars: Vec<char> = s.chars().collect();
    chars.windows(2).map(|w| (w[0], w[1])).collect()
}

/// Jaccard similarity of two bigram sets. Empty union scores zero.
pub fn jaccard(a: &BigramSet, b: &BigramSet) -> f64 {
    if a.is_empty() && b.is_empty() {
        return 0.0;
    }
    let intersection = a.intersection(b).count();
    let union = a.len() + b.len() - intersection;
    intersection as f64 / union as f64
}

/// Bigram-jaccard similarity of two raw strings, lowercased first.
///
/// This is the pending-question dedup metric.
pub fn bigram_similarity(a: &str, b: &str) -> f64 {
    jaccard(
        &char_bigrams(&a.to_lowercase()),
        &char_bigrams(&b.to_lowercase()),
    )
}

/// Query keywords: length-≥2 tokens after splitting on whitespace and
/// ASCII/CJK punctuation, lowercased.
pub fn keywords(query: &str) -> Vec<String> {
    query
        .to_lowercase()
        .split(is_separator)
        .filter(|t| t.chars().count() >= 2)
        .map(str::to_string)
        .collect()
}

/// Fraction of `query_keywords` found as substrings of the entry's
/// lowercased text. No keywords scores zero.
pub fn keyword_overlap(query_keywords: &[String], entry_lower: &str) -> f64 {
    if query_keywords.is_empty() {
        return 0.0;
    }
    let found = query_keywords
        .iter()
        .filter(|k| entry_lower.contains(k.as_str()))
        .count();
    found as f64 / query_keywords.len() as f64
}

/// Truncates a string to at most `max_chars` characters, respecting
/// character boundaries. Used for snippets and summaries.
pub fn truncate_chars(s: &str, max_chars: usize) -> String {
    s.chars().take(max_chars).collect()
}

/// Coarse language class of a question, used as a translation-cache key
/// component: CJK if any CJK codepoint appears, otherwise Latin.
pub fn language_class(s: &str) -> &'static str {
    let cjk = s.chars().any(|c| {
        matches!(c as u32,
            0x4E00..=0x9FFF | 0x3400..=0x4DBF | 0x3040..=0x30FF | 0xAC00..=0xD7AF)
    });
    if cjk { "cjk" } else { "latin" }
}

/// Combined text-match score for one index entry.
pub fn text_score(query_keywords: &[String], query_bigrams: &BigramSet, entry_lower: &str, entry_bigrams: &BigramSet) -> f64 {
    crate::constants::TEXT_SCORE_KEYWORD_WEIGHT * keyword_overlap(query_keywords, entry_lower)
        + crate::constants::TEXT_SCORE_BIGRAM_WEIGHT * jaccard(query_bigrams, entry_bigrams)
}
