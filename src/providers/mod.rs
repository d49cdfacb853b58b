//! External service contracts: embedding, generation, chunking.
//!
//! The engine and stores are generic over these traits; HTTP-backed
//! implementations live in [`http`], scripted in-memory ones behind the
//! `mock` feature in [`mock`]. Provider determinism is not assumed — an
//! embedding of the same text may differ across providers, which is why
//! the engine's embedding cache is cleared on every service swap.

mod error;
pub mod http;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[cfg(test)]
mod tests;

pub use error::{ProviderError, ProviderResult};
pub use http::{HttpEmbeddingService, HttpLlmService};

use std::future::Future;

/// Dense-vector embedding provider.
pub trait EmbeddingService: Send + Sync {
    /// Embeds a single text.
    fn embed(&self, text: &str) -> impl Future<Output = ProviderResult<Vec<f32>>> + Send;

    /// Embeds a batch, capped at [`crate::constants::MAX_EMBED_BATCH`]
    /// texts; returned vectors align with input indices.
    fn embed_batch(
        &self,
        texts: &[String],
    ) -> impl Future<Output = ProviderResult<Vec<Vec<f32>>>> + Send;

    /// Embeds an image given by URL or data URL.
    fn embed_image_url(
        &self,
        image_url: &str,
    ) -> impl Future<Output = ProviderResult<Vec<f32>>> + Send;
}

/// Generative text provider.
pub trait LlmService: Send + Sync {
    /// Generates a reply from a system prompt, retrieved context chunks,
    /// and the user's question.
    fn generate(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
    ) -> impl Future<Output = ProviderResult<String>> + Send;

    /// Like [`generate`](Self::generate), with the user's image attached.
    fn generate_with_image(
        &self,
        system_prompt: &str,
        context: &[String],
        question: &str,
        image_data_url: &str,
    ) -> impl Future<Output = ProviderResult<String>> + Send;
}

/// One piece of a chunked document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkPiece {
    /// Position within the document.
    pub index: i64,
    /// Piece text, non-empty.
    pub text: String,
}

/// Splits document text into indexable pieces.
///
/// Deterministic over identical input, and object-safe so callers can
/// hold it as `Arc<dyn TextChunker>`.
pub trait TextChunker: Send + Sync {
    fn split(&self, text: &str, document_id: &str) -> Vec<ChunkPiece>;
}

/// Default chunker: paragraphs packed into bounded pieces.
///
/// Paragraphs (blank-line separated) are greedily packed up to
/// `max_chars`; an oversized paragraph is hard-wrapped at a character
/// boundary. Whitespace-only input yields no pieces.
#[derive(Debug, Clone)]
pub struct ParagraphChunker {
    max_chars: usize,
}

impl ParagraphChunker {
    pub fn new(max_chars: usize) -> Self {
        Self {
            max_chars: max_chars.max(1),
        }
    }
}

impl Default for ParagraphChunker {
    fn default() -> Self {
        Self::new(800)
    }
}

impl TextChunker for ParagraphChunker {
    fn split(&self, text: &str, _document_id: &str) -> Vec<ChunkPiece> {
        let normalized = text.replace("\r\n", "\n");
        let mut pieces: Vec<String> = Vec::new();
        let mut current = String::new();

        for paragraph in normalized.split("\n\n") {
            let paragraph = paragraph.trim();
            if paragraph.is_empty() {
                continue;
            }

            let para_chars = paragraph.chars().count();
            if para_chars > self.max_chars {
                if !current.is_empty() {
                    pieces.push(std::mem::take(&mut current));
                }
                let chars: Vec<char> = paragraph.chars().collect();
                for window in chars.chunks(self.max_chars) {
                    pieces.push(window.iter().collect());
                }
                continue;
            }

            let current_chars = current.chars().count();
            if !current.is_empty() && current_chars + 1 + para_chars > self.max_chars {
                pieces.push(std::mem::take(&mut current));
            }
            if !current.is_empty() {
                current.push('\n');
            }
            current.push_str(paragraph);
        }
        if !current.is_empty() {
            pieces.push(current);
        }

        pieces
            .into_iter()
            .enumerate()
            .map(|(i, text)| ChunkPiece {
                index: i as i64,
                text,
            })
            .collect()
    }
}
