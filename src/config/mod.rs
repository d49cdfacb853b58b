//! Engine configuration.
//!
//! The core accepts a plain configuration object; parsing it from the
//! environment, files, or a hot-reloading store is the embedder's concern.
//! A swapped configuration takes effect atomically through the engine's
//! update-services call.

pub mod error;

#[cfg(test)]
mod tests;

pub use error::ConfigError;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_THRESHOLD, DEFAULT_TOP_K};

/// Which content class leads the final result ordering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentPriority {
    /// Image-bearing chunks first.
    ImageText,
    /// Text-only chunks first.
    TextOnly,
    /// Keep score order.
    #[default]
    None,
}

impl ContentPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ImageText => "image_text",
            Self::TextOnly => "text_only",
            Self::None => "none",
        }
    }

    /// Parses a priority string; unknown values mean no reranking.
    pub fn parse(s: &str) -> Self {
        match s {
            "image_text" => Self::ImageText,
            "text_only" => Self::TextOnly,
            _ => Self::None,
        }
    }
}

/// Embedding provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    /// Whether the provider accepts image inputs.
    pub multimodal: bool,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/embeddings".to_string(),
            api_key: String::new(),
            model: "text-embedding-v1".to_string(),
            multimodal: false,
        }
    }
}

/// Generative provider settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub endpoint: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8000/v1/chat/completions".to_string(),
            api_key: String::new(),
            model: "qwen-plus".to_string(),
            temperature: 0.7,
            max_tokens: 2048,
        }
    }
}

/// Retrieval tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VectorConfig {
    /// Results retrieved before synthesis.
    pub top_k: usize,
    /// Cosine-similarity floor.
    pub threshold: f32,
    /// Whether the Tier-1 text match runs at all.
    pub text_match_enabled: bool,
    pub content_priority: ContentPriority,
    /// Attach per-query pipeline diagnostics to responses.
    pub debug_mode: bool,
}

impl Default for VectorConfig {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            threshold: DEFAULT_THRESHOLD,
            text_match_enabled: true,
            content_priority: ContentPriority::None,
            debug_mode: false,
        }
    }
}

/// Video ingestion tool paths and limits. The extraction pipeline itself
/// is external; the engine only reads its segment table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub max_upload_size_mb: u64,
    pub ffmpeg_path: String,
    pub transcriber_path: String,
    pub model_path: String,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            max_upload_size_mb: 500,
            ffmpeg_path: "ffmpeg".to_string(),
            transcriber_path: String::new(),
            model_path: String::new(),
        }
    }
}

/// The full engine configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub embedding: EmbeddingConfig,
    pub llm: LlmConfig,
    pub vector: VectorConfig,
    pub video: VideoConfig,
    /// Welcome text served on greeting intent, translated to the user's
    /// language on the way out.
    pub product_intro: String,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.vector.top_k == 0 {
            return Err(ConfigError::ZeroTopK);
        }
        if !(0.0..=1.0).contains(&self.vector.threshold) {
            return Err(ConfigError::ThresholdOutOfRange {
                value: self.vector.threshold,
            });
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(ConfigError::TemperatureOutOfRange {
                value: self.llm.temperature,
            });
        }
        if self.llm.max_tokens == 0 {
            return Err(ConfigError::ZeroMaxTokens);
        }
        if self.video.max_upload_size_mb == 0 {
            return Err(ConfigError::ZeroUploadSize);
        }
        Ok(())
    }
}
