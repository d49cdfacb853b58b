use thiserror::Error;

/// Errors returned by [`super::Config::validate`].
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ConfigError {
    /// `vector.top_k` must be at least one.
    #[error("vector.top_k must be at least 1")]
    ZeroTopK,

    /// `vector.threshold` must lie in `[0, 1]`.
    #[error("vector.threshold {value} out of range [0, 1]")]
    ThresholdOutOfRange {
        /// Offending value.
        value: f32,
    },

    /// `llm.temperature` must lie in `[0, 2]`.
    #[error("llm.temperature {value} out of range [0, 2]")]
    TemperatureOutOfRange {
        /// Offending value.
        value: f32,
    },

    /// `llm.max_tokens` must be at least one.
    #[error("llm.max_tokens must be at least 1")]
    ZeroMaxTokens,

    /// `video.max_upload_size_mb` must be at least one.
    #[error("video.max_upload_size_mb must be at least 1")]
    ZeroUploadSize,
}
