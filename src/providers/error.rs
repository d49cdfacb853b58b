use thiserror::Error;

/// Errors returned by embedding and generative providers.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Transport-level failure (connect, timeout, body read).
    #[error("provider request failed")]
    Http {
        #[from]
        source: reqwest::Error,
    },

    /// The provider answered with a non-success status.
    #[error("provider returned status {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, truncated.
        message: String,
    },

    /// Batch size exceeds the wire contract.
    #[error("embedding batch of {len} texts exceeds the {max}-text limit")]
    BatchTooLarge {
        /// Offending batch size.
        len: usize,
        /// Contract maximum.
        max: usize,
    },

    /// Image input on a provider not configured for multimodal requests.
    #[error("embedding provider is not configured for multimodal input")]
    MultimodalDisabled,

    /// The response parsed but is missing expected fields.
    #[error("provider response missing expected fields: {detail}")]
    MalformedResponse {
        /// What was missing or wrong.
        detail: String,
    },
}

/// Convenience result type for provider calls.
pub type ProviderResult<T> = Result<T, ProviderError>;
