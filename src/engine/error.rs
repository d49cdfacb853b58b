use thiserror::Error;

use crate::pending::PendingError;
use crate::providers::ProviderError;
use crate::search::SearchError;
use crate::store::StoreError;

/// Errors returned by the query engine.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Retrieval failed; the whole query fails with it.
    #[error("retrieval failed")]
    Search(#[from] SearchError),

    /// Pending-question bookkeeping failed.
    #[error("pending question operation failed")]
    Pending(#[from] PendingError),

    /// Embedding or generative provider failed.
    #[error("provider call failed")]
    Provider(#[from] ProviderError),

    /// Document or chunk persistence failed.
    #[error("chunk store failure")]
    Store(#[from] StoreError),

    /// Too many images supplied to knowledge ingestion.
    #[error("{count} knowledge images exceed the {max}-image limit")]
    TooManyImages { count: usize, max: usize },
}

/// Convenience result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
