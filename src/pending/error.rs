use thiserror::Error;

use crate::providers::ProviderError;
use crate::search::SearchError;
use crate::store::StoreError;

/// Errors returned by the pending-question store.
#[derive(Debug, Error)]
pub enum PendingError {
    /// Referenced question does not exist. Never retried.
    #[error("pending question {id} not found")]
    NotFound {
        /// Missing question id.
        id: String,
    },

    /// Answering a question that is already answered without `is_edit`.
    #[error("pending question {id} is already answered")]
    AlreadyAnswered {
        /// Offending question id.
        id: String,
    },

    /// Question text exceeds the length contract.
    #[error("question of {len} characters exceeds the {max}-character limit")]
    QuestionTooLong { len: usize, max: usize },

    /// Attached image exceeds the size contract.
    #[error("attached image of {bytes} bytes exceeds the {max}-byte limit")]
    ImageTooLarge { bytes: usize, max: usize },

    /// Too many image URLs on one answer.
    #[error("{count} answer images exceed the {max}-image limit")]
    TooManyImages { count: usize, max: usize },

    /// Unknown status filter value.
    #[error("invalid status filter {value:?}: expected \"pending\" or \"answered\"")]
    InvalidStatusFilter {
        /// Offending filter value.
        value: String,
    },

    /// A pending-question row read or write failed.
    #[error("pending store query failed")]
    Database {
        #[from]
        source: sqlx::Error,
    },

    /// Embedding the answer failed; the call aborts, rows already written
    /// are cleaned up by the next delete.
    #[error("embedding the answer failed")]
    Embedding {
        #[source]
        source: ProviderError,
    },

    /// Indexing the synthetic answer chunks failed.
    #[error("indexing the answer chunks failed")]
    Index {
        #[from]
        source: SearchError,
    },

    /// Synthetic-document bookkeeping failed.
    #[error("chunk store failure")]
    Store {
        #[from]
        source: StoreError,
    },
}

/// Convenience result type for pending-store operations.
pub type PendingResult<T> = Result<T, PendingError>;
