use thiserror::Error;

/// Errors returned by the chunk store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Opening the database or its pool failed.
    #[error("database connection failed: {path}")]
    Connect {
        /// Connection string or path.
        path: String,
        /// Underlying driver error.
        #[source]
        source: sqlx::Error,
    },

    /// Idempotent schema creation failed.
    #[error("schema initialization failed")]
    Schema {
        #[source]
        source: sqlx::Error,
    },

    /// The transactional chunk batch insert rolled back.
    #[error("failed to store chunk batch for document {document_id}")]
    StoreChunks {
        /// Document whose batch failed.
        document_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// Deleting a document's chunks failed.
    #[error("failed to delete chunks for document {document_id}")]
    DeleteChunks {
        /// Document whose delete failed.
        document_id: String,
        #[source]
        source: sqlx::Error,
    },

    /// Loading the full chunk table for the hot index failed.
    #[error("failed to load chunk table")]
    LoadChunks {
        #[source]
        source: sqlx::Error,
    },

    /// Any other read or write failed.
    #[error("store query failed")]
    Query {
        #[from]
        source: sqlx::Error,
    },
}

/// Convenience result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
