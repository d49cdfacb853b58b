use thiserror::Error;

use crate::store::StoreError;

/// Errors returned by the search engine.
#[derive(Debug, Error)]
pub enum SearchError {
    /// A chunk-store read or write failed. Fatal to the calling search or
    /// mutation; enrichment failures degrade instead (see
    /// [`crate::search::SearchEngine::enrich_video_times`]).
    #[error("chunk store failure")]
    Store(#[from] StoreError),
}
