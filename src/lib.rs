//! # Recall
//!
//! Retrieval-augmented question answering core.
//!
//! Recall sits between an admin ingest surface and end users asking
//! questions:
//!
//! ```text
//! Question → intent → text match → vector retrieval → synthesis
//!                         ↓ cached answer        ↘ escalation
//!                      (zero cost)            (pending queue → human)
//! ```
//!
//! Chunks persist in SQLite and are mirrored into a hot in-memory index
//! (contiguous vector arena, SIMD cosine scoring, partition isolation).
//! Questions the pipeline cannot answer queue for a human; administrator
//! answers are re-ingested as synthetic documents so they become
//! first-class retrievable knowledge.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use recall::{
//!     ChunkStore, Config, HttpEmbeddingService, HttpLlmService, ParagraphChunker,
//!     PendingStore, QueryEngine, QueryRequest, SearchEngine,
//! };
//!
//! # async fn run() -> anyhow::Result<()> {
//! let config = Arc::new(Config::default());
//! let pool = recall::store::connect(std::path::Path::new("./data/recall.db")).await?;
//! let store = ChunkStore::new(pool.clone()).await?;
//! let engine = QueryEngine::new(
//!     Arc::new(SearchEngine::new(store)),
//!     Arc::new(PendingStore::new(pool)),
//!     Arc::new(ParagraphChunker::default()),
//!     Arc::new(HttpEmbeddingService::new(&config.embedding)?),
//!     Arc::new(HttpLlmService::new(&config.llm)?),
//!     config,
//! );
//! let response = engine.query(&QueryRequest::new("how do I reset my password?")).await?;
//! println!("{}", response.answer);
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! | Feature | Purpose |
//! |---------|---------|
//! | `mock`  | Scripted in-memory providers for tests/examples |
//!
//! ## Modules
//!
//! - [`engine`] - Three-tier query pipeline
//! - [`search`] - Parallel top-K vector and text search
//! - [`store`] - SQLite chunk/document/video persistence
//! - [`pending`] - Human-review question lifecycle
//! - [`providers`] - Embedding/LLM/chunker contracts
//! - [`vector`] - Vector codec and SIMD similarity math
//! - [`config`] - Engine configuration object

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod constants;
pub mod engine;
pub mod pending;
pub mod providers;
pub mod search;
pub mod store;
pub mod text;
pub mod vector;

mod index;

pub use config::{Config, ConfigError, ContentPriority};
pub use engine::{
    DebugInfo, DebugResult, EngineError, EngineResult, QueryEngine, QueryRequest, QueryResponse,
    SourceRef, is_unable_to_answer,
};
pub use pending::{
    AnswerRequest, PendingError, PendingQuestion, PendingResult, PendingStatus, PendingStore,
};
pub use providers::{
    ChunkPiece, EmbeddingService, HttpEmbeddingService, HttpLlmService, LlmService,
    ParagraphChunker, ProviderError, ProviderResult, TextChunker,
};
#[cfg(any(test, feature = "mock"))]
pub use providers::mock::{MockEmbeddingService, MockLlmService};
pub use search::{SearchEngine, SearchError, SearchResult, merge_results, rerank_by_priority};
pub use store::{
    ChunkRecord, ChunkStore, DocumentRecord, DocumentStatus, ImageChunkRow, SegmentType,
    StoreError, StoreResult, StoredChunk, VideoSegment,
};
pub use vector::{CodecError, VectorFormat};
