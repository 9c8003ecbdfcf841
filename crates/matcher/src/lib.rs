//! # Search Matcher (`matcher`)
//!
//! ## Purpose
//!
//! `matcher` turns a free-text query into a ranked page of items. It sits on
//! top of the storage layer (`index`) and the embedding layer (`semantic`)
//! and owns the one explicit join of the query path: the lexical search and
//! the query embedding run concurrently, and the lexical candidates are then
//! re-ranked by cosine similarity inside that bounded set.
//!
//! When the semantic side is unavailable (provider error, timeout, open
//! circuit, vector store failure) the query still succeeds in lexical order
//! and the response says why (`mode = lexical_only`, `degraded_reason`).
//!
//! ## Core Types
//!
//! - [`HybridSearcher`]: the query orchestrator.
//! - [`SearchRequest`] / [`SearchResponse`] / [`SearchHit`]: the wire shapes.
//! - [`SearchConfig`]: candidate width, limits, offsets and cache TTLs.
//! - [`ItemIndexer`]: single-item upsert and delete across every live
//!   namespace, with metadata cache eviction.
//! - [`SearchMetrics`]: metrics hook, a no-op by default.
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use index::{
//!     BackendVectorStore, IndexBackend, IndexCatalog, InMemoryBackend, MemoryCache,
//!     MemoryItemStore, MemoryLexicalIndex,
//! };
//! use matcher::{HybridSearcher, SearchConfig, SearchParts, SearchRequest};
//! use semantic::{EmbeddingConfig, EmbeddingGenerator, StubEmbeddingProvider};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let backend: Arc<dyn IndexBackend> = Arc::new(InMemoryBackend::new());
//! let cache = Arc::new(MemoryCache::new());
//! let embeddings = EmbeddingGenerator::new(
//!     Arc::new(StubEmbeddingProvider::new("stub-embedding-v1", 384)),
//!     cache.clone(),
//!     EmbeddingConfig::new("stub-embedding-v1", 384),
//! )?;
//!
//! let searcher = HybridSearcher::new(
//!     SearchParts {
//!         index_name: "clips".into(),
//!         catalog: IndexCatalog::new(backend.clone()),
//!         items: Arc::new(MemoryItemStore::new()),
//!         lexical: Arc::new(MemoryLexicalIndex::new()),
//!         vectors: Arc::new(BackendVectorStore::new(backend)),
//!         embeddings: Arc::new(embeddings),
//!         cache,
//!     },
//!     SearchConfig::default(),
//! )?;
//!
//! let page = searcher.search(&SearchRequest::new("amazing clutch")).await?;
//! for hit in page.results {
//!     println!("{} {} {:?}", hit.rank, hit.id, hit.similarity_score);
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Ranking
//!
//! Similarity first, then lexical score, then recency, then id. There is no
//! weighted blend; candidates without a current vector follow the ranked
//! ones in lexical order.

pub mod engine;
pub mod indexer;
pub mod metrics;
pub mod types;

pub use crate::engine::{merge_candidates, metadata_cache_key, HybridSearcher, RankedResult, SearchParts};
pub use crate::indexer::{ItemIndexer, RemoveReport, RemoveStatus, UpsertReport, UpsertStatus};
pub use crate::metrics::{NoopSearchMetrics, SearchMetrics, Stage};
pub use crate::types::{
    DegradedReason, LimitPolicy, SearchConfig, SearchError, SearchHit, SearchMode, SearchRequest,
    SearchResponse,
};
