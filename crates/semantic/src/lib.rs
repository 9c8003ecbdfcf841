//! Embedding generation for hybrid search.
//!
//! Text goes in, a fixed-width vector comes out. Everything between is
//! about doing that inside a latency budget without ever taking a query
//! down with it:
//!
//! - input is canonicalized first, so `"Amazing Clutch "` and
//!   `"amazing clutch"` share one cache entry;
//! - vectors are cached (1h for queries, 24h for items) behind an injected
//!   [`index::CacheStore`];
//! - provider calls are retried with exponential backoff, guarded by a
//!   circuit breaker and optionally paced by a token bucket;
//! - each path has its own timeout. The query path gives up after 60ms so
//!   the orchestrator can fall back to lexical ranking.
//!
//! Two providers ship with the crate. [`HttpEmbeddingProvider`] speaks the
//! OpenAI-compatible `/v1/embeddings` API; [`StubEmbeddingProvider`] is
//! deterministic and offline.
//!
//! ## Quick example
//!
//! ```
//! use index::MemoryCache;
//! use semantic::{EmbeddingConfig, EmbeddingGenerator, StubEmbeddingProvider};
//! use std::sync::Arc;
//!
//! # let rt = tokio::runtime::Builder::new_current_thread().enable_time().build().unwrap();
//! # rt.block_on(async {
//! let provider = Arc::new(StubEmbeddingProvider::new("stub-embedding-v1", 384));
//! let generator = EmbeddingGenerator::new(
//!     provider,
//!     Arc::new(MemoryCache::new()),
//!     EmbeddingConfig::new("stub-embedding-v1", 384),
//! )
//! .unwrap();
//!
//! let vector = generator.embed_query("Amazing clutch").await.unwrap();
//! assert_eq!(vector.len(), 384);
//! # });
//! ```
//!
//! ## Errors
//!
//! [`SemanticError::is_retryable`] separates transient failures (5xx,
//! throttling, timeouts) from permanent ones. Callers on the item path get
//! an [`ItemEmbedding::Pending`] instead of an error.

pub mod config;
pub mod error;
pub mod metrics;
pub mod provider;
pub mod resilience;
pub mod testing;

mod cache;
mod generator;
mod serde_millis;

pub use crate::cache::EmbeddingCache;
pub use crate::config::EmbeddingConfig;
pub use crate::error::SemanticError;
pub use crate::generator::{BatchEmbedding, EmbeddingGenerator, ItemEmbedding};
pub use crate::metrics::{EmbeddingKind, EmbeddingMetrics, NoopEmbeddingMetrics};
pub use crate::provider::{
    EmbeddingProvider, HttpEmbeddingProvider, HttpProviderConfig, StubEmbeddingProvider,
};
pub use crate::resilience::{
    CircuitBreakerConfig, CircuitState, RateLimitConfig, RetryConfig,
};
