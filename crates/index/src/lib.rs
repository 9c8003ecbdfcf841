//! # Search Index
//!
//! Storage layer for the hybrid search engine. Every persistent or cached
//! piece of state the query and mutation paths touch sits behind a trait
//! defined here, so the orchestrator and the lifecycle manager can be run
//! against in-memory fakes in tests and against redb in production.
//!
//! ## Core pieces
//!
//! - **Pluggable backends**: [`IndexBackend`] is a small ordered KV trait
//!   with prefix scans and single-key compare-and-swap. Provided:
//!   - [`InMemoryBackend`], a `BTreeMap` behind a `RwLock`;
//!   - `RedbBackend`, a persistent file (feature `backend-redb`, on by default).
//! - **Record codec**: [`CompressionConfig`] encodes records with bincode and
//!   compresses them with zstd before they reach the backend.
//! - **TTL caches**: [`CacheStore`] is the get/set/delete-with-TTL seam every
//!   cache layer is injected through. [`MemoryCache`] reads time from a
//!   [`Clock`], so tests drive expiry with a [`ManualClock`].
//! - **Data model**: [`SearchableItem`], [`ItemFilters`], [`ItemMetadata`]
//!   and the [`ItemStore`] source-of-truth trait.
//! - **Lexical index**: [`LexicalIndex`], with the BM25 [`MemoryLexicalIndex`].
//! - **Vector store**: [`VectorStore`] ranks a caller-supplied candidate set
//!   by cosine similarity. [`BackendVectorStore`] never scans a namespace.
//! - **Lifecycle**: [`IndexManager`] builds versions offline, validates them
//!   and moves a CAS-guarded alias between them.
//! - **Settled writes**: [`NamespaceSync`] writes a bulk snapshot, then
//!   re-reads the source and repairs anything a racing mutation changed.
//!
//! Every lexical and vector operation takes a *namespace*, the physical name
//! of one index version (`clips_v3`). Callers resolve it from the alias once
//! and reuse it, which is what keeps a query on a single version while a swap
//! happens underneath it.
//!
//! ## Example
//!
//! ```
//! use index::{BackendConfig, BackendVectorStore, EmbeddingRecord, IndexBackend, VectorStore};
//! use chrono::Utc;
//! use std::sync::Arc;
//!
//! let backend: Arc<dyn IndexBackend> = BackendConfig::in_memory().build().unwrap().into();
//! let store = BackendVectorStore::new(backend);
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! rt.block_on(async {
//!     let record = EmbeddingRecord::new(vec![1.0, 0.0], "m1", Utc::now());
//!     store.upsert("clips_v1", "a", &record).await.unwrap();
//!     let ranked = store
//!         .rank_within("clips_v1", &[1.0, 0.0], "m1", &["a".to_string()], 10)
//!         .await
//!         .unwrap();
//!     assert_eq!(ranked[0].id, "a");
//! });
//! ```

mod backend;
mod cache;
mod codec;
mod item;
pub mod lexical;
pub mod lifecycle;
mod sync;
pub mod vector;

#[cfg(feature = "backend-redb")]
pub use backend::RedbBackend;
pub use backend::{BackendConfig, InMemoryBackend, IndexBackend};
pub use cache::{
    get_json, set_json, CacheError, CacheStore, Clock, ManualClock, MemoryCache, SystemClock,
};
pub use codec::{CompressionCodec, CompressionConfig};
pub use item::{
    BackendItemStore, EmbeddingRecord, ItemFilters, ItemMetadata, ItemStore, MemoryItemStore,
    SearchableItem, SNIPPET_CHARS,
};
pub use lexical::{LexicalHit, LexicalIndex, MemoryLexicalIndex};
pub use lifecycle::{
    AliasRecord, CleanupReport, IndexCatalog, IndexManager, IndexStatus, IndexVersion,
    LifecycleConfig, LifecycleError, RebuildOptions, RebuildReport, SwapOutcome, VersionState,
    VersionStatus,
};
pub use sync::{NamespaceSync, MAX_SETTLE_ROUNDS};
pub use vector::{BackendVectorStore, VectorMatch, VectorStore};

use bincode::error::{DecodeError, EncodeError};
use thiserror::Error;

/// Errors raised by the storage layer.
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("Backend error: {0}")]
    Backend(String),
    #[error("Serialization encode error: {0}")]
    Encode(String),
    #[error("Serialization decode error: {0}")]
    Decode(String),
    #[error("Compression error: {0}")]
    Zstd(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("conflict: {0}")]
    Conflict(String),
}

impl From<EncodeError> for IndexError {
    fn from(e: EncodeError) -> Self {
        IndexError::Encode(e.to_string())
    }
}

impl From<DecodeError> for IndexError {
    fn from(e: DecodeError) -> Self {
        IndexError::Decode(e.to_string())
    }
}

impl From<std::io::Error> for IndexError {
    fn from(e: std::io::Error) -> Self {
        IndexError::Zstd(e.to_string())
    }
}

impl From<serde_json::Error> for IndexError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            IndexError::Decode(e.to_string())
        } else {
            IndexError::Encode(e.to_string())
        }
    }
}

impl IndexError {
    pub fn backend<E: std::fmt::Display>(err: E) -> Self {
        Self::Backend(err.to_string())
    }
}
