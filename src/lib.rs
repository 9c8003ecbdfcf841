//! Workspace umbrella crate for hybrid search.
//!
//! This crate stitches the canonicalization, storage, embedding and query
//! crates together: one YAML file ([`AppConfig`]) describes the stack,
//! [`SearchStack`] wires it, and [`BackfillProcessor`] plus
//! [`BackfillScheduler`] keep item embeddings current in the background.
//!
//! ```no_run
//! use hybrid_search::{AppConfig, SearchRequest, SearchStack};
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let config = AppConfig::from_file("search.yaml")?;
//! let stack = SearchStack::builder(config).build()?;
//! stack.ensure_serving().await?;
//!
//! let response = stack.searcher.search(&SearchRequest::new("clutch ace")).await?;
//! for hit in &response.results {
//!     println!("{} {:?}", hit.id, hit.similarity_score);
//! }
//! # Ok(())
//! # }
//! ```

pub mod backfill;
pub mod config;
pub mod scheduler;
pub mod stack;

pub use crate::backfill::{
    BackfillError, BackfillOptions, BackfillProcessor, BackfillStats, CancelHandle, CursorRecord,
    CursorStore,
};
pub use crate::config::{
    AppConfig, BackendKind, BackendYamlConfig, BackfillYamlConfig, CacheYamlConfig,
    ConfigLoadError, EmbeddingYamlConfig, IndexYamlConfig, ProviderKind, SearchYamlConfig,
};
pub use crate::scheduler::{
    BackfillScheduler, CachePurger, JobMetrics, NoopJobMetrics, SchedulerHandle, SCHEDULED_JOB,
};
pub use crate::stack::{SearchStack, StackBuilder, StackError};

pub use canonical::{canonicalize_query, CanonicalError, CanonicalQuery, CanonicalizeConfig};
pub use index::{
    IndexBackend, IndexCatalog, IndexError, IndexManager, IndexStatus, ItemFilters, ItemStore,
    LifecycleError, RebuildOptions, RebuildReport, SearchableItem, VersionState,
};
pub use matcher::{
    HybridSearcher, ItemIndexer, SearchConfig, SearchError, SearchHit, SearchMetrics, SearchMode,
    SearchRequest, SearchResponse, Stage,
};
pub use semantic::{EmbeddingGenerator, EmbeddingMetrics, EmbeddingProvider, SemanticError};
