//! Wiring the search stack from an [`AppConfig`].

use std::sync::Arc;

use index::{
    BackendItemStore, BackendVectorStore, CacheStore, Clock, IndexBackend, IndexCatalog,
    IndexManager, ItemStore, LexicalIndex, MemoryCache, MemoryLexicalIndex, RebuildOptions,
    RebuildReport, SystemClock, VectorStore,
};
use matcher::{HybridSearcher, ItemIndexer, NoopSearchMetrics, SearchMetrics, SearchParts};
use semantic::{
    EmbeddingGenerator, EmbeddingMetrics, EmbeddingProvider, HttpEmbeddingProvider,
    NoopEmbeddingMetrics, StubEmbeddingProvider,
};
use thiserror::Error;
use tracing::info;

use crate::backfill::{BackfillProcessor, CursorStore};
use crate::config::{AppConfig, ConfigLoadError, ProviderKind};

#[derive(Debug, Error)]
pub enum StackError {
    #[error(transparent)]
    Config(#[from] ConfigLoadError),
    #[error("storage: {0}")]
    Index(#[from] index::IndexError),
    #[error("embedding: {0}")]
    Semantic(#[from] semantic::SemanticError),
    #[error("search: {0}")]
    Search(#[from] matcher::SearchError),
    #[error("lifecycle: {0}")]
    Lifecycle(#[from] index::LifecycleError),
}

/// Everything a binary needs, built once and shared behind `Arc`s.
#[derive(Clone)]
pub struct SearchStack {
    pub config: AppConfig,
    pub backend: Arc<dyn IndexBackend>,
    pub catalog: IndexCatalog,
    pub items: Arc<dyn ItemStore>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub vectors: Arc<dyn VectorStore>,
    pub cache: Arc<dyn CacheStore>,
    pub clock: Arc<dyn Clock>,
    pub embeddings: Arc<EmbeddingGenerator>,
    pub searcher: Arc<HybridSearcher>,
    pub indexer: ItemIndexer,
    pub manager: Arc<IndexManager>,
    pub backfill: Arc<BackfillProcessor>,
}

/// Overrides for [`SearchStack`] construction. Anything left unset is built
/// from the configuration.
#[derive(Default)]
pub struct StackBuilder {
    config: AppConfig,
    backend: Option<Arc<dyn IndexBackend>>,
    provider: Option<Arc<dyn EmbeddingProvider>>,
    clock: Option<Arc<dyn Clock>>,
    cache: Option<Arc<dyn CacheStore>>,
    search_metrics: Option<Arc<dyn SearchMetrics>>,
    embedding_metrics: Option<Arc<dyn EmbeddingMetrics>>,
}

impl StackBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn backend(mut self, backend: Arc<dyn IndexBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn provider(mut self, provider: Arc<dyn EmbeddingProvider>) -> Self {
        self.provider = Some(provider);
        self
    }

    /// Clock for cache expiry and timestamps.
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn cache(mut self, cache: Arc<dyn CacheStore>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn search_metrics(mut self, metrics: Arc<dyn SearchMetrics>) -> Self {
        self.search_metrics = Some(metrics);
        self
    }

    pub fn embedding_metrics(mut self, metrics: Arc<dyn EmbeddingMetrics>) -> Self {
        self.embedding_metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<SearchStack, StackError> {
        let config = self.config;
        config.validate()?;

        let backend: Arc<dyn IndexBackend> = match self.backend {
            Some(backend) => backend,
            None => config.backend_config().build()?.into(),
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let cache = self
            .cache
            .unwrap_or_else(|| Arc::new(MemoryCache::with_clock(clock.clone())));
        let provider = match self.provider {
            Some(provider) => provider,
            None => default_provider(&config)?,
        };

        let catalog = IndexCatalog::new(backend.clone());
        let items: Arc<dyn ItemStore> = Arc::new(BackendItemStore::new(backend.clone()));
        let lexical: Arc<dyn LexicalIndex> = Arc::new(MemoryLexicalIndex::new());
        let vectors: Arc<dyn VectorStore> = Arc::new(BackendVectorStore::new(backend.clone()));

        let embeddings = Arc::new(
            EmbeddingGenerator::new(provider, cache.clone(), config.embedding_config())?
                .with_clock(clock.clone())
                .with_metrics(
                    self.embedding_metrics
                        .unwrap_or_else(|| Arc::new(NoopEmbeddingMetrics)),
                ),
        );

        let parts = SearchParts {
            index_name: config.index.name.clone(),
            catalog: catalog.clone(),
            items: items.clone(),
            lexical: lexical.clone(),
            vectors: vectors.clone(),
            embeddings: embeddings.clone(),
            cache: cache.clone(),
        };
        let searcher = Arc::new(
            HybridSearcher::new(parts.clone(), config.search_config())?.with_metrics(
                self.search_metrics
                    .unwrap_or_else(|| Arc::new(NoopSearchMetrics)),
            ),
        );
        let indexer = ItemIndexer::new(parts);
        let manager = Arc::new(IndexManager::new(
            catalog.clone(),
            items.clone(),
            lexical.clone(),
            vectors.clone(),
            clock.clone(),
            config.lifecycle_config(),
        )?);
        let backfill = Arc::new(BackfillProcessor::new(
            config.index.name.clone(),
            catalog.clone(),
            items.clone(),
            vectors.clone(),
            embeddings.clone(),
            CursorStore::new(backend.clone()),
            clock.clone(),
        ));

        Ok(SearchStack {
            config,
            backend,
            catalog,
            items,
            lexical,
            vectors,
            cache,
            clock,
            embeddings,
            searcher,
            indexer,
            manager,
            backfill,
        })
    }
}

fn default_provider(config: &AppConfig) -> Result<Arc<dyn EmbeddingProvider>, StackError> {
    match config.embedding.provider {
        ProviderKind::Stub => Ok(Arc::new(StubEmbeddingProvider::new(
            config.embedding.model.clone(),
            config.embedding.dimension,
        ))),
        ProviderKind::Http => Ok(Arc::new(HttpEmbeddingProvider::new(
            config.http_provider_config()?,
        )?)),
    }
}

impl SearchStack {
    pub fn builder(config: AppConfig) -> StackBuilder {
        StackBuilder::new(config)
    }

    pub fn index_name(&self) -> &str {
        &self.config.index.name
    }

    /// Make sure the default index can serve queries.
    ///
    /// The lexical engine lives in process memory, so after a restart the
    /// ACTIVE version's lexical namespace is empty while the catalog, items
    /// and vectors survive in the backend. That case, and a fresh install
    /// with no ACTIVE version, are fixed with a rebuild. Returns the rebuild
    /// report when one ran.
    pub async fn ensure_serving(&self) -> Result<Option<RebuildReport>, StackError> {
        let name = self.index_name();
        let needs_build = match self.catalog.active_namespace(name)? {
            None => true,
            Some(namespace) => {
                let indexed = self.lexical.count(&namespace).await?;
                indexed == 0 && self.items.count().await? > 0
            }
        };
        if !needs_build {
            return Ok(None);
        }
        info!(event = "index.warmup", index = %name, "building a servable version");
        let report = self
            .manager
            .rebuild(
                name,
                RebuildOptions {
                    holder: Some("startup".into()),
                    ..RebuildOptions::default()
                },
            )
            .await?;
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use index::SearchableItem;
    use chrono::Utc;
    use matcher::SearchRequest;

    #[tokio::test]
    async fn default_stack_serves_after_warmup() {
        let stack = SearchStack::builder(AppConfig::default()).build().unwrap();
        let report = stack.ensure_serving().await.unwrap().unwrap();
        assert_eq!(report.physical_name, "clips_v1");
        assert!(stack.ensure_serving().await.unwrap().is_none());

        stack
            .indexer
            .upsert(SearchableItem::new("a", "Clutch ace", Utc::now()))
            .await
            .unwrap();
        let resp = stack
            .searcher
            .search(&SearchRequest::new("clutch"))
            .await
            .unwrap();
        assert_eq!(resp.results[0].id, "a");
    }

    #[tokio::test]
    async fn restart_rebuilds_empty_lexical_namespace() {
        let backend: Arc<dyn IndexBackend> = Arc::new(index::InMemoryBackend::new());
        let first = SearchStack::builder(AppConfig::default())
            .backend(backend.clone())
            .build()
            .unwrap();
        first.ensure_serving().await.unwrap();
        first
            .indexer
            .upsert(SearchableItem::new("a", "Clutch ace", Utc::now()))
            .await
            .unwrap();

        // Same backend, fresh process memory.
        let second = SearchStack::builder(AppConfig::default())
            .backend(backend)
            .build()
            .unwrap();
        let report = second.ensure_serving().await.unwrap().unwrap();
        assert_eq!(report.doc_count, 1);
        assert_eq!(report.physical_name, "clips_v2");
    }
}
