//! Item mutation path.
//!
//! Upserts and deletes go to the source of truth first, then to every live
//! physical namespace of the index: the ACTIVE one plus any version still
//! BUILDING or READY, so a rebuild that started before the mutation does not
//! lose it.

use std::sync::Arc;

use index::{CacheStore, IndexCatalog, ItemStore, LexicalIndex, SearchableItem, VectorStore};
use semantic::{EmbeddingGenerator, ItemEmbedding};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::engine::metadata_cache_key;
use crate::types::SearchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertStatus {
    Created,
    Updated,
    /// Same content and a current embedding were already stored.
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    pub id: String,
    pub status: UpsertStatus,
    /// Stored without a vector; backfill will retry it.
    pub embedding_pending: bool,
    /// Physical namespaces written.
    pub namespaces: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoveStatus {
    Removed,
    NotFound,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemoveReport {
    pub id: String,
    pub status: RemoveStatus,
    pub namespaces: Vec<String>,
}

/// Keeps the source of truth, the lexical index and the vector store in step
/// for single-item mutations.
#[derive(Clone)]
pub struct ItemIndexer {
    index_name: String,
    catalog: IndexCatalog,
    items: Arc<dyn ItemStore>,
    lexical: Arc<dyn LexicalIndex>,
    vectors: Arc<dyn VectorStore>,
    embeddings: Arc<EmbeddingGenerator>,
    cache: Arc<dyn CacheStore>,
}

impl ItemIndexer {
    pub fn new(parts: crate::engine::SearchParts) -> Self {
        Self {
            index_name: parts.index_name,
            catalog: parts.catalog,
            items: parts.items,
            lexical: parts.lexical,
            vectors: parts.vectors,
            embeddings: parts.embeddings,
            cache: parts.cache,
        }
    }

    pub fn index_name(&self) -> &str {
        &self.index_name
    }

    /// Namespaces a mutation must reach right now.
    pub fn live_namespaces(&self) -> Result<Vec<String>, SearchError> {
        Ok(self.catalog.live_namespaces(&self.index_name)?)
    }

    /// Insert or replace one item. Calling it twice with the same content is
    /// a no-op the second time.
    pub async fn upsert(&self, mut item: SearchableItem) -> Result<UpsertReport, SearchError> {
        validate(&item)?;
        item.refresh_content_hash();

        let model = self.embeddings.model().to_string();
        let dimension = self.embeddings.dimension();
        let previous = self.items.get(&item.id).await?;

        let unchanged = previous.as_ref().is_some_and(|prev| {
            prev.content_hash == item.content_hash && prev.has_current_embedding(&model, dimension)
        });
        if unchanged {
            debug!(id = %item.id, "upsert unchanged");
            return Ok(UpsertReport {
                id: item.id,
                status: UpsertStatus::Unchanged,
                embedding_pending: false,
                namespaces: Vec::new(),
            });
        }

        let reusable = previous
            .as_ref()
            .filter(|prev| prev.content_hash == item.content_hash)
            .and_then(|prev| prev.embedding.clone())
            .filter(|record| record.is_current(&model, dimension));
        let supplied = item
            .embedding
            .take()
            .filter(|record| record.is_current(&model, dimension));

        let embedding = match reusable.or(supplied) {
            Some(record) => Some(record),
            None => match self.embeddings.embed_item(&item).await {
                ItemEmbedding::Ready(record) => Some(record),
                ItemEmbedding::Pending(_) => None,
            },
        };
        item.embedding_pending = embedding.is_none();
        item.embedding = embedding;

        let status = if previous.is_some() {
            UpsertStatus::Updated
        } else {
            UpsertStatus::Created
        };

        self.items.upsert(item.clone()).await?;

        let namespaces = self.live_namespaces()?;
        for namespace in &namespaces {
            self.lexical.upsert(namespace, &item).await?;
            match &item.embedding {
                Some(record) => self.vectors.upsert(namespace, &item.id, record).await?,
                None => {
                    self.vectors.delete(namespace, &item.id).await?;
                }
            }
        }
        self.evict_metadata(&item.id).await;

        info!(
            event = "item.upserted",
            id = %item.id,
            status = ?status,
            embedding_pending = item.embedding_pending,
            namespaces = namespaces.len(),
            "item indexed"
        );
        Ok(UpsertReport {
            id: item.id,
            status,
            embedding_pending: item.embedding_pending,
            namespaces,
        })
    }

    /// Delete one item everywhere. Deleting an unknown id reports `NotFound`.
    pub async fn remove(&self, id: &str) -> Result<RemoveReport, SearchError> {
        if id.trim().is_empty() {
            return Err(SearchError::InvalidRequest("item id must not be empty".into()));
        }
        let previous = self.items.remove(id).await?;
        let namespaces = self.live_namespaces()?;
        for namespace in &namespaces {
            self.lexical.remove(namespace, id).await?;
            self.vectors.delete(namespace, id).await?;
        }
        self.evict_metadata(id).await;

        let status = if previous.is_some() {
            RemoveStatus::Removed
        } else {
            RemoveStatus::NotFound
        };
        info!(event = "item.removed", id = %id, status = ?status, "item removed");
        Ok(RemoveReport {
            id: id.to_string(),
            status,
            namespaces,
        })
    }

    async fn evict_metadata(&self, id: &str) {
        if let Err(err) = self.cache.delete(&metadata_cache_key(id)).await {
            warn!(event = "cache.unavailable", layer = "metadata", id = %id, error = %err, "metadata eviction failed");
        }
    }
}

fn validate(item: &SearchableItem) -> Result<(), SearchError> {
    if item.id.trim().is_empty() {
        return Err(SearchError::InvalidRequest("item id must not be empty".into()));
    }
    if item.id.contains('/') {
        return Err(SearchError::InvalidRequest(format!(
            "item id {:?} must not contain '/'",
            item.id
        )));
    }
    if item.title.trim().is_empty() {
        return Err(SearchError::InvalidRequest("item title must not be empty".into()));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::SearchParts;
    use chrono::{TimeZone, Utc};
    use index::{
        get_json, set_json, BackendVectorStore, InMemoryBackend, IndexBackend, IndexManager,
        ItemMetadata, LifecycleConfig, MemoryCache, MemoryItemStore,
        MemoryLexicalIndex, RebuildOptions, SystemClock,
    };
    use semantic::testing::ScriptedProvider;
    use semantic::{EmbeddingConfig, RetryConfig, SemanticError};
    use std::time::Duration;

    const MODEL: &str = "test-model";
    const DIM: usize = 8;

    struct Fixture {
        indexer: ItemIndexer,
        manager: IndexManager,
        provider: Arc<ScriptedProvider>,
        items: Arc<MemoryItemStore>,
        lexical: Arc<MemoryLexicalIndex>,
        vectors: Arc<BackendVectorStore>,
        cache: Arc<MemoryCache>,
    }

    fn fixture() -> Fixture {
        let backend: Arc<dyn IndexBackend> = Arc::new(InMemoryBackend::new());
        let catalog = IndexCatalog::new(backend.clone());
        let items = Arc::new(MemoryItemStore::new());
        let lexical = Arc::new(MemoryLexicalIndex::new());
        let vectors = Arc::new(BackendVectorStore::new(backend));
        let cache = Arc::new(MemoryCache::new());
        let provider = Arc::new(ScriptedProvider::new(MODEL, DIM));
        let config = EmbeddingConfig::new(MODEL, DIM)
            .with_retry(RetryConfig::default().with_base_delay(Duration::from_millis(1)));
        let embeddings =
            Arc::new(EmbeddingGenerator::new(provider.clone(), cache.clone(), config).unwrap());
        let manager = IndexManager::new(
            catalog.clone(),
            items.clone(),
            lexical.clone(),
            vectors.clone(),
            Arc::new(SystemClock),
            LifecycleConfig::default().with_embedding(MODEL, DIM),
        )
        .unwrap();
        let indexer = ItemIndexer::new(SearchParts {
            index_name: "clips".into(),
            catalog,
            items: items.clone(),
            lexical: lexical.clone(),
            vectors: vectors.clone(),
            embeddings,
            cache: cache.clone(),
        });
        Fixture {
            indexer,
            manager,
            provider,
            items,
            lexical,
            vectors,
            cache,
        }
    }

    fn clip(id: &str, title: &str) -> SearchableItem {
        SearchableItem::new(id, title, Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap())
            .with_category("highlights")
    }

    async fn activate(f: &Fixture) -> String {
        let report = f.manager.rebuild("clips", RebuildOptions::default()).await.unwrap();
        report.physical_name
    }

    #[tokio::test]
    async fn second_identical_upsert_is_a_noop() {
        let f = fixture();
        let ns = activate(&f).await;

        let first = f.indexer.upsert(clip("a", "Ace clutch")).await.unwrap();
        assert_eq!(first.status, UpsertStatus::Created);
        assert_eq!(first.namespaces, vec![ns.clone()]);
        let calls = f.provider.calls();

        let second = f.indexer.upsert(clip("a", "Ace clutch")).await.unwrap();
        assert_eq!(second.status, UpsertStatus::Unchanged);
        assert_eq!(f.provider.calls(), calls);
        assert_eq!(f.lexical.count(&ns).await.unwrap(), 1);
        assert_eq!(f.vectors.count(&ns).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn changed_content_is_reembedded_and_reindexed() {
        let f = fixture();
        let ns = activate(&f).await;
        f.indexer.upsert(clip("a", "Ace clutch")).await.unwrap();
        let before = f.vectors.get(&ns, "a").await.unwrap().unwrap();

        let report = f.indexer.upsert(clip("a", "Quad kill on ascent")).await.unwrap();
        assert_eq!(report.status, UpsertStatus::Updated);
        let after = f.vectors.get(&ns, "a").await.unwrap().unwrap();
        assert_ne!(before.vector, after.vector);

        let hits = f
            .lexical
            .search(&ns, "ascent", &Default::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn provider_outage_leaves_item_pending_but_findable() {
        let f = fixture();
        let ns = activate(&f).await;
        f.provider
            .fail_always(Some(SemanticError::Upstream("503".into())));

        let report = f.indexer.upsert(clip("p", "Pending clutch")).await.unwrap();
        assert!(report.embedding_pending);
        let stored = f.items.get("p").await.unwrap().unwrap();
        assert!(stored.embedding_pending);
        assert!(stored.embedding.is_none());
        assert!(f.vectors.get(&ns, "p").await.unwrap().is_none());

        let hits = f
            .lexical
            .search(&ns, "pending", &Default::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits[0].id, "p");
    }

    #[tokio::test]
    async fn pending_item_is_not_reported_unchanged() {
        let f = fixture();
        activate(&f).await;
        f.provider
            .fail_always(Some(SemanticError::Upstream("503".into())));
        f.indexer.upsert(clip("p", "Pending clutch")).await.unwrap();

        f.provider.fail_always(None);
        let report = f.indexer.upsert(clip("p", "Pending clutch")).await.unwrap();
        assert_eq!(report.status, UpsertStatus::Updated);
        assert!(!report.embedding_pending);
    }

    #[tokio::test]
    async fn remove_is_idempotent_and_evicts_metadata() {
        let f = fixture();
        let ns = activate(&f).await;
        f.indexer.upsert(clip("a", "Ace clutch")).await.unwrap();
        let item = f.items.get("a").await.unwrap().unwrap();
        set_json(
            f.cache.as_ref(),
            &metadata_cache_key("a"),
            &item.metadata(),
            Duration::from_secs(60),
        )
        .await
        .unwrap();

        let removed = f.indexer.remove("a").await.unwrap();
        assert_eq!(removed.status, RemoveStatus::Removed);
        assert_eq!(f.lexical.count(&ns).await.unwrap(), 0);
        assert!(f.vectors.get(&ns, "a").await.unwrap().is_none());
        let cached: Option<ItemMetadata> =
            get_json(f.cache.as_ref(), &metadata_cache_key("a")).await.unwrap();
        assert!(cached.is_none());

        let again = f.indexer.remove("a").await.unwrap();
        assert_eq!(again.status, RemoveStatus::NotFound);
    }

    #[tokio::test]
    async fn without_active_version_only_source_is_written() {
        let f = fixture();
        let report = f.indexer.upsert(clip("a", "Ace clutch")).await.unwrap();
        assert!(report.namespaces.is_empty());
        assert!(f.items.get("a").await.unwrap().is_some());

        // The first rebuild picks it up from the source of truth.
        let ns = activate(&f).await;
        assert_eq!(f.lexical.count(&ns).await.unwrap(), 1);
        assert_eq!(f.vectors.count(&ns).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn upsert_reaches_version_awaiting_swap() {
        let f = fixture();
        let active = activate(&f).await;
        let ready = f
            .manager
            .rebuild("clips", RebuildOptions::without_swap())
            .await
            .unwrap()
            .physical_name;

        let report = f.indexer.upsert(clip("a", "Ace clutch")).await.unwrap();
        assert_eq!(report.namespaces, vec![active, ready.clone()]);

        f.manager.swap("clips", None).await.unwrap();
        assert_eq!(f.lexical.count(&ready).await.unwrap(), 1);
        assert!(f.vectors.get(&ready, "a").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn invalid_items_are_rejected() {
        let f = fixture();
        for bad in [clip("", "title"), clip("a/b", "title"), clip("a", "  ")] {
            assert!(matches!(
                f.indexer.upsert(bad).await,
                Err(SearchError::InvalidRequest(_))
            ));
        }
    }

    #[tokio::test]
    async fn supplied_current_embedding_skips_the_provider() {
        let f = fixture();
        activate(&f).await;
        let record = index::EmbeddingRecord::new(vec![0.5; DIM], MODEL, Utc::now());
        let report = f
            .indexer
            .upsert(clip("e", "Eco round").with_embedding(record))
            .await
            .unwrap();
        assert!(!report.embedding_pending);
        assert_eq!(f.provider.calls(), 0);
    }
}
