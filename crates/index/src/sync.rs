//! Namespace writes that must end up agreeing with the source of truth.
//!
//! The mutation path updates the item store first and the live namespaces
//! second. A bulk writer (rebuild, backfill) working from an older read can
//! land after it and put stale data back. [`NamespaceSync::settle`] writes
//! its snapshot, then re-reads every item from the store: an item that still
//! matches is settled, since any later mutation reaches the namespace after
//! this write; an item that changed is written again in its new state and
//! checked again.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::{EmbeddingRecord, IndexError, ItemStore, LexicalIndex, SearchableItem, VectorStore};

/// Rewrite rounds before an item that never stops changing fails the write.
pub const MAX_SETTLE_ROUNDS: usize = 8;

type Entry = (String, Option<SearchableItem>);

/// Which stores a settle writes to, and which embeddings count as current.
#[derive(Clone)]
pub struct NamespaceSync {
    lexical: Option<Arc<dyn LexicalIndex>>,
    vectors: Option<Arc<dyn VectorStore>>,
    model: String,
    dimension: usize,
}

impl NamespaceSync {
    pub fn new(model: impl Into<String>, dimension: usize) -> Self {
        Self {
            lexical: None,
            vectors: None,
            model: model.into(),
            dimension,
        }
    }

    pub fn with_lexical(mut self, lexical: Arc<dyn LexicalIndex>) -> Self {
        self.lexical = Some(lexical);
        self
    }

    pub fn with_vectors(mut self, vectors: Arc<dyn VectorStore>) -> Self {
        self.vectors = Some(vectors);
        self
    }

    /// Write `snapshot` to every namespace and repair it against `items`.
    ///
    /// Returns the items as finally written, in id order. Items deleted from
    /// the source meanwhile are removed from the namespaces and left out.
    pub async fn settle(
        &self,
        items: &dyn ItemStore,
        namespaces: &[String],
        snapshot: Vec<SearchableItem>,
    ) -> Result<Vec<SearchableItem>, IndexError> {
        let mut settled = BTreeMap::new();
        let mut round: Vec<Entry> = snapshot
            .into_iter()
            .map(|item| (item.id.clone(), Some(item)))
            .collect();

        for attempt in 0..MAX_SETTLE_ROUNDS {
            if round.is_empty() {
                break;
            }
            // The first round is additive; repairs must also clear vectors.
            self.write(namespaces, &round, attempt > 0).await?;

            let mut changed = Vec::new();
            for (id, written) in round {
                let current = items.get(&id).await?;
                if same_state(written.as_ref(), current.as_ref()) {
                    if let Some(item) = written {
                        settled.insert(id, item);
                    }
                } else {
                    tracing::debug!(id = %id, attempt, "item changed while being written, rewriting");
                    changed.push((id, current));
                }
            }
            round = changed;
        }

        if !round.is_empty() {
            return Err(IndexError::Conflict(format!(
                "{} items kept changing while being written, first {}",
                round.len(),
                round[0].0
            )));
        }
        Ok(settled.into_values().collect())
    }

    async fn write(
        &self,
        namespaces: &[String],
        entries: &[Entry],
        exact: bool,
    ) -> Result<(), IndexError> {
        let present: Vec<SearchableItem> = entries
            .iter()
            .filter_map(|(_, item)| item.clone())
            .collect();
        let gone: Vec<&str> = entries
            .iter()
            .filter(|(_, item)| item.is_none())
            .map(|(id, _)| id.as_str())
            .collect();

        for namespace in namespaces {
            if let Some(lexical) = &self.lexical {
                lexical.upsert_batch(namespace, &present).await?;
                for id in &gone {
                    lexical.remove(namespace, id).await?;
                }
            }
            if let Some(vectors) = &self.vectors {
                let records: Vec<(String, EmbeddingRecord)> = present
                    .iter()
                    .filter_map(|item| {
                        self.current_embedding(item)
                            .map(|record| (item.id.clone(), record.clone()))
                    })
                    .collect();
                vectors.upsert_batch(namespace, &records).await?;
                for id in &gone {
                    vectors.delete(namespace, id).await?;
                }
                if exact {
                    for item in present.iter().filter(|i| self.current_embedding(i).is_none()) {
                        vectors.delete(namespace, &item.id).await?;
                    }
                }
            }
        }
        Ok(())
    }

    fn current_embedding<'i>(&self, item: &'i SearchableItem) -> Option<&'i EmbeddingRecord> {
        item.embedding
            .as_ref()
            .filter(|record| record.is_current(&self.model, self.dimension))
    }
}

fn same_state(written: Option<&SearchableItem>, current: Option<&SearchableItem>) -> bool {
    match (written, current) {
        (None, None) => true,
        (Some(a), Some(b)) => a.content_hash == b.content_hash && a.embedding == b.embedding,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BackendVectorStore, InMemoryBackend, MemoryItemStore, MemoryLexicalIndex};
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use std::sync::Mutex;

    const NS: &str = "clips_v1";

    fn clip(id: &str, title: &str) -> SearchableItem {
        SearchableItem::new(id, title, Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap())
    }

    fn embedded(item: SearchableItem, x: f32) -> SearchableItem {
        item.with_embedding(EmbeddingRecord::new(vec![x, 1.0], "m1", Utc::now()))
    }

    /// Applies a scripted mutation to the source the first time an item is
    /// read back, standing in for an upsert racing the bulk write.
    struct RacingStore {
        inner: MemoryItemStore,
        lexical: Arc<MemoryLexicalIndex>,
        mutation: Mutex<Option<Entry>>,
    }

    #[async_trait]
    impl ItemStore for RacingStore {
        async fn count(&self) -> Result<usize, IndexError> {
            self.inner.count().await
        }
        async fn count_embedded(&self, model: &str, dimension: usize) -> Result<usize, IndexError> {
            self.inner.count_embedded(model, dimension).await
        }
        async fn get(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
            let pending = self.mutation.lock().unwrap().take();
            if let Some((target, state)) = pending {
                match state {
                    Some(item) => {
                        self.inner.upsert(item.clone()).await?;
                        self.lexical.upsert(NS, &item).await?;
                    }
                    None => {
                        self.inner.remove(&target).await?;
                        self.lexical.remove(NS, &target).await?;
                    }
                }
            }
            self.inner.get(id).await
        }
        async fn list_after(
            &self,
            after: Option<&str>,
            limit: usize,
        ) -> Result<Vec<SearchableItem>, IndexError> {
            self.inner.list_after(after, limit).await
        }
        async fn list_missing_embeddings(
            &self,
            after: Option<&str>,
            model: &str,
            dimension: usize,
            limit: usize,
        ) -> Result<Vec<SearchableItem>, IndexError> {
            self.inner
                .list_missing_embeddings(after, model, dimension, limit)
                .await
        }
        async fn save_embedding(
            &self,
            id: &str,
            content_hash: &str,
            record: EmbeddingRecord,
        ) -> Result<bool, IndexError> {
            self.inner.save_embedding(id, content_hash, record).await
        }
        async fn mark_pending(&self, ids: &[String]) -> Result<usize, IndexError> {
            self.inner.mark_pending(ids).await
        }
        async fn upsert(&self, item: SearchableItem) -> Result<Option<SearchableItem>, IndexError> {
            self.inner.upsert(item).await
        }
        async fn remove(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
            self.inner.remove(id).await
        }
    }

    struct Fixture {
        store: RacingStore,
        lexical: Arc<MemoryLexicalIndex>,
        vectors: Arc<BackendVectorStore>,
        sync: NamespaceSync,
    }

    async fn fixture(seed: Vec<SearchableItem>, mutation: Option<Entry>) -> Fixture {
        let lexical = Arc::new(MemoryLexicalIndex::new());
        let vectors = Arc::new(BackendVectorStore::new(Arc::new(InMemoryBackend::new())));
        let inner = MemoryItemStore::from_items(seed);
        let sync = NamespaceSync::new("m1", 2)
            .with_lexical(lexical.clone())
            .with_vectors(vectors.clone());
        Fixture {
            store: RacingStore {
                inner,
                lexical: lexical.clone(),
                mutation: Mutex::new(mutation),
            },
            lexical,
            vectors,
            sync,
        }
    }

    #[tokio::test]
    async fn unchanged_snapshot_settles_in_one_round() {
        let seed = vec![embedded(clip("a", "Ace clutch"), 0.0), clip("b", "Bomb defuse")];
        let fx = fixture(seed.clone(), None).await;
        let settled = fx
            .sync
            .settle(&fx.store, &[NS.to_string()], seed)
            .await
            .unwrap();
        assert_eq!(settled.len(), 2);
        assert_eq!(fx.lexical.count(NS).await.unwrap(), 2);
        assert_eq!(fx.vectors.count(NS).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn update_racing_the_write_wins() {
        let old = embedded(clip("a", "Ace clutch"), 0.0);
        let new = clip("a", "Quad kill on ascent");
        let fx = fixture(vec![old.clone()], Some(("a".into(), Some(new.clone())))).await;

        let settled = fx
            .sync
            .settle(&fx.store, &[NS.to_string()], vec![old])
            .await
            .unwrap();
        assert_eq!(settled, vec![new]);
        let hits = fx
            .lexical
            .search(NS, "ascent", &Default::default(), 10)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        // The new content has no embedding yet, so the stale vector is gone.
        assert!(fx.vectors.get(NS, "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_racing_the_write_is_not_undone() {
        let keep = clip("a", "Ace clutch");
        let doomed = embedded(clip("b", "Bomb defuse"), 1.0);
        let fx = fixture(vec![keep.clone(), doomed.clone()], Some(("b".into(), None))).await;

        let settled = fx
            .sync
            .settle(&fx.store, &[NS.to_string()], vec![keep, doomed])
            .await
            .unwrap();
        assert_eq!(settled.len(), 1);
        assert_eq!(fx.lexical.count(NS).await.unwrap(), 1);
        assert!(fx.vectors.get(NS, "b").await.unwrap().is_none());
    }
}
