//! Item data model and the source-of-truth store.

use crate::{CompressionConfig, IndexBackend, IndexError};
use async_trait::async_trait;
use canonical::{compose_item_text, content_hash, ItemFields};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

/// Snippet length in characters.
pub const SNIPPET_CHARS: usize = 160;

/// A stored embedding together with the model that produced it.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingRecord {
    pub vector: Vec<f32>,
    pub model: String,
    pub embedded_at: DateTime<Utc>,
}

impl EmbeddingRecord {
    pub fn new(vector: Vec<f32>, model: impl Into<String>, embedded_at: DateTime<Utc>) -> Self {
        Self {
            vector,
            model: model.into(),
            embedded_at,
        }
    }

    /// Whether this record was produced by `model` at `dimension`.
    pub fn is_current(&self, model: &str, dimension: usize) -> bool {
        self.model == model && self.vector.len() == dimension
    }
}

/// A searchable content item as held by the source of truth.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SearchableItem {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub game: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub embedding: Option<EmbeddingRecord>,
    #[serde(default)]
    pub embedding_pending: bool,
    /// Hash of the indexed fields, filled by [`SearchableItem::refresh_content_hash`].
    #[serde(default)]
    pub content_hash: String,
}

impl SearchableItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        let mut item = Self {
            id: id.into(),
            title: title.into(),
            description: None,
            category: None,
            game: None,
            owner: None,
            tags: Vec::new(),
            created_at,
            embedding: None,
            embedding_pending: false,
            content_hash: String::new(),
        };
        item.refresh_content_hash();
        item
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self.refresh_content_hash();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self.refresh_content_hash();
        self
    }

    pub fn with_game(mut self, game: impl Into<String>) -> Self {
        self.game = Some(game.into());
        self.refresh_content_hash();
        self
    }

    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self.refresh_content_hash();
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self.refresh_content_hash();
        self
    }

    pub fn with_embedding(mut self, embedding: EmbeddingRecord) -> Self {
        self.embedding = Some(embedding);
        self.embedding_pending = false;
        self
    }

    pub fn fields(&self) -> ItemFields<'_> {
        ItemFields {
            title: &self.title,
            game: self.game.as_deref(),
            category: self.category.as_deref(),
            description: self.description.as_deref(),
            tags: &self.tags,
        }
    }

    /// Field-order-stable text the item is embedded from.
    pub fn embedding_text(&self) -> String {
        compose_item_text(&self.fields())
    }

    /// Hash of everything that is indexed or filtered on.
    pub fn compute_content_hash(&self) -> String {
        content_hash([
            self.embedding_text(),
            self.owner.clone().unwrap_or_default(),
            self.created_at.to_rfc3339(),
        ])
    }

    pub fn refresh_content_hash(&mut self) {
        self.content_hash = self.compute_content_hash();
    }

    pub fn has_current_embedding(&self, model: &str, dimension: usize) -> bool {
        self.embedding
            .as_ref()
            .is_some_and(|e| e.is_current(model, dimension))
    }

    /// Words fed to the lexical index.
    pub fn lexical_text(&self) -> String {
        let mut text = self.title.clone();
        for part in [&self.description, &self.category, &self.game]
            .into_iter()
            .flatten()
        {
            text.push(' ');
            text.push_str(part);
        }
        for tag in &self.tags {
            text.push(' ');
            text.push_str(tag);
        }
        text
    }

    pub fn metadata(&self) -> ItemMetadata {
        ItemMetadata {
            id: self.id.clone(),
            title: self.title.clone(),
            snippet: snippet(self.description.as_deref(), &self.title),
            category: self.category.clone(),
            owner: self.owner.clone(),
            created_at: self.created_at,
            tags: self.tags.clone(),
        }
    }
}

fn snippet(description: Option<&str>, title: &str) -> String {
    match description.map(str::trim).filter(|d| !d.is_empty()) {
        Some(desc) => match desc.char_indices().nth(SNIPPET_CHARS) {
            Some((cut, _)) => desc[..cut].to_string(),
            None => desc.to_string(),
        },
        None => title.to_string(),
    }
}

/// Display projection attached to results.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ItemMetadata {
    pub id: String,
    pub title: String,
    pub snippet: String,
    pub category: Option<String>,
    pub owner: Option<String>,
    pub created_at: DateTime<Utc>,
    pub tags: Vec<String>,
}

/// Query-time filters, applied inside the lexical index.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemFilters {
    /// Case-insensitive equality.
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub owner: Option<String>,
    /// Inclusive lower bound.
    #[serde(default)]
    pub created_after: Option<DateTime<Utc>>,
    /// Inclusive upper bound.
    #[serde(default)]
    pub created_before: Option<DateTime<Utc>>,
    /// Every listed tag must be present (case-insensitive).
    #[serde(default)]
    pub tags: Vec<String>,
}

impl ItemFilters {
    pub fn is_empty(&self) -> bool {
        self.category.is_none()
            && self.owner.is_none()
            && self.created_after.is_none()
            && self.created_before.is_none()
            && self.tags.is_empty()
    }

    pub fn matches(&self, item: &SearchableItem) -> bool {
        self.matches_parts(
            item.category.as_deref(),
            item.owner.as_deref(),
            item.created_at,
            &item.tags,
        )
    }

    pub(crate) fn matches_parts(
        &self,
        category: Option<&str>,
        owner: Option<&str>,
        created_at: DateTime<Utc>,
        tags: &[String],
    ) -> bool {
        if let Some(want) = &self.category {
            if !category.is_some_and(|c| c.to_lowercase() == want.to_lowercase()) {
                return false;
            }
        }
        if let Some(want) = &self.owner {
            if owner != Some(want.as_str()) {
                return false;
            }
        }
        if self.created_after.is_some_and(|after| created_at < after) {
            return false;
        }
        if self.created_before.is_some_and(|before| created_at > before) {
            return false;
        }
        self.tags.iter().all(|want| {
            let want = want.to_lowercase();
            tags.iter().any(|t| t.to_lowercase() == want)
        })
    }

    /// Stable fragment for cache keys: tags are sorted and lowercased.
    pub fn cache_fragment(&self) -> String {
        let mut tags: Vec<String> = self.tags.iter().map(|t| t.to_lowercase()).collect();
        tags.sort_unstable();
        tags.dedup();
        format!(
            "c={}|o={}|a={}|b={}|t={}",
            self.category.as_deref().unwrap_or("").to_lowercase(),
            self.owner.as_deref().unwrap_or(""),
            self.created_after.map(|t| t.timestamp_millis()).unwrap_or(i64::MIN),
            self.created_before.map(|t| t.timestamp_millis()).unwrap_or(i64::MAX),
            tags.join(",")
        )
    }
}

/// Source of truth for items, owned by an external CRUD service.
#[async_trait]
pub trait ItemStore: Send + Sync {
    async fn count(&self) -> Result<usize, IndexError>;
    /// Items holding an embedding from `model` at `dimension`.
    async fn count_embedded(&self, model: &str, dimension: usize) -> Result<usize, IndexError>;
    async fn get(&self, id: &str) -> Result<Option<SearchableItem>, IndexError>;
    /// Up to `limit` items with id strictly greater than `after`, in id order.
    async fn list_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchableItem>, IndexError>;
    /// Like [`ItemStore::list_after`], restricted to items lacking a current embedding.
    async fn list_missing_embeddings(
        &self,
        after: Option<&str>,
        model: &str,
        dimension: usize,
        limit: usize,
    ) -> Result<Vec<SearchableItem>, IndexError>;
    /// Store an embedding computed from the item as it was when its hash was
    /// `content_hash`, and clear the pending flag. `false`, with nothing
    /// written, when the item is gone or its content has changed since.
    async fn save_embedding(
        &self,
        id: &str,
        content_hash: &str,
        record: EmbeddingRecord,
    ) -> Result<bool, IndexError>;
    /// Flag items for a later backfill. Returns how many existed.
    async fn mark_pending(&self, ids: &[String]) -> Result<usize, IndexError>;
    /// Insert or replace; returns the previous version.
    async fn upsert(&self, item: SearchableItem) -> Result<Option<SearchableItem>, IndexError>;
    async fn remove(&self, id: &str) -> Result<Option<SearchableItem>, IndexError>;
}

/// `BTreeMap`-backed store kept in id order.
#[derive(Default)]
pub struct MemoryItemStore {
    items: RwLock<BTreeMap<String, SearchableItem>>,
}

impl MemoryItemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_items<I: IntoIterator<Item = SearchableItem>>(items: I) -> Self {
        let map = items
            .into_iter()
            .map(|item| (item.id.clone(), item))
            .collect();
        Self {
            items: RwLock::new(map),
        }
    }

    fn read(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, BTreeMap<String, SearchableItem>>, IndexError> {
        self.items
            .read()
            .map_err(|_| IndexError::backend("poisoned lock"))
    }

    fn write(
        &self,
    ) -> Result<std::sync::RwLockWriteGuard<'_, BTreeMap<String, SearchableItem>>, IndexError> {
        self.items
            .write()
            .map_err(|_| IndexError::backend("poisoned lock"))
    }
}

fn after_bound(after: Option<&str>) -> std::ops::Bound<String> {
    match after {
        Some(id) => std::ops::Bound::Excluded(id.to_string()),
        None => std::ops::Bound::Unbounded,
    }
}

#[async_trait]
impl ItemStore for MemoryItemStore {
    async fn count(&self) -> Result<usize, IndexError> {
        Ok(self.read()?.len())
    }

    async fn count_embedded(&self, model: &str, dimension: usize) -> Result<usize, IndexError> {
        Ok(self
            .read()?
            .values()
            .filter(|item| item.has_current_embedding(model, dimension))
            .count())
    }

    async fn get(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
        Ok(self.read()?.get(id).cloned())
    }

    async fn list_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchableItem>, IndexError> {
        let guard = self.read()?;
        Ok(guard
            .range((after_bound(after), std::ops::Bound::Unbounded))
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn list_missing_embeddings(
        &self,
        after: Option<&str>,
        model: &str,
        dimension: usize,
        limit: usize,
    ) -> Result<Vec<SearchableItem>, IndexError> {
        let guard = self.read()?;
        Ok(guard
            .range((after_bound(after), std::ops::Bound::Unbounded))
            .filter(|(_, item)| !item.has_current_embedding(model, dimension))
            .take(limit)
            .map(|(_, item)| item.clone())
            .collect())
    }

    async fn save_embedding(
        &self,
        id: &str,
        content_hash: &str,
        record: EmbeddingRecord,
    ) -> Result<bool, IndexError> {
        let mut guard = self.write()?;
        match guard.get_mut(id) {
            Some(item) if item.content_hash == content_hash => {
                item.embedding = Some(record);
                item.embedding_pending = false;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_pending(&self, ids: &[String]) -> Result<usize, IndexError> {
        let mut guard = self.write()?;
        let mut marked = 0;
        for id in ids {
            if let Some(item) = guard.get_mut(id) {
                item.embedding_pending = true;
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn upsert(&self, item: SearchableItem) -> Result<Option<SearchableItem>, IndexError> {
        Ok(self.write()?.insert(item.id.clone(), item))
    }

    async fn remove(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
        Ok(self.write()?.remove(id))
    }
}

const ITEM_PREFIX: &str = "item/";

/// Item store persisted in an [`IndexBackend`] under `item/<id>`.
///
/// Keys sort by id, so listing is a bounded prefix scan. Writes are not
/// transactional across items.
pub struct BackendItemStore {
    backend: Arc<dyn IndexBackend>,
    compression: CompressionConfig,
}

impl BackendItemStore {
    pub fn new(backend: Arc<dyn IndexBackend>) -> Self {
        Self {
            backend,
            compression: CompressionConfig::default(),
        }
    }

    pub fn with_compression(mut self, compression: CompressionConfig) -> Self {
        self.compression = compression;
        self
    }

    fn key(id: &str) -> String {
        format!("{ITEM_PREFIX}{id}")
    }

    fn load(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
        match self.backend.get(&Self::key(id))? {
            Some(bytes) => Ok(Some(self.compression.decode(&bytes)?)),
            None => Ok(None),
        }
    }

    fn store(&self, item: &SearchableItem) -> Result<(), IndexError> {
        let bytes = self.compression.encode(item)?;
        self.backend.put(&Self::key(&item.id), &bytes)
    }

    /// Read-modify-write one item with compare-and-put, so a concurrent
    /// upsert is never overwritten by the stale copy. `apply` returns `false`
    /// to leave the item untouched.
    fn update<F>(&self, id: &str, mut apply: F) -> Result<bool, IndexError>
    where
        F: FnMut(&mut SearchableItem) -> bool,
    {
        let key = Self::key(id);
        for _ in 0..16 {
            let Some(raw) = self.backend.get(&key)? else {
                return Ok(false);
            };
            let mut item: SearchableItem = self.compression.decode(&raw)?;
            if !apply(&mut item) {
                return Ok(false);
            }
            let bytes = self.compression.encode(&item)?;
            if self.backend.compare_and_put(&key, Some(&raw), &bytes)? {
                return Ok(true);
            }
        }
        Err(IndexError::Conflict(format!("item {id} is contended")))
    }

    fn scan<F>(&self, after: Option<&str>, mut keep: F) -> Result<(), IndexError>
    where
        F: FnMut(SearchableItem) -> bool,
    {
        let mut done = false;
        self.backend.scan_prefix(ITEM_PREFIX, &mut |key, bytes| {
            if done {
                return Ok(());
            }
            let id = &key[ITEM_PREFIX.len()..];
            if after.is_some_and(|a| id <= a) {
                return Ok(());
            }
            let item: SearchableItem = self.compression.decode(bytes)?;
            done = !keep(item);
            Ok(())
        })
    }
}

#[async_trait]
impl ItemStore for BackendItemStore {
    async fn count(&self) -> Result<usize, IndexError> {
        let mut n = 0;
        self.backend.scan_prefix(ITEM_PREFIX, &mut |_, _| {
            n += 1;
            Ok(())
        })?;
        Ok(n)
    }

    async fn count_embedded(&self, model: &str, dimension: usize) -> Result<usize, IndexError> {
        let mut n = 0;
        self.scan(None, |item| {
            if item.has_current_embedding(model, dimension) {
                n += 1;
            }
            true
        })?;
        Ok(n)
    }

    async fn get(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
        self.load(id)
    }

    async fn list_after(
        &self,
        after: Option<&str>,
        limit: usize,
    ) -> Result<Vec<SearchableItem>, IndexError> {
        let mut out = Vec::with_capacity(limit.min(1024));
        if limit == 0 {
            return Ok(out);
        }
        self.scan(after, |item| {
            out.push(item);
            out.len() < limit
        })?;
        Ok(out)
    }

    async fn list_missing_embeddings(
        &self,
        after: Option<&str>,
        model: &str,
        dimension: usize,
        limit: usize,
    ) -> Result<Vec<SearchableItem>, IndexError> {
        let mut out = Vec::new();
        if limit == 0 {
            return Ok(out);
        }
        self.scan(after, |item| {
            if !item.has_current_embedding(model, dimension) {
                out.push(item);
            }
            out.len() < limit
        })?;
        Ok(out)
    }

    async fn save_embedding(
        &self,
        id: &str,
        content_hash: &str,
        record: EmbeddingRecord,
    ) -> Result<bool, IndexError> {
        self.update(id, |item| {
            if item.content_hash != content_hash {
                return false;
            }
            item.embedding = Some(record.clone());
            item.embedding_pending = false;
            true
        })
    }

    async fn mark_pending(&self, ids: &[String]) -> Result<usize, IndexError> {
        let mut marked = 0;
        for id in ids {
            if self.update(id, |item| {
                item.embedding_pending = true;
                true
            })? {
                marked += 1;
            }
        }
        Ok(marked)
    }

    async fn upsert(&self, item: SearchableItem) -> Result<Option<SearchableItem>, IndexError> {
        let previous = self.load(&item.id)?;
        self.store(&item)?;
        Ok(previous)
    }

    async fn remove(&self, id: &str) -> Result<Option<SearchableItem>, IndexError> {
        let previous = self.load(id)?;
        if previous.is_some() {
            self.backend.delete(&Self::key(id))?;
        }
        Ok(previous)
    }
}
