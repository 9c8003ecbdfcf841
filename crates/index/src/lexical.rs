//! Keyword retrieval.
//!
//! The engine is a black box to the orchestrator: it returns ids with scores
//! that are only comparable within one query. [`MemoryLexicalIndex`] is the
//! in-process engine, Okapi BM25 over canonical terms with filters applied
//! before scoring.

use crate::{IndexError, ItemFilters, SearchableItem};
use async_trait::async_trait;
use canonical::terms;
use chrono::{DateTime, Utc};
use hashbrown::{HashMap, HashSet};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;

/// BM25 term-frequency saturation.
pub const BM25_K1: f32 = 1.2;
/// BM25 length normalization.
pub const BM25_B: f32 = 0.75;

/// One lexical candidate.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LexicalHit {
    pub id: String,
    pub score: f32,
    /// Item creation time, used as the last ranking tie-break.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

/// Namespaced keyword index.
#[async_trait]
pub trait LexicalIndex: Send + Sync {
    /// Best `limit` matches, score desc then id asc.
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        filters: &ItemFilters,
        limit: usize,
    ) -> Result<Vec<LexicalHit>, IndexError>;

    async fn upsert(&self, namespace: &str, item: &SearchableItem) -> Result<(), IndexError>;

    async fn upsert_batch(
        &self,
        namespace: &str,
        items: &[SearchableItem],
    ) -> Result<(), IndexError> {
        for item in items {
            self.upsert(namespace, item).await?;
        }
        Ok(())
    }

    /// Returns whether the id was present.
    async fn remove(&self, namespace: &str, id: &str) -> Result<bool, IndexError>;

    async fn count(&self, namespace: &str) -> Result<usize, IndexError>;

    /// Remove a whole namespace. Returns the number of documents dropped.
    async fn drop_namespace(&self, namespace: &str) -> Result<usize, IndexError>;
}

#[derive(Debug, Clone)]
struct Doc {
    len: u32,
    term_freqs: HashMap<String, u32>,
    category: Option<String>,
    owner: Option<String>,
    created_at: DateTime<Utc>,
    tags: Vec<String>,
}

#[derive(Debug, Default)]
struct Namespace {
    docs: HashMap<String, Doc>,
    postings: HashMap<String, HashSet<String>>,
    total_len: u64,
}

impl Namespace {
    fn insert(&mut self, item: &SearchableItem) {
        self.remove(&item.id);

        let words = terms(&item.lexical_text());
        let mut term_freqs: HashMap<String, u32> = HashMap::new();
        for word in &words {
            *term_freqs.entry(word.clone()).or_insert(0) += 1;
        }
        for term in term_freqs.keys() {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(item.id.clone());
        }
        self.total_len += words.len() as u64;
        self.docs.insert(
            item.id.clone(),
            Doc {
                len: words.len() as u32,
                term_freqs,
                category: item.category.clone(),
                owner: item.owner.clone(),
                created_at: item.created_at,
                tags: item.tags.clone(),
            },
        );
    }

    fn remove(&mut self, id: &str) -> bool {
        let Some(doc) = self.docs.remove(id) else {
            return false;
        };
        self.total_len = self.total_len.saturating_sub(doc.len as u64);
        for term in doc.term_freqs.keys() {
            if let Some(ids) = self.postings.get_mut(term) {
                ids.remove(id);
                if ids.is_empty() {
                    self.postings.remove(term);
                }
            }
        }
        true
    }

    fn search(&self, query: &str, filters: &ItemFilters, limit: usize) -> Vec<LexicalHit> {
        let mut query_terms = terms(query);
        query_terms.sort_unstable();
        query_terms.dedup();
        if query_terms.is_empty() || self.docs.is_empty() || limit == 0 {
            return Vec::new();
        }

        let n = self.docs.len() as f32;
        let avg_len = (self.total_len as f32 / n).max(1.0);
        let mut scores: HashMap<&str, f32> = HashMap::new();

        for term in &query_terms {
            let Some(ids) = self.postings.get(term) else {
                continue;
            };
            let df = ids.len() as f32;
            let idf = (1.0 + (n - df + 0.5) / (df + 0.5)).ln();
            for id in ids {
                let Some(doc) = self.docs.get(id) else {
                    continue;
                };
                if !filters.matches_parts(
                    doc.category.as_deref(),
                    doc.owner.as_deref(),
                    doc.created_at,
                    &doc.tags,
                ) {
                    continue;
                }
                let tf = doc.term_freqs.get(term).copied().unwrap_or(0) as f32;
                let norm = BM25_K1 * (1.0 - BM25_B + BM25_B * doc.len as f32 / avg_len);
                *scores.entry(id.as_str()).or_insert(0.0) += idf * tf * (BM25_K1 + 1.0) / (tf + norm);
            }
        }

        let mut hits: Vec<LexicalHit> = scores
            .into_iter()
            .map(|(id, score)| LexicalHit {
                id: id.to_string(),
                score,
                created_at: self.docs.get(id).map(|d| d.created_at),
            })
            .collect();
        hits.sort_by(|a, b| b.score.total_cmp(&a.score).then_with(|| a.id.cmp(&b.id)));
        hits.truncate(limit);
        hits
    }
}

/// In-process BM25 index keyed by namespace.
#[derive(Default)]
pub struct MemoryLexicalIndex {
    namespaces: RwLock<HashMap<String, Namespace>>,
}

impl MemoryLexicalIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Namespaces that currently hold documents.
    pub fn namespaces(&self) -> Vec<String> {
        self.namespaces
            .read()
            .map(|g| g.keys().cloned().collect())
            .unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> IndexError {
    IndexError::backend("poisoned lock")
}

#[async_trait]
impl LexicalIndex for MemoryLexicalIndex {
    async fn search(
        &self,
        namespace: &str,
        query: &str,
        filters: &ItemFilters,
        limit: usize,
    ) -> Result<Vec<LexicalHit>, IndexError> {
        let guard = self.namespaces.read().map_err(poisoned)?;
        Ok(guard
            .get(namespace)
            .map(|ns| ns.search(query, filters, limit))
            .unwrap_or_default())
    }

    async fn upsert(&self, namespace: &str, item: &SearchableItem) -> Result<(), IndexError> {
        let mut guard = self.namespaces.write().map_err(poisoned)?;
        guard.entry(namespace.to_string()).or_default().insert(item);
        Ok(())
    }

    async fn upsert_batch(
        &self,
        namespace: &str,
        items: &[SearchableItem],
    ) -> Result<(), IndexError> {
        let mut guard = self.namespaces.write().map_err(poisoned)?;
        let ns = guard.entry(namespace.to_string()).or_default();
        for item in items {
            ns.insert(item);
        }
        Ok(())
    }

    async fn remove(&self, namespace: &str, id: &str) -> Result<bool, IndexError> {
        let mut guard = self.namespaces.write().map_err(poisoned)?;
        Ok(guard.get_mut(namespace).is_some_and(|ns| ns.remove(id)))
    }

    async fn count(&self, namespace: &str) -> Result<usize, IndexError> {
        let guard = self.namespaces.read().map_err(poisoned)?;
        Ok(guard.get(namespace).map(|ns| ns.docs.len()).unwrap_or(0))
    }

    async fn drop_namespace(&self, namespace: &str) -> Result<usize, IndexError> {
        let mut guard = self.namespaces.write().map_err(poisoned)?;
        Ok(guard.remove(namespace).map(|ns| ns.docs.len()).unwrap_or(0))
    }
}
