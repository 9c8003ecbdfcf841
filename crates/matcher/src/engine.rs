use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use canonical::{canonicalize_query, CanonicalError, CanonicalizeConfig};
use chrono::{DateTime, Utc};
use index::{
    get_json, set_json, CacheStore, IndexCatalog, ItemMetadata, ItemStore, LexicalHit,
    LexicalIndex, VectorMatch, VectorStore,
};
use semantic::EmbeddingGenerator;
use tracing::{debug, warn};

use crate::metrics::{NoopSearchMetrics, SearchMetrics, Stage};
use crate::types::{
    DegradedReason, LimitPolicy, SearchConfig, SearchError, SearchHit, SearchMode, SearchRequest,
    SearchResponse,
};

mod fanout;

#[cfg(test)]
mod tests;

pub(crate) const CANDIDATE_LAYER: &str = "candidates";
pub(crate) const METADATA_LAYER: &str = "metadata";

/// Cache key of an item's display metadata. Evicted on every mutation.
pub fn metadata_cache_key(id: &str) -> String {
    format!("metadata:{id}")
}

/// One candidate after merging lexical and vector scores.
#[derive(Debug, Clone, PartialEq)]
pub struct RankedResult {
    pub id: String,
    pub similarity: Option<f32>,
    pub lexical_score: f32,
    pub created_at: Option<DateTime<Utc>>,
}

/// Order candidates by similarity, then lexical score, then recency, then id.
///
/// Candidates the vector store could not rank follow every ranked one, in
/// their original lexical order. With `matches == None` the lexical order is
/// kept as is.
pub fn merge_candidates(candidates: &[LexicalHit], matches: Option<&[VectorMatch]>) -> Vec<RankedResult> {
    let to_result = |hit: &LexicalHit, similarity: Option<f32>| RankedResult {
        id: hit.id.clone(),
        similarity,
        lexical_score: hit.score,
        created_at: hit.created_at,
    };

    let Some(matches) = matches else {
        return candidates.iter().map(|hit| to_result(hit, None)).collect();
    };

    let by_id: HashMap<&str, f32> = matches
        .iter()
        .map(|m| (m.id.as_str(), m.similarity))
        .collect();
    let (mut ranked, unranked): (Vec<RankedResult>, Vec<RankedResult>) = candidates
        .iter()
        .map(|hit| to_result(hit, by_id.get(hit.id.as_str()).copied()))
        .partition(|r| r.similarity.is_some());

    ranked.sort_by(|a, b| {
        let sim = |r: &RankedResult| r.similarity.unwrap_or(0.0);
        sim(b)
            .total_cmp(&sim(a))
            .then_with(|| b.lexical_score.total_cmp(&a.lexical_score))
            .then_with(|| recency_desc(a.created_at, b.created_at))
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.extend(unranked);
    ranked
}

fn recency_desc(a: Option<DateTime<Utc>>, b: Option<DateTime<Utc>>) -> Ordering {
    b.cmp(&a)
}

/// Shared collaborators of the query path.
#[derive(Clone)]
pub struct SearchParts {
    /// Logical index (alias) queries read.
    pub index_name: String,
    pub catalog: IndexCatalog,
    pub items: Arc<dyn ItemStore>,
    pub lexical: Arc<dyn LexicalIndex>,
    pub vectors: Arc<dyn VectorStore>,
    pub embeddings: Arc<EmbeddingGenerator>,
    pub cache: Arc<dyn CacheStore>,
}

/// Query orchestrator: lexical candidates re-ranked by embedding similarity.
pub struct HybridSearcher {
    parts: SearchParts,
    config: SearchConfig,
    lexical_canonical: CanonicalizeConfig,
    metrics: Arc<dyn SearchMetrics>,
}

struct Validated {
    text: String,
    hash: String,
    limit: usize,
    offset: usize,
}

impl HybridSearcher {
    pub fn new(parts: SearchParts, config: SearchConfig) -> Result<Self, SearchError> {
        config.validate()?;
        Ok(Self {
            parts,
            config,
            lexical_canonical: CanonicalizeConfig::lexical(),
            metrics: Arc::new(NoopSearchMetrics),
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn SearchMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    pub fn index_name(&self) -> &str {
        &self.parts.index_name
    }

    fn validate(&self, request: &SearchRequest) -> Result<Validated, SearchError> {
        let canonical = match canonicalize_query(&request.query, &self.lexical_canonical) {
            Ok(q) => q,
            Err(CanonicalError::EmptyInput) => {
                return Err(SearchError::InvalidRequest("query must not be empty".into()))
            }
            Err(err) => return Err(SearchError::InvalidRequest(err.to_string())),
        };

        let requested = request.limit.unwrap_or(self.config.default_limit);
        let limit = match self.config.limit_policy {
            LimitPolicy::Reject if requested == 0 || requested > self.config.max_limit => {
                return Err(SearchError::InvalidRequest(format!(
                    "limit must be between 1 and {}, got {requested}",
                    self.config.max_limit
                )))
            }
            LimitPolicy::Reject => requested,
            LimitPolicy::Clamp => requested.clamp(1, self.config.max_limit),
        };

        let offset = request.offset.unwrap_or(0);
        if offset >= self.config.max_offset {
            return Err(SearchError::InvalidRequest(format!(
                "offset must be below {}, got {offset}",
                self.config.max_offset
            )));
        }

        Ok(Validated {
            text: canonical.text,
            hash: canonical.hash,
            limit,
            offset,
        })
    }

    /// Run one query.
    pub async fn search(&self, request: &SearchRequest) -> Result<SearchResponse, SearchError> {
        let start = Instant::now();
        let result = self.search_inner(request, start).await;
        let elapsed = start.elapsed();
        match &result {
            Ok(resp) => {
                self.metrics.record_stage(Stage::Total, elapsed);
                self.metrics
                    .record_query(resp.mode, "ok", elapsed, resp.results.len());
            }
            Err(err) => {
                let status = match err {
                    SearchError::InvalidRequest(_) => "invalid_request",
                    SearchError::NoActiveIndex(_) => "no_active_index",
                    SearchError::Lexical(_) | SearchError::Index(_) => "error",
                };
                self.metrics
                    .record_query(SearchMode::LexicalOnly, status, elapsed, 0);
            }
        }
        result
    }

    async fn search_inner(
        &self,
        request: &SearchRequest,
        start: Instant,
    ) -> Result<SearchResponse, SearchError> {
        let query = self.validate(request)?;

        // Both sides use this one namespace even if a swap lands mid-query.
        let namespace = self
            .parts
            .catalog
            .active_namespace(&self.parts.index_name)?
            .ok_or_else(|| SearchError::NoActiveIndex(self.parts.index_name.clone()))?;
        let width = self.config.width_for(query.offset, query.limit);

        let fan = fanout::candidates_and_embedding(
            self.candidates(&namespace, &query, request, width),
            self.parts.embeddings.embed_query(&request.query),
        )
        .await;

        self.metrics.record_stage(Stage::Lexical, fan.lexical_elapsed);
        if let Some(elapsed) = fan.embedding_elapsed {
            self.metrics.record_stage(Stage::Embedding, elapsed);
        }
        let candidates = fan.lexical?;

        let mut mode = SearchMode::Hybrid;
        let mut degraded = None;
        let matches = match fan.embedding {
            None => None,
            Some(Ok(vector)) => {
                let rerank_start = Instant::now();
                let ids: Vec<String> = candidates.iter().map(|c| c.id.clone()).collect();
                let ranked = self
                    .parts
                    .vectors
                    .rank_within(
                        &namespace,
                        &vector,
                        self.parts.embeddings.model(),
                        &ids,
                        ids.len(),
                    )
                    .await;
                self.metrics.record_stage(Stage::Rerank, rerank_start.elapsed());
                match ranked {
                    Ok(matches) => Some(matches),
                    Err(err) => {
                        degraded = Some((DegradedReason::VectorSearchError, err.to_string()));
                        None
                    }
                }
            }
            Some(Err(err)) => {
                degraded = Some((DegradedReason::from_embedding(&err), err.to_string()));
                None
            }
        };

        let degraded_reason = degraded.map(|(reason, error)| {
            mode = SearchMode::LexicalOnly;
            self.metrics.record_fallback(reason);
            warn!(
                event = "search.degraded",
                reason = reason.as_str(),
                error = %error,
                namespace = %namespace,
                "query fell back to lexical order"
            );
            reason
        });

        let merged = merge_candidates(&candidates, matches.as_deref());
        let page_end = (query.offset + query.limit).min(merged.len());
        let page = merged.get(query.offset..page_end).unwrap_or(&[]);
        let has_more = merged.len() > query.offset + query.limit;

        let metadata_start = Instant::now();
        let results = self.hydrate(page, query.offset).await?;
        self.metrics
            .record_stage(Stage::Metadata, metadata_start.elapsed());

        debug!(
            namespace = %namespace,
            candidates = candidates.len(),
            returned = results.len(),
            mode = mode.as_str(),
            "search finished"
        );

        Ok(SearchResponse {
            results,
            estimated_total: candidates.len(),
            latency_ms: elapsed_ms(start.elapsed()),
            mode,
            degraded_reason,
            index_version: namespace,
            offset: query.offset,
            limit: query.limit,
            has_more,
        })
    }

    /// Lexical candidates, served from the 5-minute candidate cache when
    /// possible. The key includes the namespace, so a swap never serves the
    /// previous version's candidates.
    async fn candidates(
        &self,
        namespace: &str,
        query: &Validated,
        request: &SearchRequest,
        width: usize,
    ) -> Result<Vec<LexicalHit>, SearchError> {
        let key = format!(
            "lexical:{namespace}:{}:{}:{width}",
            query.hash,
            request.filters.cache_fragment()
        );
        let cache = self.parts.cache.as_ref();
        if let Some(hits) = get_json::<Vec<LexicalHit>>(cache, &key).await.unwrap_or(None) {
            self.metrics.record_cache(CANDIDATE_LAYER, true);
            return Ok(hits);
        }
        self.metrics.record_cache(CANDIDATE_LAYER, false);

        let hits = self
            .parts
            .lexical
            .search(namespace, &query.text, &request.filters, width)
            .await
            .map_err(|e| SearchError::Lexical(e.to_string()))?;
        if let Err(err) = set_json(cache, &key, &hits, self.config.candidate_ttl).await {
            warn!(event = "cache.unavailable", layer = CANDIDATE_LAYER, error = %err, "candidate cache write failed");
        }
        Ok(hits)
    }

    /// Attach metadata to the page. Items deleted since indexing are dropped.
    async fn hydrate(&self, page: &[RankedResult], offset: usize) -> Result<Vec<SearchHit>, SearchError> {
        let cache = self.parts.cache.as_ref();
        let mut hits = Vec::with_capacity(page.len());
        for result in page {
            let key = metadata_cache_key(&result.id);
            let cached = get_json::<ItemMetadata>(cache, &key).await.unwrap_or(None);
            self.metrics.record_cache(METADATA_LAYER, cached.is_some());
            let metadata = match cached {
                Some(metadata) => metadata,
                None => match self.parts.items.get(&result.id).await? {
                    Some(item) => {
                        let metadata = item.metadata();
                        if let Err(err) =
                            set_json(cache, &key, &metadata, self.config.metadata_ttl).await
                        {
                            warn!(event = "cache.unavailable", layer = METADATA_LAYER, error = %err, "metadata cache write failed");
                        }
                        metadata
                    }
                    None => {
                        debug!(id = %result.id, "dropping candidate whose item is gone");
                        continue;
                    }
                },
            };
            hits.push(SearchHit {
                id: result.id.clone(),
                rank: offset + hits.len() + 1,
                similarity_score: result.similarity,
                lexical_score: result.lexical_score,
                snippet: metadata.snippet.clone(),
                metadata,
            });
        }
        Ok(hits)
    }
}

fn elapsed_ms(d: Duration) -> u64 {
    d.as_millis().min(u64::MAX as u128) as u64
}
