use super::*;
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::TimeZone;
use index::{
    BackendVectorStore, EmbeddingRecord, IndexBackend, IndexError, IndexManager, InMemoryBackend,
    ItemFilters, LifecycleConfig, MemoryCache, MemoryItemStore, MemoryLexicalIndex,
    RebuildOptions, SearchableItem, SystemClock,
};
use semantic::testing::ScriptedProvider;
use semantic::{CircuitBreakerConfig, EmbeddingConfig, RetryConfig, SemanticError};

use crate::indexer::ItemIndexer;
use crate::types::DegradedReason;

const MODEL: &str = "scripted-v1";
const DIM: usize = 16;
const INDEX: &str = "clips";

/// Vector store that can be told to fail ranking.
struct FlakyVectors {
    inner: BackendVectorStore,
    fail_ranking: AtomicBool,
}

#[async_trait]
impl VectorStore for FlakyVectors {
    async fn upsert(&self, ns: &str, id: &str, record: &EmbeddingRecord) -> Result<(), IndexError> {
        self.inner.upsert(ns, id, record).await
    }

    async fn upsert_batch(
        &self,
        ns: &str,
        records: &[(String, EmbeddingRecord)],
    ) -> Result<(), IndexError> {
        self.inner.upsert_batch(ns, records).await
    }

    async fn delete(&self, ns: &str, id: &str) -> Result<bool, IndexError> {
        self.inner.delete(ns, id).await
    }

    async fn get(&self, ns: &str, id: &str) -> Result<Option<EmbeddingRecord>, IndexError> {
        self.inner.get(ns, id).await
    }

    async fn rank_within(
        &self,
        ns: &str,
        query: &[f32],
        model: &str,
        candidates: &[String],
        limit: usize,
    ) -> Result<Vec<VectorMatch>, IndexError> {
        if self.fail_ranking.load(AtomicOrdering::SeqCst) {
            return Err(IndexError::backend("vector store unreachable"));
        }
        self.inner.rank_within(ns, query, model, candidates, limit).await
    }

    async fn count(&self, ns: &str) -> Result<usize, IndexError> {
        self.inner.count(ns).await
    }

    async fn drop_namespace(&self, ns: &str) -> Result<usize, IndexError> {
        self.inner.drop_namespace(ns).await
    }
}

#[derive(Default)]
struct RecordingMetrics {
    cache: Mutex<Vec<(&'static str, bool)>>,
    fallbacks: Mutex<Vec<DegradedReason>>,
    queries: Mutex<Vec<(SearchMode, &'static str, usize)>>,
    stages: Mutex<Vec<Stage>>,
}

impl RecordingMetrics {
    fn cache_hits(&self, layer: &str) -> usize {
        self.cache
            .lock()
            .unwrap()
            .iter()
            .filter(|(l, hit)| *l == layer && *hit)
            .count()
    }
}

impl SearchMetrics for RecordingMetrics {
    fn record_stage(&self, stage: Stage, _latency: Duration) {
        self.stages.lock().unwrap().push(stage);
    }

    fn record_query(&self, mode: SearchMode, status: &'static str, _latency: Duration, results: usize) {
        self.queries.lock().unwrap().push((mode, status, results));
    }

    fn record_fallback(&self, reason: DegradedReason) {
        self.fallbacks.lock().unwrap().push(reason);
    }

    fn record_cache(&self, layer: &'static str, hit: bool) {
        self.cache.lock().unwrap().push((layer, hit));
    }
}

struct Harness {
    searcher: HybridSearcher,
    indexer: ItemIndexer,
    manager: IndexManager,
    provider: Arc<ScriptedProvider>,
    items: Arc<MemoryItemStore>,
    vectors: Arc<FlakyVectors>,
    metrics: Arc<RecordingMetrics>,
}

fn embedding_config() -> EmbeddingConfig {
    EmbeddingConfig::new(MODEL, DIM).with_retry(
        RetryConfig::default()
            .with_base_delay(Duration::from_millis(1))
            .with_max_delay(Duration::from_millis(2)),
    )
}

fn harness_with(embedding: EmbeddingConfig, search: SearchConfig) -> Harness {
    let backend: Arc<dyn IndexBackend> = Arc::new(InMemoryBackend::new());
    let catalog = IndexCatalog::new(backend.clone());
    let items = Arc::new(MemoryItemStore::new());
    let lexical = Arc::new(MemoryLexicalIndex::new());
    let vectors = Arc::new(FlakyVectors {
        inner: BackendVectorStore::new(backend),
        fail_ranking: AtomicBool::new(false),
    });
    let cache = Arc::new(MemoryCache::new());
    let provider = Arc::new(ScriptedProvider::new(MODEL, DIM));
    let embeddings =
        Arc::new(EmbeddingGenerator::new(provider.clone(), cache.clone(), embedding).unwrap());
    let parts = SearchParts {
        index_name: INDEX.into(),
        catalog: catalog.clone(),
        items: items.clone(),
        lexical: lexical.clone(),
        vectors: vectors.clone(),
        embeddings,
        cache,
    };
    let metrics = Arc::new(RecordingMetrics::default());
    let searcher = HybridSearcher::new(parts.clone(), search)
        .unwrap()
        .with_metrics(metrics.clone());
    let manager = IndexManager::new(
        catalog,
        items.clone(),
        lexical,
        vectors.clone(),
        Arc::new(SystemClock),
        LifecycleConfig::default().with_embedding(MODEL, DIM),
    )
    .unwrap();
    Harness {
        searcher,
        indexer: ItemIndexer::new(parts),
        manager,
        provider,
        items,
        vectors,
        metrics,
    }
}

fn harness() -> Harness {
    harness_with(embedding_config(), SearchConfig::default())
}

fn axis(i: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[i % DIM] = 1.0;
    v
}

fn clip(id: &str, title: &str, day: u32) -> SearchableItem {
    SearchableItem::new(id, title, Utc.with_ymd_and_hms(2024, 3, day, 12, 0, 0).unwrap())
        .with_category("highlights")
}

impl Harness {
    async fn index(&self, items: Vec<SearchableItem>) {
        for item in items {
            self.indexer.upsert(item).await.unwrap();
        }
    }

    async fn activate(&self) -> String {
        self.manager
            .rebuild(INDEX, RebuildOptions::default())
            .await
            .unwrap()
            .physical_name
    }

    async fn clutch_corpus(&self, n: usize) {
        let items = (0..n)
            .map(|i| clip(&format!("c{i:02}"), &format!("Insane clutch {i}"), 1 + (i % 28) as u32))
            .collect();
        self.index(items).await;
    }
}

fn ids(resp: &SearchResponse) -> Vec<&str> {
    resp.results.iter().map(|h| h.id.as_str()).collect()
}

#[tokio::test]
async fn empty_corpus_returns_empty_page() {
    let h = harness();
    let ns = h.activate().await;

    let resp = h.searcher.search(&SearchRequest::new("anything")).await.unwrap();
    assert!(resp.results.is_empty());
    assert_eq!(resp.estimated_total, 0);
    assert!(!resp.has_more);
    assert_eq!(resp.mode, SearchMode::Hybrid);
    assert_eq!(resp.index_version, ns);
}

#[tokio::test]
async fn similar_item_with_weak_keyword_overlap_ranks_first() {
    let h = harness();
    h.provider.set_vector("reversal", axis(3));
    h.provider.set_vector("insane clutch play", axis(3));
    h.clutch_corpus(12).await;
    h.index(vec![clip("target", "Clutch reversal", 2)]).await;
    h.activate().await;

    let resp = h
        .searcher
        .search(&SearchRequest::new("insane clutch play"))
        .await
        .unwrap();
    assert_eq!(resp.mode, SearchMode::Hybrid);
    assert_eq!(resp.results[0].id, "target");
    assert_eq!(resp.results[0].rank, 1);
    let top = resp.results[0].similarity_score.unwrap();
    assert!((top - 1.0).abs() < 1e-5);

    // Lexically the target is the weakest candidate.
    let weakest = resp
        .results
        .iter()
        .map(|r| r.lexical_score)
        .fold(f32::INFINITY, f32::min);
    assert_eq!(resp.results[0].lexical_score, weakest);
}

#[tokio::test]
async fn provider_error_degrades_to_lexical_order() {
    let h = harness();
    h.clutch_corpus(5).await;
    h.index(vec![clip("double", "Clutch clutch clutch", 4)]).await;
    h.activate().await;
    h.provider.fail_always(Some(SemanticError::Http {
        status: 400,
        message: "bad input".into(),
    }));

    let resp = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(resp.mode, SearchMode::LexicalOnly);
    assert_eq!(resp.degraded_reason, Some(DegradedReason::EmbeddingError));
    assert_eq!(resp.results.len(), 6);
    assert_eq!(resp.results[0].id, "double");
    assert!(resp.results.iter().all(|r| r.similarity_score.is_none()));
    let scores: Vec<f32> = resp.results.iter().map(|r| r.lexical_score).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert_eq!(
        *h.metrics.fallbacks.lock().unwrap(),
        vec![DegradedReason::EmbeddingError]
    );
}

#[tokio::test]
async fn slow_provider_degrades_with_timeout_reason() {
    let h = harness();
    h.clutch_corpus(3).await;
    h.activate().await;
    h.provider.set_delay(Duration::from_millis(300));

    let started = Instant::now();
    let resp = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(resp.degraded_reason, Some(DegradedReason::EmbeddingTimeout));
    assert_eq!(resp.results.len(), 3);
    assert!(started.elapsed() < Duration::from_millis(250));
}

#[tokio::test]
async fn open_circuit_fails_fast() {
    let embedding = embedding_config()
        .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(1));
    let h = harness_with(embedding, SearchConfig::default());
    h.clutch_corpus(3).await;
    h.activate().await;
    h.provider
        .fail_always(Some(SemanticError::Upstream("502".into())));

    let first = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(first.degraded_reason, Some(DegradedReason::EmbeddingError));
    let calls = h.provider.calls();

    let second = h.searcher.search(&SearchRequest::new("insane")).await.unwrap();
    assert_eq!(second.degraded_reason, Some(DegradedReason::CircuitOpen));
    assert_eq!(second.results.len(), 3);
    assert_eq!(h.provider.calls(), calls);
}

#[tokio::test]
async fn vector_store_failure_degrades() {
    let h = harness();
    h.clutch_corpus(4).await;
    h.activate().await;
    h.vectors.fail_ranking.store(true, AtomicOrdering::SeqCst);

    let resp = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(resp.mode, SearchMode::LexicalOnly);
    assert_eq!(resp.degraded_reason, Some(DegradedReason::VectorSearchError));
    assert_eq!(resp.results.len(), 4);
}

#[tokio::test]
async fn no_candidates_does_not_wait_for_embedding() {
    let embedding = embedding_config().with_query_timeout(Duration::from_secs(2));
    let h = harness_with(embedding, SearchConfig::default());
    h.clutch_corpus(3).await;
    h.activate().await;
    h.provider.set_delay(Duration::from_secs(1));

    let started = Instant::now();
    let resp = h.searcher.search(&SearchRequest::new("nothing matches")).await.unwrap();
    assert!(resp.results.is_empty());
    assert_eq!(resp.mode, SearchMode::Hybrid);
    assert!(resp.degraded_reason.is_none());
    assert!(started.elapsed() < Duration::from_millis(500));
}

#[tokio::test]
async fn pages_partition_the_merged_order() {
    let h = harness();
    h.clutch_corpus(30).await;
    h.activate().await;

    let full = h
        .searcher
        .search(&SearchRequest::new("insane clutch").with_limit(30))
        .await
        .unwrap();
    assert_eq!(full.results.len(), 30);
    assert!(!full.has_more);

    let mut paged = Vec::new();
    for offset in [0, 10, 20] {
        let page = h
            .searcher
            .search(&SearchRequest::new("insane clutch").with_limit(10).with_offset(offset))
            .await
            .unwrap();
        assert_eq!(page.offset, offset);
        assert_eq!(page.estimated_total, 30);
        assert_eq!(page.has_more, offset < 20);
        assert_eq!(page.results[0].rank, offset + 1);
        paged.extend(page.results.into_iter().map(|r| r.id));
    }
    assert_eq!(paged, ids(&full));

    let past_end = h
        .searcher
        .search(&SearchRequest::new("insane clutch").with_offset(40))
        .await
        .unwrap();
    assert!(past_end.results.is_empty());
    assert!(!past_end.has_more);
}

#[tokio::test]
async fn requires_an_active_version() {
    let h = harness();
    h.clutch_corpus(2).await;
    match h.searcher.search(&SearchRequest::new("clutch")).await {
        Err(SearchError::NoActiveIndex(name)) => assert_eq!(name, INDEX),
        other => panic!("expected NoActiveIndex, got {other:?}"),
    }
    let queries = h.metrics.queries.lock().unwrap();
    assert_eq!(queries[0].1, "no_active_index");
}

#[tokio::test]
async fn invalid_requests_are_rejected() {
    let h = harness();
    h.activate().await;
    for req in [
        SearchRequest::new("   "),
        SearchRequest::new("?!"),
        SearchRequest::new("clutch").with_limit(0),
        SearchRequest::new("clutch").with_limit(101),
        SearchRequest::new("clutch").with_offset(500),
    ] {
        assert!(
            matches!(h.searcher.search(&req).await, Err(SearchError::InvalidRequest(_))),
            "{req:?} should be rejected"
        );
    }
}

#[tokio::test]
async fn clamp_policy_clamps_limits() {
    let h = harness_with(
        embedding_config(),
        SearchConfig::default().with_limit_policy(LimitPolicy::Clamp),
    );
    h.clutch_corpus(5).await;
    h.activate().await;

    let big = h
        .searcher
        .search(&SearchRequest::new("clutch").with_limit(1000))
        .await
        .unwrap();
    assert_eq!(big.limit, 100);
    let zero = h
        .searcher
        .search(&SearchRequest::new("clutch").with_limit(0))
        .await
        .unwrap();
    assert_eq!(zero.limit, 1);
    assert_eq!(zero.results.len(), 1);
    assert!(zero.has_more);
}

#[tokio::test]
async fn deleted_source_items_are_dropped_at_hydration() {
    let h = harness();
    h.clutch_corpus(4).await;
    h.activate().await;
    // Bypass the indexer so the lexical and vector entries linger.
    h.items.remove("c01").await.unwrap();

    let resp = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(resp.results.len(), 3);
    assert!(!ids(&resp).contains(&"c01"));
    let ranks: Vec<usize> = resp.results.iter().map(|r| r.rank).collect();
    assert_eq!(ranks, vec![1, 2, 3]);
}

#[tokio::test]
async fn filters_apply_inside_the_candidate_set() {
    let h = harness();
    h.clutch_corpus(4).await;
    h.index(vec![clip("ace", "Clutch ace", 9).with_category("Aces")]).await;
    h.activate().await;

    let filters = ItemFilters {
        category: Some("aces".into()),
        ..ItemFilters::default()
    };
    let resp = h
        .searcher
        .search(&SearchRequest::new("clutch").with_filters(filters))
        .await
        .unwrap();
    assert_eq!(ids(&resp), vec!["ace"]);
    assert_eq!(resp.results[0].metadata.category.as_deref(), Some("Aces"));
}

#[tokio::test]
async fn same_query_same_order() {
    let h = harness();
    h.clutch_corpus(20).await;
    h.activate().await;

    let a = h.searcher.search(&SearchRequest::new("insane clutch")).await.unwrap();
    let b = h.searcher.search(&SearchRequest::new("Insane  CLUTCH")).await.unwrap();
    assert_eq!(ids(&a), ids(&b));
    let sims: Vec<f32> = a.results.iter().map(|r| r.similarity_score.unwrap()).collect();
    assert!(sims.windows(2).all(|w| w[0] >= w[1]));
}

#[tokio::test]
async fn repeated_query_hits_candidate_and_metadata_caches() {
    let h = harness();
    h.clutch_corpus(3).await;
    h.activate().await;

    h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(h.metrics.cache_hits(CANDIDATE_LAYER), 0);
    h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(h.metrics.cache_hits(CANDIDATE_LAYER), 1);
    assert_eq!(h.metrics.cache_hits(METADATA_LAYER), 3);
}

#[tokio::test]
async fn updates_evict_cached_metadata() {
    let h = harness();
    h.index(vec![clip("a", "Clutch ace", 1)]).await;
    h.activate().await;
    let before = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(before.results[0].metadata.title, "Clutch ace");

    h.indexer
        .upsert(clip("a", "Clutch ace remastered", 1))
        .await
        .unwrap();
    let after = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(after.results[0].metadata.title, "Clutch ace remastered");
}

#[tokio::test]
async fn reranking_only_compares_candidates() {
    let h = harness_with(
        embedding_config(),
        SearchConfig::default().with_candidate_width(10, 50),
    );
    h.clutch_corpus(25).await;
    h.index((0..40).map(|i| clip(&format!("o{i}"), &format!("Eco round {i}"), 3)).collect())
        .await;
    h.activate().await;
    h.vectors.inner.reset_comparisons();

    let resp = h
        .searcher
        .search(&SearchRequest::new("clutch").with_limit(5))
        .await
        .unwrap();
    assert_eq!(resp.estimated_total, 10);
    assert!(h.vectors.inner.comparisons() <= 10);
}

#[tokio::test]
async fn swap_moves_queries_to_the_new_version() {
    let h = harness();
    h.clutch_corpus(3).await;
    let v1 = h.activate().await;
    let first = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(first.index_version, v1);

    let v2 = h.activate().await;
    assert_ne!(v1, v2);
    let second = h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();
    assert_eq!(second.index_version, v2);
    assert_eq!(ids(&first), ids(&second));
}

#[tokio::test]
async fn stages_and_outcome_are_recorded() {
    let h = harness();
    h.clutch_corpus(2).await;
    h.activate().await;
    h.searcher.search(&SearchRequest::new("clutch")).await.unwrap();

    let stages = h.metrics.stages.lock().unwrap().clone();
    for stage in [Stage::Lexical, Stage::Embedding, Stage::Rerank, Stage::Metadata, Stage::Total] {
        assert!(stages.contains(&stage), "missing {stage:?}");
    }
    assert_eq!(
        h.metrics.queries.lock().unwrap()[0],
        (SearchMode::Hybrid, "ok", 2)
    );
}

#[test]
fn merge_orders_by_similarity_then_lexical_then_recency_then_id() {
    let at = |d| Some(Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap());
    let hit = |id: &str, score, day| LexicalHit {
        id: id.into(),
        score,
        created_at: at(day),
    };
    let candidates = vec![
        hit("a", 9.0, 1),
        hit("b", 5.0, 1),
        hit("c", 5.0, 2),
        hit("d", 5.0, 2),
        hit("e", 7.0, 1),
        hit("unranked", 8.0, 3),
    ];
    let sim = |id: &str, similarity| VectorMatch {
        id: id.into(),
        similarity,
    };
    let matches = vec![
        sim("a", 0.5),
        sim("b", 0.9),
        sim("c", 0.9),
        sim("d", 0.9),
        sim("e", 0.95),
    ];

    let merged = merge_candidates(&candidates, Some(&matches));
    let order: Vec<&str> = merged.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["e", "c", "d", "b", "a", "unranked"]);
    assert!(merged.last().unwrap().similarity.is_none());

    let lexical = merge_candidates(&candidates, None);
    let order: Vec<&str> = lexical.iter().map(|r| r.id.as_str()).collect();
    assert_eq!(order, vec!["a", "b", "c", "d", "e", "unranked"]);
}
