use canonical::{canonicalize, CanonicalizeConfig};
use index::{CacheStore, Clock, EmbeddingRecord, SearchableItem, SystemClock};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::cache::EmbeddingCache;
use crate::metrics::{outcome_label, EmbeddingKind, EmbeddingMetrics, NoopEmbeddingMetrics};
use crate::provider::EmbeddingProvider;
use crate::resilience::{execute_with_retry, CircuitBreaker, CircuitState, TokenBucket};
use crate::{EmbeddingConfig, SemanticError};

/// Result of the item path. Failures never bubble up: the item is stored
/// without a vector and picked up later by backfill.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemEmbedding {
    Ready(EmbeddingRecord),
    Pending(SemanticError),
}

impl ItemEmbedding {
    pub fn is_ready(&self) -> bool {
        matches!(self, ItemEmbedding::Ready(_))
    }

    pub fn into_record(self) -> Option<EmbeddingRecord> {
        match self {
            ItemEmbedding::Ready(record) => Some(record),
            ItemEmbedding::Pending(_) => None,
        }
    }
}

/// Vectors for a batch of items, in input order.
#[derive(Debug, Clone, Default)]
pub struct BatchEmbedding {
    pub records: Vec<(String, EmbeddingRecord)>,
    pub cache_hits: usize,
    pub generated: usize,
    /// Items whose text canonicalized to nothing.
    pub skipped: Vec<String>,
}

/// Canonicalize, consult the cache, then call the provider under retry,
/// circuit breaking, optional pacing and a per-path timeout.
pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    cache: EmbeddingCache,
    config: EmbeddingConfig,
    canonical: CanonicalizeConfig,
    model_version: String,
    breaker: CircuitBreaker,
    limiter: Option<TokenBucket>,
    metrics: Arc<dyn EmbeddingMetrics>,
    clock: Arc<dyn Clock>,
}

fn model_version(model: &str, canonical: &CanonicalizeConfig) -> String {
    format!("{model}@c{}", canonical.version)
}

impl EmbeddingGenerator {
    pub fn new(
        provider: Arc<dyn EmbeddingProvider>,
        store: Arc<dyn CacheStore>,
        config: EmbeddingConfig,
    ) -> Result<Self, SemanticError> {
        config.validate()?;
        if provider.model() != config.model {
            return Err(SemanticError::InvalidConfig(format!(
                "provider model `{}` does not match configured model `{}`",
                provider.model(),
                config.model
            )));
        }
        let canonical = CanonicalizeConfig::default();
        Ok(Self {
            cache: EmbeddingCache::new(store, config.query_cache_ttl, config.item_cache_ttl),
            model_version: model_version(&config.model, &canonical),
            breaker: CircuitBreaker::new(config.circuit_breaker),
            limiter: config.rate_limit.map(TokenBucket::new),
            metrics: Arc::new(NoopEmbeddingMetrics),
            clock: Arc::new(SystemClock),
            canonical,
            provider,
            config,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn EmbeddingMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_canonical(mut self, canonical: CanonicalizeConfig) -> Self {
        self.model_version = model_version(&self.config.model, &canonical);
        self.canonical = canonical;
        self
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn dimension(&self) -> usize {
        self.config.dimension
    }

    pub fn config(&self) -> &EmbeddingConfig {
        &self.config
    }

    pub fn circuit_state(&self) -> CircuitState {
        self.breaker.current_state()
    }

    /// Query path. Bounded by `query_timeout` end to end, retries included.
    pub async fn embed_query(&self, query: &str) -> Result<Vec<f32>, SemanticError> {
        self.resolve(EmbeddingKind::Query, query, self.config.query_timeout)
            .await
    }

    /// Item path. Bounded by `item_timeout`.
    pub async fn embed_item(&self, item: &SearchableItem) -> ItemEmbedding {
        match self
            .resolve(EmbeddingKind::Item, &item.embedding_text(), self.config.item_timeout)
            .await
        {
            Ok(vector) => ItemEmbedding::Ready(EmbeddingRecord::new(
                vector,
                self.config.model.clone(),
                self.clock.now(),
            )),
            Err(err) => {
                warn!(
                    event = "embedding.pending",
                    item_id = %item.id,
                    error = %err,
                    "item stored without embedding"
                );
                ItemEmbedding::Pending(err)
            }
        }
    }

    /// Batch path. Cache hits are served first and all misses go to the
    /// provider in one call bounded by `batch_timeout`. Any provider error
    /// fails the whole batch so the caller can back off.
    pub async fn embed_batch(&self, items: &[SearchableItem]) -> Result<BatchEmbedding, SemanticError> {
        let mut out = BatchEmbedding::default();
        let mut slots: Vec<Option<Vec<f32>>> = Vec::with_capacity(items.len());
        let mut misses: Vec<(usize, String, String)> = Vec::new();

        for item in items {
            let canonical = match canonicalize(&item.embedding_text(), &self.canonical) {
                Ok(text) => text,
                Err(canonical::CanonicalError::EmptyInput) => {
                    out.skipped.push(item.id.clone());
                    slots.push(None);
                    continue;
                }
                Err(err) => return Err(err.into()),
            };
            let key = EmbeddingCache::key(EmbeddingKind::Batch, &self.model_version, &canonical);
            match self.cached(EmbeddingKind::Batch, &key).await {
                Some(vector) => {
                    out.cache_hits += 1;
                    slots.push(Some(vector));
                }
                None => {
                    misses.push((slots.len(), canonical, key));
                    slots.push(None);
                }
            }
        }

        if !misses.is_empty() {
            let texts: Vec<String> = misses.iter().map(|(_, text, _)| text.clone()).collect();
            let vectors = self
                .generate_within(EmbeddingKind::Batch, &texts, self.config.batch_timeout)
                .await?;
            for ((slot, _, key), vector) in misses.into_iter().zip(vectors) {
                self.cache.put(EmbeddingKind::Batch, &key, &vector).await;
                slots[slot] = Some(vector);
                out.generated += 1;
            }
        }

        let now = self.clock.now();
        for (item, slot) in items.iter().zip(slots) {
            if let Some(vector) = slot {
                out.records.push((
                    item.id.clone(),
                    EmbeddingRecord::new(vector, self.config.model.clone(), now),
                ));
            }
        }
        debug!(
            items = items.len(),
            cache_hits = out.cache_hits,
            generated = out.generated,
            "embedded batch"
        );
        Ok(out)
    }

    async fn resolve(
        &self,
        kind: EmbeddingKind,
        raw: &str,
        budget: Duration,
    ) -> Result<Vec<f32>, SemanticError> {
        let canonical = canonicalize(raw, &self.canonical)?;
        let key = EmbeddingCache::key(kind, &self.model_version, &canonical);
        if let Some(vector) = self.cached(kind, &key).await {
            return Ok(vector);
        }
        let vector = self
            .generate_within(kind, std::slice::from_ref(&canonical), budget)
            .await?
            .pop()
            .ok_or_else(|| SemanticError::InvalidResponse("provider returned no vectors".into()))?;
        self.cache.put(kind, &key, &vector).await;
        Ok(vector)
    }

    async fn cached(&self, kind: EmbeddingKind, key: &str) -> Option<Vec<f32>> {
        let hit = self
            .cache
            .get(key)
            .await
            .filter(|v| v.len() == self.config.dimension);
        self.metrics.record_cache(kind.cache_layer(), hit.is_some());
        hit
    }

    async fn generate_within(
        &self,
        kind: EmbeddingKind,
        texts: &[String],
        budget: Duration,
    ) -> Result<Vec<Vec<f32>>, SemanticError> {
        let start = Instant::now();
        let result = match tokio::time::timeout(budget, self.generate(texts)).await {
            Ok(result) => result,
            Err(_) => {
                self.breaker.record_failure();
                Err(SemanticError::Timeout(budget))
            }
        };
        self.metrics
            .record_generation(kind, start.elapsed(), outcome_label(result.as_ref().err()));
        result
    }

    async fn generate(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        if !self.breaker.allow_request() {
            return Err(SemanticError::CircuitOpen(self.provider.name().to_string()));
        }
        if let Some(limiter) = &self.limiter {
            if !limiter.acquire().await {
                self.breaker.record_neutral();
                return Err(SemanticError::Throttled { retry_after: None });
            }
        }

        let outcome =
            execute_with_retry(&self.config.retry, |_| self.provider.embed_batch(texts)).await;
        let attempts = outcome.attempts;
        match outcome.into_result() {
            Ok(vectors) => {
                self.breaker.record_success();
                self.check_shape(&vectors, texts.len())?;
                Ok(vectors)
            }
            Err(err) => {
                if err.trips_breaker() {
                    self.breaker.record_failure();
                } else {
                    self.breaker.record_neutral();
                }
                warn!(
                    event = "embedding.failed",
                    provider = self.provider.name(),
                    attempts,
                    error = %err,
                    "embedding provider call failed"
                );
                Err(err)
            }
        }
    }

    fn check_shape(&self, vectors: &[Vec<f32>], expected: usize) -> Result<(), SemanticError> {
        if vectors.len() != expected {
            return Err(SemanticError::InvalidResponse(format!(
                "asked for {expected} embeddings, got {}",
                vectors.len()
            )));
        }
        match vectors.iter().find(|v| v.len() != self.config.dimension) {
            Some(bad) => Err(SemanticError::DimensionMismatch {
                expected: self.config.dimension,
                actual: bad.len(),
            }),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resilience::{CircuitBreakerConfig, RetryConfig};
    use crate::testing::ScriptedProvider;
    use chrono::Utc;
    use index::{ManualClock, MemoryCache};

    const DIM: usize = 8;

    fn config() -> EmbeddingConfig {
        EmbeddingConfig::new("scripted-v1", DIM).with_retry(
            RetryConfig::default()
                .with_base_delay(Duration::from_millis(1))
                .with_max_delay(Duration::from_millis(2))
                .with_jitter(false),
        )
    }

    fn generator(provider: Arc<ScriptedProvider>, cfg: EmbeddingConfig) -> EmbeddingGenerator {
        EmbeddingGenerator::new(provider, Arc::new(MemoryCache::new()), cfg).unwrap()
    }

    fn item(id: &str, title: &str) -> SearchableItem {
        SearchableItem::new(id, title, Utc::now())
    }

    #[tokio::test]
    async fn query_is_cached_after_first_call() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        let gen = generator(provider.clone(), config());

        let first = gen.embed_query("  Amazing CLUTCH ").await.unwrap();
        let second = gen.embed_query("amazing clutch").await.unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), DIM);
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn empty_query_is_rejected_without_provider_call() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        let gen = generator(provider.clone(), config());
        assert_eq!(gen.embed_query("   ").await, Err(SemanticError::EmptyInput));
        assert_eq!(provider.calls(), 0);
    }

    #[tokio::test]
    async fn transient_failures_are_retried() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        provider.fail_next(2, SemanticError::Upstream("503".into()));
        let gen = generator(provider.clone(), config().with_query_timeout(Duration::from_secs(1)));
        assert!(gen.embed_query("ace").await.is_ok());
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn slow_provider_times_out_on_query_path() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        provider.set_delay(Duration::from_millis(200));
        let gen = generator(provider, config().with_query_timeout(Duration::from_millis(20)));
        let started = Instant::now();
        assert_eq!(
            gen.embed_query("ace").await,
            Err(SemanticError::Timeout(Duration::from_millis(20)))
        );
        assert!(started.elapsed() < Duration::from_millis(150));
    }

    #[tokio::test]
    async fn breaker_opens_and_fails_fast() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        provider.fail_always(Some(SemanticError::Upstream("down".into())));
        let cfg = config()
            .with_query_timeout(Duration::from_secs(1))
            .with_retry(RetryConfig::default().with_max_attempts(1))
            .with_circuit_breaker(CircuitBreakerConfig::default().with_failure_threshold(2));
        let gen = generator(provider.clone(), cfg);

        for text in ["a", "b"] {
            assert!(matches!(
                gen.embed_query(text).await,
                Err(SemanticError::Upstream(_))
            ));
        }
        assert_eq!(gen.circuit_state(), CircuitState::Open);
        let calls = provider.calls();
        assert!(matches!(
            gen.embed_query("c").await,
            Err(SemanticError::CircuitOpen(_))
        ));
        assert_eq!(provider.calls(), calls);
    }

    #[tokio::test]
    async fn wrong_dimension_is_rejected() {
        let provider =
            Arc::new(ScriptedProvider::new("scripted-v1", DIM).with_vector("odd", vec![1.0, 0.0]));
        let gen = generator(provider, config().with_query_timeout(Duration::from_secs(1)));
        assert_eq!(
            gen.embed_query("odd one").await,
            Err(SemanticError::DimensionMismatch {
                expected: DIM,
                actual: 2
            })
        );
    }

    #[tokio::test]
    async fn item_failure_becomes_pending() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        provider.fail_always(Some(SemanticError::Http {
            status: 400,
            message: "bad".into(),
        }));
        let gen = generator(provider.clone(), config());
        let outcome = gen.embed_item(&item("1", "Clutch")).await;
        assert!(matches!(outcome, ItemEmbedding::Pending(SemanticError::Http { .. })));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn item_record_carries_model_and_clock_time() {
        let clock = Arc::new(ManualClock::default());
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        let gen = generator(provider, config()).with_clock(clock.clone());
        let record = gen
            .embed_item(&item("1", "Clutch"))
            .await
            .into_record()
            .unwrap();
        assert_eq!(record.model, "scripted-v1");
        assert_eq!(record.embedded_at, clock.now());
        assert!(record.is_current("scripted-v1", DIM));
    }

    #[tokio::test]
    async fn batch_serves_hits_then_one_call_for_misses() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        let gen = generator(provider.clone(), config());
        let warm = item("1", "Warm");
        assert!(gen.embed_item(&warm).await.is_ready());
        assert_eq!(provider.calls(), 1);

        let batch = vec![item("2", "Cold A"), warm.clone(), item("3", "Cold B")];
        let out = gen.embed_batch(&batch).await.unwrap();
        assert_eq!(out.cache_hits, 1);
        assert_eq!(out.generated, 2);
        assert_eq!(provider.calls(), 2);
        assert_eq!(provider.texts_embedded(), 3);
        let ids: Vec<&str> = out.records.iter().map(|(id, _)| id.as_str()).collect();
        assert_eq!(ids, vec!["2", "1", "3"]);
    }

    #[tokio::test]
    async fn batch_surfaces_throttling() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        provider.fail_always(Some(SemanticError::Throttled {
            retry_after: Some(Duration::from_millis(1)),
        }));
        let gen = generator(provider, config());
        let err = gen.embed_batch(&[item("1", "A")]).await.unwrap_err();
        assert!(matches!(err, SemanticError::Throttled { .. }));
        assert_eq!(gen.circuit_state(), CircuitState::Closed);
    }

    #[tokio::test]
    async fn model_mismatch_is_a_config_error() {
        let provider = Arc::new(ScriptedProvider::new("other", DIM));
        assert!(matches!(
            EmbeddingGenerator::new(provider, Arc::new(MemoryCache::new()), config()),
            Err(SemanticError::InvalidConfig(_))
        ));
    }

    #[tokio::test]
    async fn canonical_version_changes_cache_identity() {
        let provider = Arc::new(ScriptedProvider::new("scripted-v1", DIM));
        let store: Arc<MemoryCache> = Arc::new(MemoryCache::new());
        let v1 = EmbeddingGenerator::new(provider.clone(), store.clone(), config()).unwrap();
        v1.embed_query("ace").await.unwrap();

        let mut bumped = CanonicalizeConfig::default();
        bumped.version = 2;
        let v2 = EmbeddingGenerator::new(provider.clone(), store, config())
            .unwrap()
            .with_canonical(bumped);
        v2.embed_query("ace").await.unwrap();
        assert_eq!(provider.calls(), 2);
    }
}
