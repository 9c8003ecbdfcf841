//! YAML pipeline configuration.
//!
//! One file describes the whole search stack: the embedding provider, the
//! cache TTLs, the query tuning, the index lifecycle and the backfill job.
//! Every section is optional and falls back to the production defaults.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//!
//! embedding:
//!   provider: http
//!   model: text-embedding-3-small
//!   dimension: 1536
//!   api_url: https://api.openai.com
//!   api_key_env: OPENAI_API_KEY
//!   query_timeout_ms: 60
//!   retry:
//!     max_attempts: 3
//!     base_delay_ms: 20
//!   requests_per_second: 50
//!
//! cache:
//!   query_ttl_secs: 3600
//!   candidate_ttl_secs: 300
//!   purge_interval_secs: 60
//!
//! search:
//!   candidate_width: 100
//!   limit_policy: reject
//!
//! index:
//!   name: clips
//!   backend:
//!     kind: redb
//!     path: /var/lib/search/search.redb
//!   keep_retired: 2
//!   canary_queries: ["clutch", "ace"]
//!
//! backfill:
//!   batch_size: 100
//!   interval_secs: 900
//! ```

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use index::{BackendConfig, LifecycleConfig};
use matcher::{LimitPolicy, SearchConfig};
use semantic::{
    CircuitBreakerConfig, EmbeddingConfig, HttpProviderConfig, RateLimitConfig, RetryConfig,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::backfill::BackfillOptions;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),

    #[error("missing required field: {0}")]
    MissingField(String),
}

/// Top-level YAML configuration for the search stack.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    /// Configuration format version
    pub version: String,

    #[serde(default)]
    pub embedding: EmbeddingYamlConfig,

    #[serde(default)]
    pub cache: CacheYamlConfig,

    #[serde(default)]
    pub search: SearchYamlConfig,

    #[serde(default)]
    pub index: IndexYamlConfig,

    #[serde(default)]
    pub backfill: BackfillYamlConfig,
}

impl AppConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: AppConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        self.embedding.validate()?;
        self.cache.validate()?;
        self.search.validate()?;
        self.index.validate()?;
        self.backfill.validate()?;

        // The typed configs re-check their own invariants.
        self.embedding_config()
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;
        self.search_config()
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;
        self.lifecycle_config()
            .validate()
            .map_err(|e| ConfigLoadError::Validation(e.to_string()))?;
        Ok(())
    }

    /// Generator settings, with cache TTLs taken from the `cache` section.
    pub fn embedding_config(&self) -> EmbeddingConfig {
        let e = &self.embedding;
        let mut cfg = EmbeddingConfig::new(e.model.clone(), e.dimension)
            .with_query_timeout(Duration::from_millis(e.query_timeout_ms))
            .with_item_timeout(Duration::from_millis(e.item_timeout_ms))
            .with_batch_timeout(Duration::from_millis(e.batch_timeout_ms))
            .with_cache_ttls(
                Duration::from_secs(self.cache.query_ttl_secs),
                Duration::from_secs(self.cache.item_ttl_secs),
            )
            .with_retry(e.retry)
            .with_circuit_breaker(e.circuit_breaker);
        if let Some(rps) = e.requests_per_second {
            cfg = cfg.with_rate_limit(RateLimitConfig::default().with_requests_per_second(rps));
        }
        cfg
    }

    /// HTTP provider settings. The API key is read from `api_key_env`.
    pub fn http_provider_config(&self) -> Result<HttpProviderConfig, ConfigLoadError> {
        let e = &self.embedding;
        let url = e
            .api_url
            .clone()
            .ok_or_else(|| ConfigLoadError::MissingField("embedding.api_url".into()))?;
        let mut cfg = HttpProviderConfig::new(url, e.model.clone());
        if let Some(var) = &e.api_key_env {
            match env::var(var) {
                Ok(key) if !key.is_empty() => cfg = cfg.with_api_key(key),
                _ => {
                    return Err(ConfigLoadError::MissingField(format!(
                        "environment variable {var} (embedding.api_key_env)"
                    )))
                }
            }
        }
        Ok(cfg)
    }

    pub fn search_config(&self) -> SearchConfig {
        let s = &self.search;
        SearchConfig {
            candidate_width: s.candidate_width,
            max_candidate_width: s.max_candidate_width,
            default_limit: s.default_limit,
            max_limit: s.max_limit,
            max_offset: s.max_offset,
            limit_policy: s.limit_policy,
            candidate_ttl: Duration::from_secs(self.cache.candidate_ttl_secs),
            metadata_ttl: Duration::from_secs(self.cache.metadata_ttl_secs),
        }
    }

    pub fn lifecycle_config(&self) -> LifecycleConfig {
        let i = &self.index;
        LifecycleConfig::default()
            .with_embedding(self.embedding.model.clone(), self.embedding.dimension)
            .with_keep_retired(i.keep_retired)
            .with_retention(Duration::from_secs(i.retention_hours * 3600))
            .with_batch_size(i.batch_size)
            .with_lock_stale_after(Duration::from_secs(i.lock_stale_secs))
            .with_canary_queries(i.canary_queries.iter().cloned())
    }

    pub fn backend_config(&self) -> BackendConfig {
        match (&self.index.backend.kind, &self.index.backend.path) {
            (BackendKind::Redb, Some(path)) => BackendConfig::redb(path.clone()),
            _ => BackendConfig::in_memory(),
        }
    }

    pub fn backfill_options(&self) -> BackfillOptions {
        let b = &self.backfill;
        BackfillOptions {
            batch_size: b.batch_size,
            dry_run: false,
            force: false,
            max_throttle_retries: b.max_throttle_retries,
            throttle_base_delay: Duration::from_millis(b.throttle_base_delay_ms),
            throttle_max_delay: Duration::from_millis(b.throttle_max_delay_ms),
        }
    }

    pub fn cache_purge_interval(&self) -> Duration {
        Duration::from_secs(self.cache.purge_interval_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            embedding: EmbeddingYamlConfig::default(),
            cache: CacheYamlConfig::default(),
            search: SearchYamlConfig::default(),
            index: IndexYamlConfig::default(),
            backfill: BackfillYamlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Deterministic, offline vectors.
    #[default]
    Stub,
    /// OpenAI-compatible `/v1/embeddings`.
    Http,
}

/// Embedding provider YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EmbeddingYamlConfig {
    #[serde(default)]
    pub provider: ProviderKind,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_dimension")]
    pub dimension: usize,

    #[serde(default)]
    pub api_url: Option<String>,

    /// Name of the environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,

    #[serde(default = "default_query_timeout_ms")]
    pub query_timeout_ms: u64,

    #[serde(default = "default_item_timeout_ms")]
    pub item_timeout_ms: u64,

    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    #[serde(default)]
    pub retry: RetryConfig,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,

    /// Provider call pacing; unset means unlimited.
    #[serde(default)]
    pub requests_per_second: Option<f64>,
}

impl EmbeddingYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.model.trim().is_empty() {
            return Err(ConfigLoadError::Validation(
                "embedding.model must not be empty".to_string(),
            ));
        }
        if self.dimension == 0 {
            return Err(ConfigLoadError::Validation(
                "embedding.dimension must be >= 1".to_string(),
            ));
        }
        if self.provider == ProviderKind::Http && self.api_url.is_none() {
            return Err(ConfigLoadError::MissingField("embedding.api_url".to_string()));
        }
        if let Some(rps) = self.requests_per_second {
            if !(rps.is_finite() && rps > 0.0) {
                return Err(ConfigLoadError::Validation(
                    "embedding.requests_per_second must be positive".to_string(),
                ));
            }
        }
        Ok(())
    }
}

impl Default for EmbeddingYamlConfig {
    fn default() -> Self {
        Self {
            provider: ProviderKind::Stub,
            model: default_model(),
            dimension: default_dimension(),
            api_url: None,
            api_key_env: None,
            query_timeout_ms: default_query_timeout_ms(),
            item_timeout_ms: default_item_timeout_ms(),
            batch_timeout_ms: default_batch_timeout_ms(),
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            requests_per_second: None,
        }
    }
}

/// Cache TTLs, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CacheYamlConfig {
    #[serde(default = "default_query_ttl")]
    pub query_ttl_secs: u64,

    #[serde(default = "default_item_ttl")]
    pub item_ttl_secs: u64,

    #[serde(default = "default_candidate_ttl")]
    pub candidate_ttl_secs: u64,

    #[serde(default = "default_metadata_ttl")]
    pub metadata_ttl_secs: u64,

    /// How often expired entries are swept from the in-process cache.
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl CacheYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        for (name, ttl) in [
            ("query_ttl_secs", self.query_ttl_secs),
            ("item_ttl_secs", self.item_ttl_secs),
            ("candidate_ttl_secs", self.candidate_ttl_secs),
            ("metadata_ttl_secs", self.metadata_ttl_secs),
            ("purge_interval_secs", self.purge_interval_secs),
        ] {
            if ttl == 0 {
                return Err(ConfigLoadError::Validation(format!(
                    "cache.{name} must be >= 1"
                )));
            }
        }
        Ok(())
    }
}

impl Default for CacheYamlConfig {
    fn default() -> Self {
        Self {
            query_ttl_secs: default_query_ttl(),
            item_ttl_secs: default_item_ttl(),
            candidate_ttl_secs: default_candidate_ttl(),
            metadata_ttl_secs: default_metadata_ttl(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

/// Query tuning YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchYamlConfig {
    #[serde(default = "default_candidate_width")]
    pub candidate_width: usize,

    #[serde(default = "default_max_candidate_width")]
    pub max_candidate_width: usize,

    #[serde(default = "default_limit")]
    pub default_limit: usize,

    #[serde(default = "default_max_limit")]
    pub max_limit: usize,

    #[serde(default = "default_max_offset")]
    pub max_offset: usize,

    #[serde(default)]
    pub limit_policy: LimitPolicy,
}

impl SearchYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.max_limit == 0 {
            return Err(ConfigLoadError::Validation(
                "search.max_limit must be >= 1".to_string(),
            ));
        }
        if self.candidate_width > self.max_candidate_width {
            return Err(ConfigLoadError::Validation(
                "search.candidate_width must not exceed search.max_candidate_width".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for SearchYamlConfig {
    fn default() -> Self {
        let defaults = SearchConfig::default();
        Self {
            candidate_width: defaults.candidate_width,
            max_candidate_width: defaults.max_candidate_width,
            default_limit: defaults.default_limit,
            max_limit: defaults.max_limit,
            max_offset: defaults.max_offset,
            limit_policy: defaults.limit_policy,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    #[default]
    InMemory,
    Redb,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct BackendYamlConfig {
    #[serde(default)]
    pub kind: BackendKind,

    /// Database file, required for `redb`.
    #[serde(default)]
    pub path: Option<String>,
}

/// Index lifecycle YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndexYamlConfig {
    /// Logical index (alias) name.
    #[serde(default = "default_index_name")]
    pub name: String,

    #[serde(default)]
    pub backend: BackendYamlConfig,

    #[serde(default = "default_keep_retired")]
    pub keep_retired: usize,

    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default)]
    pub canary_queries: Vec<String>,

    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl IndexYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.name.is_empty()
            || !self
                .name
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(ConfigLoadError::Validation(format!(
                "index.name {:?} must be ASCII alphanumerics, '-' or '_'",
                self.name
            )));
        }
        if self.backend.kind == BackendKind::Redb && self.backend.path.is_none() {
            return Err(ConfigLoadError::MissingField("index.backend.path".to_string()));
        }
        if self.batch_size == 0 {
            return Err(ConfigLoadError::Validation(
                "index.batch_size must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for IndexYamlConfig {
    fn default() -> Self {
        Self {
            name: default_index_name(),
            backend: BackendYamlConfig::default(),
            keep_retired: default_keep_retired(),
            retention_hours: default_retention_hours(),
            batch_size: default_batch_size(),
            canary_queries: Vec::new(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

/// Backfill job YAML configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BackfillYamlConfig {
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_max_throttle_retries")]
    pub max_throttle_retries: u32,

    #[serde(default = "default_throttle_base_delay_ms")]
    pub throttle_base_delay_ms: u64,

    #[serde(default = "default_throttle_max_delay_ms")]
    pub throttle_max_delay_ms: u64,

    /// Scheduler period.
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,

    #[serde(default = "true_value")]
    pub enabled: bool,
}

impl BackfillYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.batch_size == 0 {
            return Err(ConfigLoadError::Validation(
                "backfill.batch_size must be >= 1".to_string(),
            ));
        }
        if self.interval_secs == 0 {
            return Err(ConfigLoadError::Validation(
                "backfill.interval_secs must be >= 1".to_string(),
            ));
        }
        if self.throttle_base_delay_ms > self.throttle_max_delay_ms {
            return Err(ConfigLoadError::Validation(
                "backfill.throttle_base_delay_ms must not exceed throttle_max_delay_ms".to_string(),
            ));
        }
        Ok(())
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }
}

impl Default for BackfillYamlConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            max_throttle_retries: default_max_throttle_retries(),
            throttle_base_delay_ms: default_throttle_base_delay_ms(),
            throttle_max_delay_ms: default_throttle_max_delay_ms(),
            interval_secs: default_interval_secs(),
            enabled: true,
        }
    }
}

fn default_model() -> String {
    "stub-embedding-v1".to_string()
}
fn default_dimension() -> usize {
    384
}
fn default_query_timeout_ms() -> u64 {
    60
}
fn default_item_timeout_ms() -> u64 {
    10_000
}
fn default_batch_timeout_ms() -> u64 {
    30_000
}
fn default_query_ttl() -> u64 {
    3600
}
fn default_item_ttl() -> u64 {
    24 * 3600
}
fn default_candidate_ttl() -> u64 {
    300
}
fn default_metadata_ttl() -> u64 {
    900
}
fn default_purge_interval() -> u64 {
    60
}
fn default_candidate_width() -> usize {
    100
}
fn default_max_candidate_width() -> usize {
    500
}
fn default_limit() -> usize {
    20
}
fn default_max_limit() -> usize {
    100
}
fn default_max_offset() -> usize {
    500
}
fn default_index_name() -> String {
    "clips".to_string()
}
fn default_keep_retired() -> usize {
    2
}
fn default_retention_hours() -> u64 {
    7 * 24
}
fn default_batch_size() -> usize {
    100
}
fn default_lock_stale_secs() -> u64 {
    6 * 3600
}
fn default_max_throttle_retries() -> u32 {
    5
}
fn default_throttle_base_delay_ms() -> u64 {
    1000
}
fn default_throttle_max_delay_ms() -> u64 {
    30_000
}
fn default_interval_secs() -> u64 {
    15 * 60
}
fn true_value() -> bool {
    true
}
