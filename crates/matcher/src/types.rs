use index::{IndexError, ItemFilters, ItemMetadata};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// What to do with a `limit` outside `[1, max_limit]`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LimitPolicy {
    /// Fail the request with `InvalidRequest`.
    #[default]
    Reject,
    /// Clamp into range and carry on.
    Clamp,
}

/// Engine-wide tuning.
///
/// `SearchConfig` is cheap to clone and serde-friendly so it can be embedded
/// in the pipeline YAML.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SearchConfig {
    /// Minimum number of lexical candidates fetched per query.
    pub candidate_width: usize,
    /// Upper bound on candidates, whatever the page asks for.
    pub max_candidate_width: usize,
    pub default_limit: usize,
    pub max_limit: usize,
    /// Offsets must be strictly below this.
    pub max_offset: usize,
    pub limit_policy: LimitPolicy,
    #[serde(rename = "candidate_ttl_secs", with = "duration_secs")]
    pub candidate_ttl: Duration,
    #[serde(rename = "metadata_ttl_secs", with = "duration_secs")]
    pub metadata_ttl: Duration,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            candidate_width: 100,
            max_candidate_width: 500,
            default_limit: 20,
            max_limit: 100,
            max_offset: 500,
            limit_policy: LimitPolicy::Reject,
            candidate_ttl: Duration::from_secs(5 * 60),
            metadata_ttl: Duration::from_secs(15 * 60),
        }
    }
}

impl SearchConfig {
    pub fn with_limit_policy(mut self, policy: LimitPolicy) -> Self {
        self.limit_policy = policy;
        self
    }

    pub fn with_candidate_width(mut self, width: usize, max: usize) -> Self {
        self.candidate_width = width;
        self.max_candidate_width = max;
        self
    }

    pub fn with_ttls(mut self, candidates: Duration, metadata: Duration) -> Self {
        self.candidate_ttl = candidates;
        self.metadata_ttl = metadata;
        self
    }

    pub fn validate(&self) -> Result<(), SearchError> {
        if self.candidate_width == 0 || self.max_candidate_width < self.candidate_width {
            return Err(SearchError::InvalidRequest(
                "candidate_width must be positive and <= max_candidate_width".into(),
            ));
        }
        if self.max_limit == 0 || self.default_limit == 0 || self.default_limit > self.max_limit {
            return Err(SearchError::InvalidRequest(
                "default_limit must be within [1, max_limit]".into(),
            ));
        }
        if self.max_offset == 0 {
            return Err(SearchError::InvalidRequest(
                "max_offset must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Lexical candidates to fetch for a page ending at `offset + limit`.
    pub fn width_for(&self, offset: usize, limit: usize) -> usize {
        (offset + limit).clamp(self.candidate_width, self.max_candidate_width)
    }
}

mod duration_secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_secs(u64::deserialize(d)?))
    }
}

/// One search call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: ItemFilters,
    /// Defaults to [`SearchConfig::default_limit`].
    #[serde(default)]
    pub limit: Option<usize>,
    #[serde(default)]
    pub offset: Option<usize>,
}

impl SearchRequest {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            ..Self::default()
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_filters(mut self, filters: ItemFilters) -> Self {
        self.filters = filters;
        self
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SearchMode {
    /// Lexical candidates re-ranked by similarity.
    Hybrid,
    /// Lexical order only, because the semantic side was unavailable.
    LexicalOnly,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchMode::Hybrid => "hybrid",
            SearchMode::LexicalOnly => "lexical_only",
        }
    }
}

/// Why a query fell back to lexical order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DegradedReason {
    EmbeddingError,
    EmbeddingTimeout,
    CircuitOpen,
    VectorSearchError,
}

impl DegradedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            DegradedReason::EmbeddingError => "embedding_error",
            DegradedReason::EmbeddingTimeout => "embedding_timeout",
            DegradedReason::CircuitOpen => "circuit_open",
            DegradedReason::VectorSearchError => "vector_search_error",
        }
    }

    pub(crate) fn from_embedding(err: &semantic::SemanticError) -> Self {
        match err {
            semantic::SemanticError::Timeout(_) => DegradedReason::EmbeddingTimeout,
            semantic::SemanticError::CircuitOpen(_) => DegradedReason::CircuitOpen,
            _ => DegradedReason::EmbeddingError,
        }
    }
}

/// One result on the page.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchHit {
    pub id: String,
    /// 1-based position in the full merged order.
    pub rank: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_score: Option<f32>,
    pub lexical_score: f32,
    pub snippet: String,
    pub metadata: ItemMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    /// Candidates found, capped at the candidate width.
    pub estimated_total: usize,
    pub latency_ms: u64,
    pub mode: SearchMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub degraded_reason: Option<DegradedReason>,
    /// Physical namespace that served the query.
    pub index_version: String,
    pub offset: usize,
    pub limit: usize,
    pub has_more: bool,
}

/// Errors produced by the search layer.
#[derive(Debug, Error)]
pub enum SearchError {
    /// The request is malformed; never retried.
    #[error("invalid search request: {0}")]
    InvalidRequest(String),
    /// The alias does not point at an ACTIVE version.
    #[error("no active index version for `{0}`")]
    NoActiveIndex(String),
    #[error("lexical search failed: {0}")]
    Lexical(String),
    #[error("index error: {0}")]
    Index(#[from] IndexError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = SearchConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.default_limit, 20);
        assert_eq!(cfg.limit_policy, LimitPolicy::Reject);
    }

    #[test]
    fn width_is_clamped() {
        let cfg = SearchConfig::default();
        assert_eq!(cfg.width_for(0, 20), 100);
        assert_eq!(cfg.width_for(180, 20), 200);
        assert_eq!(cfg.width_for(499, 100), 500);
    }

    #[test]
    fn invalid_limits_rejected() {
        let cfg = SearchConfig {
            default_limit: 200,
            ..SearchConfig::default()
        };
        match cfg.validate() {
            Err(SearchError::InvalidRequest(msg)) => assert!(msg.contains("default_limit")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn config_reads_yaml_style_keys() {
        let cfg: SearchConfig = serde_json::from_str(
            r#"{"limit_policy":"clamp","candidate_ttl_secs":60,"max_limit":50}"#,
        )
        .unwrap();
        assert_eq!(cfg.limit_policy, LimitPolicy::Clamp);
        assert_eq!(cfg.candidate_ttl, Duration::from_secs(60));
        assert_eq!(cfg.max_limit, 50);
        assert_eq!(cfg.metadata_ttl, Duration::from_secs(900));
    }

    #[test]
    fn labels_match_wire_names() {
        assert_eq!(
            serde_json::to_value(SearchMode::LexicalOnly).unwrap(),
            serde_json::json!("lexical_only")
        );
        assert_eq!(
            serde_json::to_value(DegradedReason::CircuitOpen).unwrap(),
            serde_json::json!(DegradedReason::CircuitOpen.as_str())
        );
    }

    #[test]
    fn request_defaults() {
        let req: SearchRequest = serde_json::from_str(r#"{"query":"ace"}"#).unwrap();
        assert_eq!(req.limit, None);
        assert!(req.filters.is_empty());
    }
}
