use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Duration;

use super::EmbeddingProvider;
use crate::SemanticError;

/// Connection settings for an OpenAI-compatible embeddings endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpProviderConfig {
    /// Base URL (`https://api.openai.com`) or the full `/v1/embeddings` URL.
    pub api_url: String,
    pub model: String,
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout", with = "crate::serde_millis")]
    pub request_timeout: Duration,
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(10)
}

impl HttpProviderConfig {
    pub fn new(api_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into(),
            model: model.into(),
            api_key: None,
            request_timeout: default_request_timeout(),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// The endpoint requests are posted to.
    pub fn endpoint(&self) -> String {
        let base = self.api_url.trim_end_matches('/');
        if base.ends_with("/embeddings") {
            base.to_string()
        } else if base.ends_with("/v1") {
            format!("{base}/embeddings")
        } else {
            format!("{base}/v1/embeddings")
        }
    }
}

/// Provider backed by `POST /v1/embeddings`.
#[derive(Debug, Clone)]
pub struct HttpEmbeddingProvider {
    client: reqwest::Client,
    endpoint: String,
    config: HttpProviderConfig,
}

impl HttpEmbeddingProvider {
    pub fn new(config: HttpProviderConfig) -> Result<Self, SemanticError> {
        if config.model.trim().is_empty() {
            return Err(SemanticError::InvalidConfig(
                "http provider needs a model name".into(),
            ));
        }
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(Duration::from_secs(5))
            .pool_max_idle_per_host(32)
            .build()
            .map_err(|e| SemanticError::InvalidConfig(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: config.endpoint(),
            config,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    fn model(&self) -> &str {
        &self.config.model
    }

    fn name(&self) -> &str {
        "http"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SemanticError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "input": texts, "model": self.config.model }));
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(map_transport_error)?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(response.headers());
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, retry_after, &body));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| SemanticError::Upstream(format!("failed to read response body: {e}")))?;
        let vectors = parse_embeddings(&body)?;
        if vectors.len() != texts.len() {
            return Err(SemanticError::InvalidResponse(format!(
                "asked for {} embeddings, got {}",
                texts.len(),
                vectors.len()
            )));
        }
        Ok(vectors)
    }
}

fn map_transport_error(err: reqwest::Error) -> SemanticError {
    if err.is_timeout() {
        SemanticError::Upstream(format!("request timed out: {err}"))
    } else if err.is_builder() {
        SemanticError::InvalidConfig(format!("bad request: {err}"))
    } else {
        SemanticError::Upstream(format!("HTTP request failed: {err}"))
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

pub(crate) fn classify_status(
    status: StatusCode,
    retry_after: Option<Duration>,
    body: &str,
) -> SemanticError {
    let snippet: String = body.chars().take(200).collect();
    if status == StatusCode::TOO_MANY_REQUESTS {
        SemanticError::Throttled { retry_after }
    } else if status.is_server_error() || status == StatusCode::REQUEST_TIMEOUT {
        SemanticError::Upstream(format!("HTTP {status}: {snippet}"))
    } else {
        SemanticError::Http {
            status: status.as_u16(),
            message: snippet,
        }
    }
}

#[derive(Deserialize)]
struct EmbeddingsResponse {
    data: Vec<EmbeddingDatum>,
}

#[derive(Deserialize)]
struct EmbeddingDatum {
    embedding: Vec<f32>,
    #[serde(default)]
    index: Option<usize>,
}

/// Vectors from a `{"data": [{"embedding": [...], "index": n}]}` body, in
/// input order.
pub(crate) fn parse_embeddings(body: &[u8]) -> Result<Vec<Vec<f32>>, SemanticError> {
    let mut parsed: EmbeddingsResponse = serde_json::from_slice(body)
        .map_err(|e| SemanticError::InvalidResponse(format!("unexpected embeddings body: {e}")))?;
    if parsed.data.iter().all(|d| d.index.is_some()) {
        parsed.data.sort_by_key(|d| d.index);
    }
    Ok(parsed.data.into_iter().map(|d| d.embedding).collect())
}
