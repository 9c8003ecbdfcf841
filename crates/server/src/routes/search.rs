use crate::error::{ServerError, ServerResult};
use crate::state::ServerState;
use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::Json;
use chrono::{DateTime, Utc};
use hybrid_search::{ItemFilters, SearchRequest, SearchResponse};
use serde::Deserialize;
use std::sync::Arc;

/// Query string of `GET /api/v1/search`.
#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
    pub category: Option<String>,
    pub owner: Option<String>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    /// Comma separated; every tag must be present.
    pub tags: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl From<SearchParams> for SearchRequest {
    fn from(params: SearchParams) -> Self {
        let tags = params
            .tags
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        SearchRequest {
            query: params.q,
            filters: ItemFilters {
                category: params.category,
                owner: params.owner,
                created_after: params.created_after,
                created_before: params.created_before,
                tags,
            },
            limit: params.limit,
            offset: params.offset,
        }
    }
}

/// Search endpoint (query parameters)
///
/// `GET /api/v1/search?q=clutch&category=fps&tags=ranked,ace&limit=20&offset=0`
pub async fn search_get(
    State(state): State<Arc<ServerState>>,
    params: Result<Query<SearchParams>, QueryRejection>,
) -> ServerResult<Json<SearchResponse>> {
    let Query(params) = params.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    run(&state, params.into()).await
}

/// Search endpoint (JSON body)
pub async fn search_post(
    State(state): State<Arc<ServerState>>,
    body: Result<Json<SearchRequest>, JsonRejection>,
) -> ServerResult<Json<SearchResponse>> {
    let Json(request) = body.map_err(|e| ServerError::InvalidRequest(e.body_text()))?;
    run(&state, request).await
}

async fn run(state: &ServerState, request: SearchRequest) -> ServerResult<Json<SearchResponse>> {
    let response = state.stack.searcher.search(&request).await?;
    tracing::debug!(
        query = %request.query,
        results = response.results.len(),
        mode = response.mode.as_str(),
        latency_ms = response.latency_ms,
        "search served"
    );
    Ok(Json(response))
}
