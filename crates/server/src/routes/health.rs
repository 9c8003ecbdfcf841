use crate::error::{ServerError, ServerResult};
use crate::metrics::PrometheusMetrics;
use crate::state::ServerState;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use hybrid_search::LifecycleError;
use serde_json::json;
use std::sync::Arc;

/// Health check endpoint (liveness)
/// Returns 200 if server is running
pub async fn health_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "service": "search-server",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": state.uptime_secs(),
    }))
}

/// Readiness check endpoint
/// Returns 200 once the default index has an ACTIVE version, 503 otherwise
pub async fn readiness_check(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    let index = state.stack.index_name().to_string();
    let (ready, active_version) = match state.stack.manager.status(&index) {
        Ok(status) => (status.active_version.is_some(), status.active_version),
        Err(LifecycleError::NotFound(_)) => (false, None),
        Err(err) => {
            tracing::warn!(index = %index, error = %err, "readiness probe could not read index status");
            (false, None)
        }
    };

    let code = if ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (
        code,
        Json(json!({
            "status": if ready { "ready" } else { "not_ready" },
            "service": "search-server",
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "uptime_seconds": state.uptime_secs(),
            "components": {
                "api": "ready",
                "index": {
                    "name": index,
                    "active_version": active_version,
                },
                "backfill_running": state.backfill_in_flight(),
            }
        })),
    )
}

/// Prometheus metrics endpoint
pub async fn metrics(State(state): State<Arc<ServerState>>) -> ServerResult<impl IntoResponse> {
    let handle = match (&state.prometheus, state.config.metrics_enabled) {
        (Some(handle), true) => handle,
        _ => return Err(ServerError::NotFound("metrics are disabled".into())),
    };

    // The age gauge is sampled on scrape.
    match state.stack.manager.status_all() {
        Ok(indexes) => {
            for status in indexes {
                if let Some(age) = status.active_age_secs {
                    PrometheusMetrics.record_active_age(&status.index, age);
                }
            }
        }
        Err(err) => tracing::warn!(error = %err, "could not sample index ages"),
    }

    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        handle.render(),
    ))
}
