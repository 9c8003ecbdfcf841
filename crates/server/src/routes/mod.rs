//! API route handlers
//!
//! Routes are organized by functionality:
//!
//! - `health`: Liveness, readiness, and Prometheus metrics
//! - `search`: Hybrid queries (GET with query params, POST with JSON)
//! - `items`: Idempotent item upsert and delete
//! - `admin`: Index lifecycle and embedding backfill

pub mod admin;
pub mod health;
pub mod items;
pub mod search;

use crate::error::{ServerError, ServerResult};
use axum::http::Uri;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;

/// API version and base info
///
/// # Response
///
/// ```json
/// {
///   "name": "Hybrid Search Server",
///   "version": "0.1.0",
///   "api_version": "v1",
///   "endpoints": ["..."]
/// }
/// ```
pub async fn api_info() -> ServerResult<impl IntoResponse> {
    Ok(Json(json!({
        "name": "Hybrid Search Server",
        "version": env!("CARGO_PKG_VERSION"),
        "api_version": "v1",
        "endpoints": [
            "/api/v1/search",
            "/api/v1/items/{id}",
            "/api/v1/admin/indexes",
            "/api/v1/admin/indexes/{name}",
            "/api/v1/admin/indexes/{name}/rebuild",
            "/api/v1/admin/indexes/{name}/swap",
            "/api/v1/admin/indexes/{name}/rollback",
            "/api/v1/admin/indexes/{name}/cleanup",
            "/api/v1/admin/backfill",
            "/health",
            "/ready",
            "/metrics"
        ]
    })))
}

/// 404 Not Found handler
pub async fn not_found(uri: Uri) -> ServerError {
    ServerError::NotFound(format!("route {}", uri.path()))
}
