//! Server initialization and routing
//!
//! This module handles the Axum server setup:
//! - Router configuration with all API endpoints
//! - Middleware stack (request id, logging, compression, CORS, timeout)
//! - Graceful shutdown handling

use crate::config::ServerConfig;
use crate::middleware::{log_requests, request_id};
use crate::routes::{admin, api_info, health, items, not_found, search};
use crate::state::ServerState;
use axum::extract::DefaultBodyLimit;
use axum::http::StatusCode;
use axum::middleware::from_fn;
use axum::routing::{get, post, put};
use axum::Router;
use hybrid_search::{BackfillScheduler, CachePurger, SearchStack};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

/// Build the Axum router with all routes and middleware
///
/// Middleware stack (applied in reverse order):
/// 1. Request ID tracking
/// 2. Request logging
/// 3. Timeout handling
/// 4. Compression
/// 5. CORS
pub fn build_router(state: Arc<ServerState>) -> Router {
    let cors = if state.config.enable_cors {
        CorsLayer::new()
            .allow_origin(Any)
            .allow_methods(Any)
            .allow_headers(Any)
    } else {
        CorsLayer::new()
    };

    let public_routes = Router::new()
        .route("/", get(api_info))
        .route("/health", get(health::health_check))
        .route("/ready", get(health::readiness_check))
        .route("/metrics", get(health::metrics));

    let api_routes = Router::new()
        .route("/api/v1/search", get(search::search_get).post(search::search_post))
        .route(
            "/api/v1/items/{id}",
            put(items::upsert_item).delete(items::delete_item),
        )
        .route("/api/v1/admin/indexes", get(admin::list_indexes))
        .route("/api/v1/admin/indexes/{name}", get(admin::index_status))
        .route(
            "/api/v1/admin/indexes/{name}/rebuild",
            get(admin::rebuild_status).post(admin::rebuild),
        )
        .route("/api/v1/admin/indexes/{name}/swap", post(admin::swap))
        .route("/api/v1/admin/indexes/{name}/rollback", post(admin::rollback))
        .route("/api/v1/admin/indexes/{name}/cleanup", post(admin::cleanup))
        .route("/api/v1/admin/backfill", post(admin::backfill))
        .layer(DefaultBodyLimit::max(state.config.max_body_size()));

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .fallback(not_found)
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            state.config.timeout(),
        ))
        .layer(CompressionLayer::new())
        .layer(cors)
        .layer(from_fn(request_id))
        .layer(from_fn(log_requests))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `state` until SIGTERM or Ctrl+C.
///
/// Before binding, the default index is brought to a serving state (built
/// from the source of truth if no version is ACTIVE). When backfill is
/// enabled in the pipeline configuration the scheduler runs alongside the
/// server; the cache purger always does. Both stop after the listener drains.
pub async fn start_server(state: ServerState) -> anyhow::Result<()> {
    let config: ServerConfig = (*state.config).clone();
    let stack: SearchStack = state.stack.clone();

    if let Some(report) = stack.ensure_serving().await? {
        tracing::info!(
            index = %report.index,
            version = report.version,
            docs = report.doc_count,
            "initial index version built"
        );
    }

    let scheduler = if stack.config.backfill.enabled {
        let mut scheduler = BackfillScheduler::new(
            stack.backfill.clone(),
            stack.config.backfill_options(),
            Duration::from_secs(stack.config.backfill.interval_secs),
        );
        if state.prometheus.is_some() {
            scheduler = scheduler.with_metrics(Arc::new(crate::metrics::PrometheusMetrics));
        }
        Some(scheduler.spawn())
    } else {
        None
    };
    let purger = CachePurger::new(stack.cache.clone(), stack.config.cache_purge_interval()).spawn();

    let app = build_router(Arc::new(state));
    let addr: SocketAddr = config.socket_addr()?;

    tracing::info!(
        %addr,
        index = %stack.index_name(),
        model = %stack.embeddings.model(),
        "Starting search server"
    );
    tracing::info!(
        "Timeout: {}s, Max body: {}MB",
        config.timeout_secs,
        config.max_body_size_mb
    );
    tracing::info!(
        "CORS: {}, Metrics: {}",
        config.enable_cors,
        config.metrics_enabled
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(handle) = scheduler {
        let runs = handle.stop().await;
        tracing::info!(runs, "backfill scheduler stopped");
    }
    purger.stop().await;

    tracing::info!("Server shutdown complete");
    Ok(())
}

/// Shutdown signal handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C, shutting down..."),
        _ = terminate => tracing::info!("Received SIGTERM, shutting down..."),
    }
}
