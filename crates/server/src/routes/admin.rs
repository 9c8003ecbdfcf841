//! Index lifecycle and backfill administration.

use crate::error::{ServerError, ServerResult};
use crate::jobs::RebuildJob;
use crate::state::ServerState;
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use hybrid_search::{BackfillStats, CancelHandle, IndexStatus, RebuildOptions};
use index::Clock;
use index::{CleanupReport, SwapOutcome};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Instant;

/// Cursor name for backfills started through the API.
pub const ADMIN_BACKFILL_JOB: &str = "admin-embeddings";

const ADMIN_HOLDER: &str = "admin-api";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RebuildBody {
    #[serde(default = "default_true")]
    pub swap: bool,
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

impl Default for RebuildBody {
    fn default() -> Self {
        Self {
            swap: true,
            dry_run: false,
            batch_size: None,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct VersionBody {
    #[serde(default)]
    pub version: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct BackfillBody {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub force: bool,
    #[serde(default)]
    pub batch_size: Option<usize>,
}

/// An empty body means "all defaults".
fn parse_body<T: DeserializeOwned + Default>(body: &Bytes) -> ServerResult<T> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(body).map_err(|e| ServerError::InvalidRequest(format!("invalid JSON body: {e}")))
}

pub async fn list_indexes(
    State(state): State<Arc<ServerState>>,
) -> ServerResult<Json<Vec<IndexStatus>>> {
    Ok(Json(state.stack.manager.status_all()?))
}

pub async fn index_status(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ServerResult<Json<IndexStatus>> {
    Ok(Json(state.stack.manager.status(&name)?))
}

/// Build a new version from the source of truth
///
/// A dry run answers synchronously with the counts. A real build runs in the
/// background, outside the request timeout: the answer is 202 with the job,
/// and `GET` on the same path reports how it ended. A build already running,
/// here or under another process's lock, is a 409.
pub async fn rebuild(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ServerResult<Response> {
    let body: RebuildBody = parse_body(&body)?;
    let options = RebuildOptions {
        swap_after_build: body.swap,
        dry_run: body.dry_run,
        batch_size: body.batch_size,
        holder: Some(ADMIN_HOLDER.to_string()),
    };
    if options.dry_run {
        let report = state.stack.manager.rebuild(&name, options).await?;
        return Ok(Json(report).into_response());
    }

    let now = state.stack.clock.now();
    if let Some(lock) = state.stack.catalog.lock(&name)? {
        if !lock.is_stale(now, state.stack.manager.config().lock_stale_after) {
            return Err(ServerError::Conflict(format!(
                "index {name} is already being rebuilt by {} since {}",
                lock.holder, lock.acquired_at
            )));
        }
    }
    let Some(job) = state.rebuilds.start(&name, now) else {
        return Err(ServerError::Conflict(format!(
            "a rebuild of {name} is already in progress"
        )));
    };

    let task_state = state.clone();
    tokio::spawn(async move {
        let stack = &task_state.stack;
        match stack.manager.rebuild(&name, options).await {
            Ok(report) => {
                tracing::info!(
                    event = "rebuild.admin",
                    index = %name,
                    version = report.version,
                    docs = report.doc_count,
                    duration_ms = report.duration_ms,
                    "admin rebuild finished"
                );
                task_state.rebuilds.succeed(&name, report, stack.clock.now());
            }
            Err(err) => {
                let err = ServerError::from(err);
                tracing::error!(
                    event = "rebuild.admin",
                    index = %name,
                    code = err.error_code(),
                    error = %err,
                    "admin rebuild failed"
                );
                task_state.rebuilds.fail(&name, &err, stack.clock.now());
            }
        }
    });

    Ok((StatusCode::ACCEPTED, Json(job)).into_response())
}

/// Latest rebuild started through this server for `name`
pub async fn rebuild_status(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ServerResult<Json<RebuildJob>> {
    state
        .rebuilds
        .latest(&name)
        .map(Json)
        .ok_or_else(|| ServerError::NotFound(format!("no rebuild of {name} started through the API")))
}

pub async fn swap(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ServerResult<Json<SwapOutcome>> {
    let body: VersionBody = parse_body(&body)?;
    Ok(Json(state.stack.manager.swap(&name, body.version).await?))
}

pub async fn rollback(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
    body: Bytes,
) -> ServerResult<Json<SwapOutcome>> {
    let body: VersionBody = parse_body(&body)?;
    Ok(Json(state.stack.manager.rollback(&name, body.version).await?))
}

/// Delete RETIRED versions past retention
pub async fn cleanup(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> ServerResult<Json<CleanupReport>> {
    Ok(Json(state.stack.manager.cleanup(&name).await?))
}

/// Embed items that lack a current vector
///
/// A dry run answers synchronously with the counts. A real run is started in
/// the background and answered with 202; a second request while one is in
/// flight gets 409.
pub async fn backfill(
    State(state): State<Arc<ServerState>>,
    body: Bytes,
) -> ServerResult<Response> {
    let body: BackfillBody = parse_body(&body)?;
    let mut options = state.stack.config.backfill_options();
    options.dry_run = body.dry_run;
    options.force = body.force;
    if let Some(batch_size) = body.batch_size {
        options.batch_size = batch_size;
    }

    if options.dry_run {
        let stats: BackfillStats = state
            .stack
            .backfill
            .run(ADMIN_BACKFILL_JOB, &options, &CancelHandle::new())
            .await?;
        return Ok(Json(stats).into_response());
    }

    if !state.try_start_backfill() {
        return Err(ServerError::Conflict("a backfill run is already in progress".into()));
    }

    let task_state = state.clone();
    tokio::spawn(async move {
        let start = Instant::now();
        let result = task_state
            .stack
            .backfill
            .run(ADMIN_BACKFILL_JOB, &options, &CancelHandle::new())
            .await;
        match result {
            Ok(stats) => tracing::info!(
                event = "backfill.admin",
                processed = stats.processed,
                failed = stats.failed,
                duration_ms = start.elapsed().as_millis() as u64,
                "admin backfill finished"
            ),
            Err(err) => tracing::error!(event = "backfill.admin", error = %err, "admin backfill failed"),
        }
        task_state.finish_backfill();
    });

    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "status": "started", "job": ADMIN_BACKFILL_JOB })),
    )
        .into_response())
}
