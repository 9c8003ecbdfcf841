//! Search Server - HTTP API for hybrid lexical + semantic search
//!
//! This crate exposes the search stack over HTTP and ships the
//! `search-indexctl` operator CLI. It supports:
//!
//! - **Search**: Hybrid queries with filters and pagination, falling back to
//!   lexical order when embeddings are unavailable
//! - **Items**: Idempotent upsert and delete kept in step across the source of
//!   truth, the lexical index and the vector store
//! - **Administration**: Versioned rebuilds, atomic alias swaps, rollback,
//!   retention cleanup and embedding backfill
//! - **Health & Metrics**: Liveness/readiness probes and Prometheus metrics
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use server::{ServerConfig, ServerState};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = ServerConfig::load()?;
//!     let pipeline = config.pipeline()?;
//!     let state = ServerState::new(config, pipeline, None)?;
//!     server::start_server(state).await?;
//!     Ok(())
//! }
//! ```
//!
//! # API Endpoints
//!
//! - `GET /` - API information
//! - `GET /health` - Liveness probe
//! - `GET /ready` - Readiness probe (503 until the index has an ACTIVE version)
//! - `GET /metrics` - Prometheus metrics
//! - `GET|POST /api/v1/search` - Hybrid search
//! - `PUT|DELETE /api/v1/items/{id}` - Item mutations
//! - `GET /api/v1/admin/indexes[/{name}]` - Lifecycle status
//! - `POST /api/v1/admin/indexes/{name}/{rebuild,swap,rollback,cleanup}`
//! - `GET /api/v1/admin/indexes/{name}/rebuild` - Outcome of the latest API rebuild
//! - `POST /api/v1/admin/backfill` - Embedding backfill

pub mod admin_client;
pub mod config;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod middleware;
pub mod routes;
pub mod server;
pub mod state;

pub use config::ServerConfig;
pub use error::{ServerError, ServerResult};
pub use server::{build_router, start_server};
pub use state::ServerState;
