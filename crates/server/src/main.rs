//! Search Server - HTTP API for hybrid lexical + semantic search
//!
//! Loads `.env`, the server configuration and the pipeline YAML, then serves
//! queries, item mutations and index administration until shut down.

use server::{ServerConfig, ServerState};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(err) = dotenvy::dotenv() {
        if !err.not_found() {
            return Err(err.into());
        }
    }

    let config = ServerConfig::load()?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_thread_names(true)
        .json()
        .init();

    let pipeline = config.pipeline()?;
    let prometheus = if config.metrics_enabled {
        Some(server::metrics::install_recorder()?)
    } else {
        None
    };
    let state = ServerState::new(config, pipeline, prometheus)?;

    server::start_server(state).await?;

    Ok(())
}
