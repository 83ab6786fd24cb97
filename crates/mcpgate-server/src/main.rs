//! The `mcpgate` binary.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use mcpgate_core::MemoryStore;
use mcpgate_filter::{FilterChain, FilterFactory, FilterSpec};
use mcpgate_server::{GatewayConfig, GatewayState, app};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = GatewayConfig::parse();

    let store = match &config.fixture {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading fixture {path}"))?;
            let store = MemoryStore::from_fixture_json(&text)
                .map_err(|e| anyhow::anyhow!("loading fixture: {e}"))?;
            tracing::info!(%path, "loaded fixture into in-memory store");
            store
        }
        None => {
            tracing::warn!("no fixture configured; starting with an empty store");
            MemoryStore::new()
        }
    };

    let filters = match &config.filters {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("reading filter config {path}"))?;
            let specs: Vec<FilterSpec> =
                serde_json::from_str(&text).context("parsing filter config")?;
            FilterFactory::build_chain(specs)
                .map_err(|e| anyhow::anyhow!("building filter chain: {e}"))?
        }
        None => FilterChain::empty(),
    };

    let state = GatewayState::build(config.clone(), Arc::new(store), None, filters);
    if let Some(handle) = state.pool.spawn_reaper() {
        tracing::debug!("session idle reaper running");
        drop(handle);
    }

    let listener = tokio::net::TcpListener::bind(&config.bind)
        .await
        .with_context(|| format!("binding {}", config.bind))?;
    tracing::info!(bind = %config.bind, base_url = %config.base_url, "mcpgate listening");

    let router = app(Arc::clone(&state))
        .into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    tracing::info!("shutting down, closing upstream sessions");
    state.pool.clear_all().await;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "failed to install ctrl-c handler");
    }
    tracing::info!("shutdown signal received");
}
