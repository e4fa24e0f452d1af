//! HTTP server for the emissions query gateway.

use anyhow::{Context, Result};
use clap::Parser;
use emissions_query::config::{AppConfig, Args};
use emissions_query::execution::duckdb_engine::warm_pools;
use emissions_query::execution::{ColumnarEngine, DuckDbEngine};
use emissions_query::llm::ChatGateway;
use emissions_query::metadata::Catalog;
use emissions_query::telemetry::init_tracing;
use emissions_query::{api, QueryService};
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = AppConfig::from(Args::parse());
    init_tracing(config.log_json);

    info!("Starting emissions query server v{}", env!("CARGO_PKG_VERSION"));

    let catalog = Catalog::load(&config.manifest)
        .with_context(|| format!("Failed to load manifest {}", config.manifest.display()))?;
    info!(datasets = catalog.len(), "Manifest loaded");

    let engine = Arc::new(DuckDbEngine::new(config.pool));
    warm_pools(&engine, catalog.iter().map(|d| &d.storage)).await;
    let engine: Arc<dyn ColumnarEngine> = engine;

    let mut service = QueryService::new(&config, catalog, engine);
    if config.chat.api_key.is_some() {
        service = service.with_chat(ChatGateway::new(config.chat.clone())?);
        info!(model = %config.chat.model, "Chat gateway enabled");
    } else {
        warn!("OPENAI_API_KEY not set; chat gateway disabled");
    }

    let app = api::router(Arc::new(service));
    let listener = TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind {}", config.bind_addr))?;
    info!("Listening on http://{}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
