use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::watch;
use tracing::{info, warn};

use loomgraph_core::config::LoomgraphConfig;
use loomgraph_processor::ProcessorEngine;
use loomgraph_store::GraphStore;
use loomgraph_vector::VectorAdapter;

mod app;
mod auth;
mod error;
mod http;

#[derive(Parser)]
#[command(name = "loomgraph-gateway", about = "Conversational knowledge-graph server")]
struct Cli {
    /// Path to loomgraph.toml. Defaults to ~/.loomgraph/loomgraph.toml.
    #[arg(long)]
    config: Option<String>,
    /// Override the configured gateway port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "loomgraph_gateway=info,tower_http=info".into()),
        )
        .init();

    let cli = Cli::parse();

    let mut config = LoomgraphConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("config load failed ({e}), using defaults");
        LoomgraphConfig::default()
    });
    if let Some(port) = cli.port {
        config.gateway.port = port;
    }

    let store = Arc::new(GraphStore::open(&config.database.path)?);
    let vector = config
        .embedding
        .clone()
        .map(|cfg| Arc::new(VectorAdapter::new(cfg)));

    let (provider, model) = loomgraph_llm::build_provider(&config.llm);
    let provider: Arc<dyn loomgraph_llm::provider::LlmProvider> = Arc::from(provider);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let processor = Arc::new(ProcessorEngine::new(
        Arc::clone(&store),
        vector.clone(),
        Arc::clone(&provider),
        model.clone(),
        config.processor.clone(),
    ));
    let processor_handle = tokio::spawn(Arc::clone(&processor).run(shutdown_rx));

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState::new(config, store, vector, provider, model, processor));
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("loomgraph gateway listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    let _ = shutdown_tx.send(true);
    let _ = processor_handle.await;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received");
}
