use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use arbor_core::config::ArborConfig;
use arbor_graph::GraphStore;

mod app;
mod error;
mod http;
mod ws;

#[derive(Parser)]
#[command(name = "arbor-gateway", about = "Branching conversational AI server")]
struct Args {
    /// Path to arbor.toml (defaults to ARBOR_CONFIG or ./arbor.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = ArborConfig::load(args.config.as_deref()).unwrap_or_else(|e| {
        eprintln!("Config load failed ({e}), using defaults");
        ArborConfig::default()
    });

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("arbor={0},arbor_gateway={0},tower_http=debug", config.log_level).into()
            }),
        )
        .init();

    // An unreachable graph store at boot is fatal; at runtime it is a 503.
    let db_path = config.database_path();
    let store = Arc::new(
        GraphStore::open(&db_path)
            .map_err(|e| anyhow::anyhow!("graph store unavailable at {db_path}: {e}"))?,
    );
    let llm = arbor_agent::adapter_from_config(&config);

    let addr: SocketAddr = format!("{}:{}", config.api_host, config.api_port).parse()?;
    let state = Arc::new(app::AppState::new(config, store, llm));
    let router = app::build_router(state);

    info!(%addr, "arbor gateway listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown signal received, draining connections");
}
