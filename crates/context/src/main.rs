//! Redchamber Answer Service
//!
//! Loads the corpus, builds the sparse and dense indexes, and serves
//! grounded answers over HTTP.

use anyhow::Context;
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use redchamber_common::{
    config::{AppConfig, ObservabilityConfig},
    embeddings::create_embedder,
    generation::create_generator,
    metrics::{self, ANSWER_LATENCY_BUCKETS, METRICS_PREFIX},
    PassageStore, VERSION,
};
use redchamber_context::{create_router, AppState, Orchestrator};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Load configuration
    let config = AppConfig::load().context("failed to load configuration")?;

    init_tracing(&config.observability);
    info!("Starting Redchamber Answer Service v{}", VERSION);

    config.validate()?;
    let config = Arc::new(config);

    // Initialize metrics
    if config.observability.metrics_port != 0 {
        let addr = SocketAddr::from(([0, 0, 0, 0], config.observability.metrics_port));
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .set_buckets_for_metric(
                Matcher::Full(format!("{}_answer_duration_seconds", METRICS_PREFIX)),
                ANSWER_LATENCY_BUCKETS,
            )?
            .install()
            .context("failed to install Prometheus exporter")?;
        metrics::register_metrics();
        info!("Metrics exporter listening on {}", addr);
    }

    // Load the corpus once for the process lifetime
    info!(path = %config.corpus.passages_path, "Loading corpus...");
    let store = PassageStore::load(&config.corpus.passages_path)
        .await?
        .install()?;

    // Capability providers
    let embedder = create_embedder(&config.embedding)?;
    let generator = create_generator(&config.generation)?;

    // Build indexes; an embedding space mismatch stops startup here
    let orchestrator = Orchestrator::from_config(&config, store.clone(), embedder, generator)
        .await
        .context("failed to build retrieval indexes")?;

    let state = AppState {
        config: config.clone(),
        store,
        orchestrator: Arc::new(orchestrator),
    };

    // Build the router
    let app = create_router(state);

    // Start the server
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .context("invalid server address")?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.json_logging {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .init();
    }
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
