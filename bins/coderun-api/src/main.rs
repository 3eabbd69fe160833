mod bridge;
mod engine;
mod error;
mod handlers;
mod metrics;
mod routes;

use anyhow::Context;
use axum::Router;
use coderun_common::config::{Config, LogFormat};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::info;

use crate::engine::{JobEngine, RedisEngine};

pub struct AppState {
    pub engine: Arc<dyn JobEngine>,
    /// Outer limit on waiting for a job outcome
    pub request_timeout: Duration,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let config = Config::from_env();
    init_tracing(config.log_format);
    config.validate()?;

    info!("coderun API booting...");

    metrics::init_metrics().context("failed to register metrics")?;
    info!("Metrics registry initialized");

    let engine = RedisEngine::connect(&config.redis_url, config.listener_ttl())
        .await
        .with_context(|| format!("failed to connect to job broker at {}", config.redis_url))?;
    info!("Connected to job broker: {}", config.redis_url);

    let state = Arc::new(AppState {
        engine: Arc::new(engine),
        request_timeout: config.request_timeout(),
    });

    // Build router
    let app = Router::new().merge(routes::routes()).with_state(state);

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind to {}", addr))?;

    info!(
        request_timeout_ms = config.request_timeout_ms,
        "HTTP server listening on {}", addr
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("coderun API shutdown complete");
    Ok(())
}

fn init_tracing(format: LogFormat) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    match format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to install CTRL+C signal handler: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal");
}
