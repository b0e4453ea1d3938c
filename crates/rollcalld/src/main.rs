use std::sync::Arc;

use anyhow::{Context, Result};
use rollcall_core::{CacheManager, FaceEncoder, OnnxFaceEncoder};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

mod config;
mod engine;
mod refresh;
mod routes;
mod source;

use config::Config;
use refresh::RefreshScheduler;
use source::SupabaseSource;

/// Requests allowed to wait for the engine thread before handlers block.
const ENGINE_QUEUE_DEPTH: usize = 16;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!("rollcalld starting");

    let config = Config::from_env().context("invalid configuration")?;

    let encoder = OnnxFaceEncoder::load(&config.model_dir)
        .with_context(|| format!("loading models from {}", config.model_dir.display()))?;
    config.check_encoder_dimension(encoder.dimension())?;
    let engine = engine::spawn_engine(Box::new(encoder), ENGINE_QUEUE_DEPTH)?;

    let cache = Arc::new(CacheManager::default());
    let scheduler = RefreshScheduler::new(
        Arc::new(SupabaseSource::from_config(&config)),
        cache.clone(),
        config.refresh_interval,
        config.fetch_timeout,
        config.embedding_dim,
    );

    // Load enrollments before accepting requests. A failure here still lets
    // the service start with an empty cache.
    if let Err(err) = scheduler.refresh_once().await {
        tracing::warn!(error = %err, "initial enrollment load failed; starting with empty cache");
    }

    let cancel = CancellationToken::new();
    let refresh_task = scheduler.spawn(cancel.clone());

    let state = routes::AppState {
        cache,
        engine,
        tolerance: config.tolerance,
    };
    let app = routes::router(state, config.max_upload_bytes);

    let listener = TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("binding {}", config.bind_addr))?;
    tracing::info!(
        addr = %config.bind_addr,
        tolerance = config.tolerance,
        refresh_secs = config.refresh_interval.as_secs(),
        "rollcalld ready"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("rollcalld shutting down");
    cancel.cancel();
    refresh_task.await?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
}
