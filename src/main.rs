// Main entry point - Dependency injection, background loops and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use std::{net::SocketAddr, sync::Arc, time::Duration};
use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;

use crate::application::monitor_service::MonitorService;
use crate::application::reading_source::ReadingSource;
use crate::infrastructure::checkpoint_file::FileCheckpointStore;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::influx_source::InfluxReadingSource;
use crate::presentation::app_state::AppState;
use crate::presentation::handlers::{get_flags, get_state, health_check, post_reading};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Load configuration
    let app_config = load_app_config()?;
    let analysis_config = app_config
        .analysis
        .to_analysis_config()
        .context("Invalid analysis settings")?;

    // Create adapters (infrastructure layer)
    let source: Option<Arc<dyn ReadingSource>> = app_config
        .influx
        .as_ref()
        .map(|influx| Arc::new(InfluxReadingSource::new(influx)) as Arc<dyn ReadingSource>);
    let store = Arc::new(FileCheckpointStore::new(&app_config.service.checkpoint_path));

    // Create the monitor (application layer), resuming the rolling window if possible
    let monitor = MonitorService::restore_or_new(analysis_config, source, store).await?;
    if monitor.has_source() {
        if let Err(e) = monitor.backfill().await {
            tracing::warn!("History backfill failed, continuing with live readings: {:#}", e);
        }
    } else {
        tracing::info!("No reading source configured, accepting pushed readings only");
    }

    let poller = tokio::spawn(poll_loop(
        monitor.clone(),
        Duration::from_secs(app_config.service.poll_interval_secs),
    ));
    let checkpointer = tokio::spawn(checkpoint_loop(
        monitor.clone(),
        Duration::from_secs(app_config.service.checkpoint_interval_secs),
    ));

    // Create application state
    let state = Arc::new(AppState {
        monitor: monitor.clone(),
    });

    // Build router (presentation layer)
    let router = Router::new()
        .route("/healthz", get(health_check))
        .route("/state", get(get_state))
        .route("/flags", get(get_flags))
        .route("/readings", post(post_reading))
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    // Start server
    let addr: SocketAddr = app_config
        .service
        .listen_addr
        .parse()
        .context("Invalid service.listen_addr")?;
    tracing::info!("Starting ph-monitor service on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    poller.abort();
    checkpointer.abort();
    monitor.checkpoint().await?;
    tracing::info!("Saved final analysis checkpoint");

    Ok(())
}

async fn poll_loop(monitor: MonitorService, period: Duration) {
    if !monitor.has_source() {
        return;
    }

    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    loop {
        ticker.tick().await;
        if let Err(e) = monitor.poll_once().await {
            tracing::warn!("pH poll failed: {:#}", e);
        }
    }
}

async fn checkpoint_loop(monitor: MonitorService, period: Duration) {
    let mut ticker = tokio::time::interval(period);
    // the first tick completes immediately and there is nothing new to save yet
    ticker.tick().await;
    loop {
        ticker.tick().await;
        if let Err(e) = monitor.checkpoint().await {
            tracing::error!("{:#}", e);
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutting down");
}
