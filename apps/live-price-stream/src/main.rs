//! Live Price Stream Binary
//!
//! Follows the configured symbols, one independent session each, and logs
//! every delivered price update.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin live-price-stream
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `LIVE_PRICE_WS_URL`: Base `ws://` or `wss://` URL of the price backend
//! - `LIVE_PRICE_SUBSCRIPTIONS`: Comma-separated `SYMBOL[:MARKET]` list
//!
//! ## Optional
//! - `LIVE_PRICE_STREAM_PATH`: Stream path under the base URL (default: ws/prices)
//! - `LIVE_PRICE_HEALTH_PORT`: Health check HTTP port, 0 disables (default: 8083)
//! - `LIVE_PRICE_HEARTBEAT_INTERVAL_SECS`: Keepalive interval (default: 30)
//! - `LIVE_PRICE_IDLE_TIMEOUT_SECS`: Reconnect after this much silence, 0 disables (default: 0)
//! - `LIVE_PRICE_RECONNECT_DELAY_MS`: First reconnect delay (default: 3000)
//! - `LIVE_PRICE_RECONNECT_DELAY_MAX_MS`: Backoff cap (default: first delay)
//! - `LIVE_PRICE_RECONNECT_MULTIPLIER`: Backoff multiplier (default: 1.0)
//! - `LIVE_PRICE_MAX_RECONNECT_ATTEMPTS`: 0 = unlimited (default: 0)
//! - `LIVE_PRICE_MAX_UPDATE_HZ`: Per-session delivery rate cap (default: 60)
//! - `LIVE_PRICE_TERMINAL_ERROR_CODES`: Codes that halt reconnects (default: NOT_CONFIGURED)
//! - `LIVE_PRICE_CONNECT_TIMEOUT_SECS`: Transport connect timeout (default: 10)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;

use anyhow::Context;
use live_price_stream::infrastructure::health::{HealthServer, HealthServerState};
use live_price_stream::infrastructure::telemetry;
use live_price_stream::{
    PriceEvent, SessionManager, StreamConfig, SubscribeOptions, SubscriptionRegistry,
    WebSocketTransport, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Live Price Stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics();

    let config = StreamConfig::from_env().context("failed to load configuration")?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let transport = Arc::new(
        WebSocketTransport::new(config.ws_url.clone())
            .with_stream_path(config.stream_path.clone())
            .with_connect_timeout(config.connect_timeout),
    );

    // One subscriber per configured symbol
    let managers: Vec<Arc<SessionManager>> = config
        .subscriptions
        .iter()
        .map(|subscription| {
            let manager = Arc::new(SessionManager::new(
                Arc::clone(&registry),
                transport.clone(),
                config.session.clone(),
            ));
            manager.subscribe(
                subscription.symbol.clone(),
                subscription.market.clone(),
                log_price,
                SubscribeOptions::default(),
            );
            manager
        })
        .collect();

    // Spawn health server
    let health_task = if config.health_port == 0 {
        None
    } else {
        let health_state = Arc::new(HealthServerState::new(
            env!("CARGO_PKG_VERSION").to_string(),
            Arc::clone(&registry),
            managers.clone(),
        ));
        let health_server =
            HealthServer::new(config.health_port, health_state, shutdown_token.clone());
        Some(tokio::spawn(async move {
            if let Err(e) = health_server.run().await {
                tracing::error!(error = %e, "Health server error");
            }
        }))
    };

    tracing::info!(sessions = managers.len(), "Live price stream ready");

    await_shutdown(shutdown_token).await;

    if let Some(task) = health_task
        && let Err(e) = task.await
    {
        tracing::warn!(error = %e, "Health server task failed");
    }

    for manager in &managers {
        manager.unsubscribe();
    }
    drop(managers);
    registry.clear_all();

    tracing::info!(
        registry_entries = registry.len(),
        "Live price stream stopped"
    );
    Ok(())
}

fn log_price(event: PriceEvent) {
    tracing::info!(
        symbol = %event.symbol,
        price = %event.price,
        direction = ?event.direction,
        change = ?event.change,
        timestamp = %event.timestamp,
        "Price update"
    );
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_err() {
        load_dotenv_from_ancestors();
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    let subscriptions: Vec<String> = config
        .subscriptions
        .iter()
        .map(ToString::to_string)
        .collect();
    tracing::info!(
        subscriptions = ?subscriptions,
        health_port = config.health_port,
        max_update_hz = config.session.max_update_hz,
        "Configuration loaded"
    );
    tracing::debug!(
        ws_url = %config.ws_url,
        stream_path = %config.stream_path,
        heartbeat_interval_secs = config.session.heartbeat.interval.as_secs(),
        idle_timeout_secs = config.session.heartbeat.idle_timeout.as_secs(),
        terminal_error_codes = ?config.session.terminal_error_codes,
        "Stream settings"
    );
}

/// Load .env file from any ancestor directory.
fn load_dotenv_from_ancestors() {
    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
    tracing::info!("Graceful shutdown started");
}
