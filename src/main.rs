// =============================================================================
// Aurora Pulse — Main Entry Point
// =============================================================================
//
// Real-time market-data aggregation: trade and candle streams from the
// exchange, rolling close series, RSI / MACD per instrument, and a push API
// for the dashboard.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod channel;
mod discovery;
mod error;
mod indicators;
mod market_data;
mod mexc;
mod runtime_config;
mod subscription;
mod types;
mod watch_maintenance;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::channel::WsConnector;
use crate::runtime_config::RuntimeConfig;
use crate::types::KlineInterval;

const CONFIG_PATH: &str = "pulse_config.json";
const DEFAULT_BIND_ADDR: &str = "0.0.0.0:3001";

/// Apply `PULSE_*` environment overrides on top of the file config.
fn apply_env_overrides(config: &mut RuntimeConfig) {
    if let Ok(syms) = std::env::var("PULSE_SYMBOLS") {
        config.symbols = Some(
            syms.split(',')
                .map(|s| s.trim().to_uppercase())
                .filter(|s| !s.is_empty())
                .collect(),
        );
    }
    if let Ok(tag) = std::env::var("PULSE_INTERVAL") {
        match tag.parse::<KlineInterval>() {
            Ok(interval) => config.interval = interval,
            Err(e) => warn!(error = %e, "ignoring PULSE_INTERVAL"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Aurora Pulse starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });
    apply_env_overrides(&mut config);

    info!(
        symbols = ?config.symbols,
        interval = %config.interval,
        rsi = config.indicators.rsi_period,
        macd = ?(config.indicators.macd_fast, config.indicators.macd_slow, config.indicators.macd_signal),
        "configuration ready"
    );

    // ── 2. Shared state + subscription groups ────────────────────────────
    let connector = Arc::new(WsConnector::new(config.ws_url.clone()));
    let state = Arc::new(AppState::new(config, CONFIG_PATH, connector)?);

    // ── 3. Discovery poller ──────────────────────────────────────────────
    let discovery_state = state.clone();
    tokio::spawn(async move {
        discovery::run_discovery_poller(discovery_state).await;
    });

    // ── 4. Pruning / backfill observer ───────────────────────────────────
    let maintenance_state = state.clone();
    let settled = state.subscriptions.watch_settled();
    tokio::spawn(async move {
        watch_maintenance::run_watch_maintenance(maintenance_state, settled).await;
    });

    // ── 5. API server ────────────────────────────────────────────────────
    let bind_addr =
        std::env::var("PULSE_BIND_ADDR").unwrap_or_else(|_| DEFAULT_BIND_ADDR.into());
    if std::env::var(api::auth::ADMIN_TOKEN_ENV).is_err() {
        warn!("PULSE_ADMIN_TOKEN not set: write endpoints and the push feed are disabled");
    }

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");

    let app = api::rest::router(state.clone());
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server failed");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 6. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received, stopping");

    state.subscriptions.dispose().await;

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Aurora Pulse shut down complete.");
    Ok(())
}
