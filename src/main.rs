// =============================================================================
// QuantDash — Dashboard Core Entry Point
// =============================================================================
//
// Startup order: config, shared state, initial history for every configured
// key, then the push channel, the refresh scheduler and the HTTP/WS server.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod backtest;
mod gateway;
mod history;
mod market_data;
mod runtime_config;
mod scheduler;
mod types;

use std::sync::Arc;

use anyhow::Context;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::gateway::MessageRouter;
use crate::history::BackendClient;
use crate::runtime_config::RuntimeConfig;
use crate::scheduler::SystemClock;

const CONFIG_PATH: &str = "dashboard_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("QuantDash dashboard core starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "Failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_overrides(|name| std::env::var(name).ok());

    info!(
        symbols = ?config.symbols,
        backend = %config.backend_http_url,
        push_channel = %config.backend_ws_url,
        "Configured series"
    );

    // ── 2. Backend client & shared state ─────────────────────────────────
    let backend = BackendClient::new(&config.backend_http_url, config.request_timeout())?;
    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config, Arc::new(backend)));

    // ── 3. Score streams and initial history ─────────────────────────────
    for key in state.configured_keys() {
        state.score_buffer.track(key);
    }
    history::load_all(&state).await;

    // ── 4. Push channel ──────────────────────────────────────────────────
    let router = Arc::new(MessageRouter::new(state.clone()));
    let gateway_state = state.clone();
    tokio::spawn(async move {
        if let Err(e) = gateway::run_gateway(gateway_state, router).await {
            error!(error = %e, "Push channel stopped; live updates unavailable");
        }
    });

    // ── 5. Periodic refresh ──────────────────────────────────────────────
    let refresh_state = state.clone();
    tokio::spawn(async move {
        scheduler::run_refresh_loop(refresh_state, Arc::new(SystemClock)).await;
    });

    // ── 6. HTTP + WebSocket server ───────────────────────────────────────
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind API server on {bind_addr}"))?;
    info!(addr = %bind_addr, "API server listening");
    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "API server error");
        }
    });

    info!("All subsystems running. Press Ctrl+C to stop.");

    // ── 7. Shutdown ──────────────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("Shutdown signal received — stopping");

    info!(
        state_version = state.current_state_version(),
        uptime_secs = state.start_time.elapsed().as_secs(),
        "QuantDash shut down complete."
    );
    Ok(())
}
