// =============================================================================
// REST API Endpoints — Axum 0.7
// =============================================================================
//
// All endpoints live under `/api/v1/`. The dashboard runs on a trusted local
// network, so no endpoint requires authentication.
//
// CORS is configured permissively for the browser UI.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{Json, Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::backtest::run_backtest;
use crate::history::load_history;
use crate::market_data::SeriesKey;
use crate::types::{ConnectionState, Timeframe};

// =============================================================================
// Router construction
// =============================================================================

/// Build the full REST API router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/v1/health", get(health))
        .route("/api/v1/state", get(full_state))
        .route("/api/v1/series/:symbol/:timeframe", get(series))
        .route("/api/v1/series/:symbol/:timeframe/reload", post(reload_series))
        .route("/api/v1/scores/:symbol/:timeframe", get(scores))
        .route("/api/v1/active", post(set_active))
        .route("/api/v1/backtest", get(last_backtest).post(backtest))
        // ── WebSocket (handled separately in ws module but mounted here) ─
        .route("/api/v1/ws", get(crate::api::ws::ws_handler))
        .layer(cors)
        .with_state(state)
}

fn error_response(status: StatusCode, message: impl Into<String>) -> Response {
    let body = serde_json::json!({ "error": message.into() });
    (status, Json(body)).into_response()
}

fn parse_key(symbol: &str, timeframe: &str) -> Result<SeriesKey, Response> {
    timeframe
        .parse::<Timeframe>()
        .map(|tf| SeriesKey::new(symbol, tf))
        .map_err(|e| error_response(StatusCode::BAD_REQUEST, e.to_string()))
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connection: ConnectionState,
    state_version: u64,
    server_time: i64,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let connection = state.connection_state();
    let (code, status) = if connection.is_terminal() {
        (StatusCode::SERVICE_UNAVAILABLE, "disconnected")
    } else {
        (StatusCode::OK, "ok")
    };
    let resp = HealthResponse {
        status,
        connection,
        state_version: state.current_state_version(),
        server_time: chrono::Utc::now().timestamp_millis(),
    };
    (code, Json(resp))
}

// =============================================================================
// State snapshot
// =============================================================================

async fn full_state(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(state.build_snapshot())
}

// =============================================================================
// Series and scores
// =============================================================================

async fn series(
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Response {
    let key = match parse_key(&symbol, &timeframe) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.candle_buffer.current(&key) {
        Some(candles) => Json(serde_json::json!({
            "key": key,
            "count": candles.len(),
            "candles": candles,
        }))
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("series {key} not loaded")),
    }
}

async fn reload_series(
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Response {
    let key = match parse_key(&symbol, &timeframe) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    info!(key = %key, "reload requested via API");
    match load_history(&state, &key).await {
        Ok(loaded) => Json(serde_json::json!({ "key": key, "loaded": loaded })).into_response(),
        Err(e) => error_response(StatusCode::BAD_GATEWAY, e.to_string()),
    }
}

async fn scores(
    State(state): State<Arc<AppState>>,
    Path((symbol, timeframe)): Path<(String, String)>,
) -> Response {
    let key = match parse_key(&symbol, &timeframe) {
        Ok(k) => k,
        Err(resp) => return resp,
    };
    match state.score_buffer.current(&key) {
        Some(points) => Json(serde_json::json!({
            "key": key,
            "latest": points.last().map(|p| p.value),
            "points": points,
        }))
        .into_response(),
        None => error_response(StatusCode::NOT_FOUND, format!("score stream {key} not tracked")),
    }
}

// =============================================================================
// Active view
// =============================================================================

#[derive(Debug, Deserialize)]
struct ActiveRequest {
    #[serde(default)]
    symbol: Option<String>,
    timeframe: Timeframe,
}

async fn set_active(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ActiveRequest>,
) -> impl IntoResponse {
    let changed = state.set_active_view(req.symbol.as_deref(), req.timeframe);
    let view = state.active_view();
    let key = view.key();

    ensure_loaded(&state, key);

    Json(serde_json::json!({ "active": view, "changed": changed }))
}

/// Kick off a historical load for `key` if nothing is buffered for it yet.
pub(crate) fn ensure_loaded(state: &Arc<AppState>, key: SeriesKey) {
    if state.candle_buffer.contains(&key) {
        return;
    }
    state.score_buffer.track(key.clone());
    let state = state.clone();
    tokio::spawn(async move {
        let _ = load_history(&state, &key).await;
    });
}

// =============================================================================
// Backtest
// =============================================================================

#[derive(Debug, Deserialize)]
struct BacktestRequest {
    #[serde(default)]
    symbol: Option<String>,
    #[serde(default)]
    timeframe: Option<Timeframe>,
    #[serde(default)]
    z_threshold: Option<f64>,
}

async fn backtest(
    State(state): State<Arc<AppState>>,
    Json(req): Json<BacktestRequest>,
) -> Response {
    let view = state.active_view();
    let key = SeriesKey::new(
        req.symbol.as_deref().unwrap_or(&view.symbol),
        req.timeframe.unwrap_or(view.timeframe),
    );
    let z_threshold = state.runtime_config.read().z_threshold(req.z_threshold);

    let signals = match state
        .backend
        .fetch_signals(&key.symbol, key.timeframe, z_threshold)
        .await
    {
        Ok(s) => s,
        Err(e) => {
            warn!(key = %key, error = %e, "backtest signal fetch failed");
            state.push_error_with_code(
                format!("Backtest failed for {key}: {e}"),
                Some("backtest".to_string()),
            );
            return error_response(StatusCode::BAD_GATEWAY, e.to_string());
        }
    };

    let report = run_backtest(&key, z_threshold, &signals);
    *state.last_backtest.write() = Some(report.clone());
    state.increment_version();

    Json(report).into_response()
}

async fn last_backtest(State(state): State<Arc<AppState>>) -> Response {
    match state.last_backtest.read().clone() {
        Some(report) => Json(report).into_response(),
        None => error_response(StatusCode::NOT_FOUND, "no backtest has been run"),
    }
}
