// =============================================================================
// Central Application State — dashboard core
// =============================================================================
//
// Ties together the buffers, the backend client, the connection state and the
// last backtest, and builds the serialisable snapshot handed to the UI.
//
// Thread safety:
//   - Atomic counters for lock-free version tracking and gateway statistics.
//   - parking_lot::RwLock for small mutable fields.
//   - Buffers manage their own interior mutability; each operation completes
//     under a single write lock, so readers never see a half-applied update.
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::Utc;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::backtest::BacktestReport;
use crate::history::BackendClient;
use crate::market_data::{Candle, CandleBuffer, ScoreBuffer, ScorePoint, SeriesKey, SeriesSummary};
use crate::runtime_config::RuntimeConfig;
use crate::types::{ConnectionState, Timeframe};

/// Maximum number of recent errors to retain.
const MAX_RECENT_ERRORS: usize = 50;

/// A recorded error event for the dashboard error log.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    /// Optional machine-readable origin (e.g. `history`, `gateway`).
    pub code: Option<String>,
    /// ISO 8601 timestamp.
    pub at: String,
}

/// The (symbol, timeframe) currently shown by the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveView {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl ActiveView {
    pub fn key(&self) -> SeriesKey {
        SeriesKey::new(&self.symbol, self.timeframe)
    }
}

/// Counters for inbound push-channel traffic.
#[derive(Debug, Default)]
pub struct GatewayCounters {
    pub applied: AtomicU64,
    pub rejected: AtomicU64,
    pub ignored: AtomicU64,
    pub dropped: AtomicU64,
}

impl GatewayCounters {
    pub fn snapshot(&self) -> GatewayStats {
        GatewayStats {
            applied: self.applied.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            ignored: self.ignored.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Central application state shared across all async tasks via `Arc<AppState>`.
pub struct AppState {
    /// Incremented on every meaningful mutation; the WebSocket feed pushes
    /// a fresh snapshot whenever it moves.
    pub state_version: AtomicU64,

    pub runtime_config: Arc<RwLock<RuntimeConfig>>,

    // ── Market Data ─────────────────────────────────────────────────────
    pub candle_buffer: Arc<CandleBuffer>,
    pub score_buffer: Arc<ScoreBuffer>,

    // ── Backend ─────────────────────────────────────────────────────────
    pub backend: Arc<BackendClient>,
    pub connection: RwLock<ConnectionState>,
    pub gateway_counters: GatewayCounters,

    // ── UI state ────────────────────────────────────────────────────────
    pub active_view: RwLock<ActiveView>,
    pub last_backtest: RwLock<Option<BacktestReport>>,
    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig, backend: Arc<BackendClient>) -> Self {
        let active_view = ActiveView {
            symbol: config
                .symbols
                .first()
                .cloned()
                .unwrap_or_else(|| "btcusdt".to_string()),
            timeframe: config.default_timeframe,
        };
        let score_buffer = ScoreBuffer::new(config.score_capacity);

        Self {
            state_version: AtomicU64::new(1),
            runtime_config: Arc::new(RwLock::new(config)),
            candle_buffer: Arc::new(CandleBuffer::new()),
            score_buffer: Arc::new(score_buffer),
            backend,
            connection: RwLock::new(ConnectionState::default()),
            gateway_counters: GatewayCounters::default(),
            active_view: RwLock::new(active_view),
            last_backtest: RwLock::new(None),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version Management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Error Logging ───────────────────────────────────────────────────

    pub fn push_error(&self, msg: String) {
        self.push_error_with_code(msg, None);
    }

    /// Record an error with an optional origin code. The log is capped at
    /// [`MAX_RECENT_ERRORS`]; oldest entries are evicted first.
    pub fn push_error_with_code(&self, msg: String, code: Option<String>) {
        let record = ErrorRecord {
            message: msg,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }

    // ── Connection ──────────────────────────────────────────────────────

    pub fn connection_state(&self) -> ConnectionState {
        *self.connection.read()
    }

    pub fn set_connection_state(&self, next: ConnectionState) {
        let prev = std::mem::replace(&mut *self.connection.write(), next);
        if prev == next {
            return;
        }
        if next.is_terminal() {
            error!(state = %next, "push channel gave up reconnecting");
            self.push_error_with_code(
                format!("Live connection lost: {next}"),
                Some("gateway".to_string()),
            );
        } else {
            info!(from = %prev, to = %next, "connection state changed");
            self.increment_version();
        }
    }

    // ── Series keys ─────────────────────────────────────────────────────

    /// Every configured (symbol, timeframe) pair.
    pub fn configured_keys(&self) -> Vec<SeriesKey> {
        let config = self.runtime_config.read();
        config
            .symbols
            .iter()
            .flat_map(|sym| Timeframe::ALL.iter().map(move |tf| SeriesKey::new(sym, *tf)))
            .collect()
    }

    pub fn capacity_for(&self, timeframe: Timeframe) -> usize {
        self.runtime_config.read().capacity_for(timeframe)
    }

    // ── Active view ─────────────────────────────────────────────────────

    pub fn active_view(&self) -> ActiveView {
        self.active_view.read().clone()
    }

    /// Select another key for display. Other keys' buffers are untouched.
    /// Returns `true` when the selection changed.
    pub fn set_active_view(&self, symbol: Option<&str>, timeframe: Timeframe) -> bool {
        let mut view = self.active_view.write();
        let next = ActiveView {
            symbol: symbol
                .map(|s| s.trim().to_lowercase())
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| view.symbol.clone()),
            timeframe,
        };
        if *view == next {
            return false;
        }
        info!(symbol = %next.symbol, timeframe = %next.timeframe, "active view switched");
        *view = next;
        drop(view);
        self.increment_version();
        true
    }

    // ── Snapshot Builder ────────────────────────────────────────────────

    /// Build the payload served by `GET /api/v1/state` and the WebSocket feed.
    pub fn build_snapshot(&self) -> DashboardSnapshot {
        let active = self.active_view();
        let key = active.key();

        DashboardSnapshot {
            state_version: self.current_state_version(),
            server_time: Utc::now().timestamp_millis(),
            uptime_secs: self.start_time.elapsed().as_secs(),
            connection: self.connection_state(),
            candles: self.candle_buffer.current(&key).unwrap_or_default(),
            scores: self.score_buffer.current(&key).unwrap_or_default(),
            last_close: self.candle_buffer.last_close(&key),
            latest_z_score: self.score_buffer.latest(&key),
            active,
            series: self.candle_buffer.summaries(),
            gateway: self.gateway_counters.snapshot(),
            last_backtest: self.last_backtest.read().clone(),
            recent_errors: self.recent_errors.read().clone(),
        }
    }
}

// =============================================================================
// Serialisable snapshot types
// =============================================================================

#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    pub state_version: u64,
    pub server_time: i64,
    pub uptime_secs: u64,
    pub connection: ConnectionState,
    pub active: ActiveView,
    pub candles: Vec<Candle>,
    pub scores: Vec<ScorePoint>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_close: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latest_z_score: Option<f64>,
    pub series: Vec<SeriesSummary>,
    pub gateway: GatewayStats,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_backtest: Option<BacktestReport>,
    pub recent_errors: Vec<ErrorRecord>,
}

#[derive(Debug, Clone, Serialize)]
pub struct GatewayStats {
    pub applied: u64,
    pub rejected: u64,
    pub ignored: u64,
    pub dropped: u64,
}

#[cfg(test)]
pub(crate) fn test_state(config: RuntimeConfig) -> Arc<AppState> {
    let backend = BackendClient::new(&config.backend_http_url, config.request_timeout())
        .expect("client builds");
    Arc::new(AppState::new(config, Arc::new(backend)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn active_view_defaults_to_first_symbol() {
        let state = test_state(RuntimeConfig::default());
        let view = state.active_view();
        assert_eq!(view.symbol, "btcusdt");
        assert_eq!(view.timeframe, Timeframe::OneMinute);
    }

    #[test]
    fn switching_timeframe_keeps_other_buffers() {
        let state = test_state(RuntimeConfig::default());
        let one_m = SeriesKey::new("btcusdt", Timeframe::OneMinute);
        state.candle_buffer.load(
            one_m.clone(),
            vec![Candle { timestamp: 60, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 }],
            60,
        );

        assert!(state.set_active_view(None, Timeframe::FiveMinutes));
        assert!(!state.set_active_view(Some("BTCUSDT"), Timeframe::FiveMinutes));
        assert_eq!(state.candle_buffer.count(&one_m), 1);

        let snap = state.build_snapshot();
        assert_eq!(snap.active.timeframe, Timeframe::FiveMinutes);
        assert!(snap.candles.is_empty());
        assert_eq!(snap.series.len(), 1);
    }

    #[test]
    fn configured_keys_cover_every_timeframe() {
        let state = test_state(RuntimeConfig::default());
        let keys = state.configured_keys();
        assert_eq!(keys.len(), 9);
        assert!(keys.contains(&SeriesKey::new("bnbusdt", Timeframe::OneSecond)));
    }

    #[test]
    fn exhausted_connection_is_surfaced_as_error() {
        let state = test_state(RuntimeConfig::default());
        state.set_connection_state(ConnectionState::Connected);
        state.set_connection_state(ConnectionState::Exhausted { attempts: 10 });

        assert!(state.connection_state().is_terminal());
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].code.as_deref(), Some("gateway"));
    }

    #[test]
    fn error_log_is_capped() {
        let state = test_state(RuntimeConfig::default());
        for i in 0..(MAX_RECENT_ERRORS + 5) {
            state.push_error(format!("error {i}"));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), MAX_RECENT_ERRORS);
        assert_eq!(errors[0].message, "error 5");
    }
}
