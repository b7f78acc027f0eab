// =============================================================================
// Runtime Configuration — dashboard core settings
// =============================================================================
//
// Every tunable lives here: backend endpoints, tracked symbols, per-timeframe
// buffer capacities, reconnect policy and refresh periods.  All fields carry
// `#[serde(default)]` so that adding new fields never breaks loading an older
// config file.
//
// =============================================================================

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Timeframe;

/// Accepted z-score threshold range for backtest signal generation.
pub const Z_THRESHOLD_MIN: f64 = 0.5;
pub const Z_THRESHOLD_MAX: f64 = 5.0;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_backend_http_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_backend_ws_url() -> String {
    "ws://localhost:8000/ws/data".to_string()
}

fn default_symbols() -> Vec<String> {
    vec![
        "btcusdt".to_string(),
        "ethusdt".to_string(),
        "bnbusdt".to_string(),
    ]
}

fn default_score_capacity() -> usize {
    200
}

fn default_reconnect_max_attempts() -> u32 {
    10
}

fn default_reconnect_delay_ms() -> u64 {
    3000
}

fn default_request_timeout_secs() -> u64 {
    10
}

fn default_z_threshold() -> f64 {
    2.0
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

fn default_one_second_capacity() -> usize {
    120
}

fn default_one_minute_capacity() -> usize {
    60
}

fn default_five_minutes_capacity() -> usize {
    72
}

fn default_one_second_refresh() -> u64 {
    1
}

fn default_one_minute_refresh() -> u64 {
    60
}

fn default_five_minutes_refresh() -> u64 {
    300
}

// =============================================================================
// Per-timeframe settings
// =============================================================================

/// Maximum number of candles retained per series, by timeframe.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeriesCapacities {
    #[serde(rename = "1s", default = "default_one_second_capacity")]
    pub one_second: usize,
    #[serde(rename = "1m", default = "default_one_minute_capacity")]
    pub one_minute: usize,
    #[serde(rename = "5m", default = "default_five_minutes_capacity")]
    pub five_minutes: usize,
}

impl SeriesCapacities {
    /// Capacity for `timeframe`, never less than one.
    pub fn for_timeframe(&self, timeframe: Timeframe) -> usize {
        let cap = match timeframe {
            Timeframe::OneSecond => self.one_second,
            Timeframe::OneMinute => self.one_minute,
            Timeframe::FiveMinutes => self.five_minutes,
        };
        cap.max(1)
    }
}

impl Default for SeriesCapacities {
    fn default() -> Self {
        Self {
            one_second: default_one_second_capacity(),
            one_minute: default_one_minute_capacity(),
            five_minutes: default_five_minutes_capacity(),
        }
    }
}

/// Historical refresh period per timeframe family, in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshPeriods {
    #[serde(rename = "1s", default = "default_one_second_refresh")]
    pub one_second: u64,
    #[serde(rename = "1m", default = "default_one_minute_refresh")]
    pub one_minute: u64,
    #[serde(rename = "5m", default = "default_five_minutes_refresh")]
    pub five_minutes: u64,
}

impl RefreshPeriods {
    pub fn for_timeframe(&self, timeframe: Timeframe) -> Duration {
        let secs = match timeframe {
            Timeframe::OneSecond => self.one_second,
            Timeframe::OneMinute => self.one_minute,
            Timeframe::FiveMinutes => self.five_minutes,
        };
        Duration::from_secs(secs.max(1))
    }
}

impl Default for RefreshPeriods {
    fn default() -> Self {
        Self {
            one_second: default_one_second_refresh(),
            one_minute: default_one_minute_refresh(),
            five_minutes: default_five_minutes_refresh(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level configuration for the dashboard core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    // --- Backend endpoints ---------------------------------------------------

    /// Base URL of the analytics backend REST API.
    #[serde(default = "default_backend_http_url")]
    pub backend_http_url: String,

    /// Push channel URL.
    #[serde(default = "default_backend_ws_url")]
    pub backend_ws_url: String,

    // --- Series ---------------------------------------------------------------

    /// Symbols tracked on every timeframe. Lowercase, as the backend emits them.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<String>,

    /// Timeframe shown when the dashboard starts.
    #[serde(default)]
    pub default_timeframe: Timeframe,

    #[serde(default)]
    pub capacities: SeriesCapacities,

    /// Maximum number of live z-score points kept per key.
    #[serde(default = "default_score_capacity")]
    pub score_capacity: usize,

    #[serde(default)]
    pub refresh_periods_secs: RefreshPeriods,

    // --- Transport -------------------------------------------------------------

    /// Reconnect attempts before the gateway gives up for good.
    #[serde(default = "default_reconnect_max_attempts")]
    pub reconnect_max_attempts: u32,

    /// Fixed spacing between reconnect attempts.
    #[serde(default = "default_reconnect_delay_ms")]
    pub reconnect_delay_ms: u64,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    // --- Backtest ---------------------------------------------------------------

    /// Z-score threshold used when the UI does not supply one.
    #[serde(default = "default_z_threshold")]
    pub default_z_threshold: f64,

    // --- API --------------------------------------------------------------------

    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend_http_url: default_backend_http_url(),
            backend_ws_url: default_backend_ws_url(),
            symbols: default_symbols(),
            default_timeframe: Timeframe::default(),
            capacities: SeriesCapacities::default(),
            score_capacity: default_score_capacity(),
            refresh_periods_secs: RefreshPeriods::default(),
            reconnect_max_attempts: default_reconnect_max_attempts(),
            reconnect_delay_ms: default_reconnect_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            default_z_threshold: default_z_threshold(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    ///
    /// If the file does not exist, returns an error so the caller can fall
    /// back to defaults with a warning.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let mut config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;
        config.normalize();

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            backend = %config.backend_http_url,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Lowercase and de-duplicate symbols, dropping blanks.
    pub fn normalize(&mut self) {
        let mut seen = Vec::with_capacity(self.symbols.len());
        for sym in self.symbols.drain(..) {
            let sym = sym.trim().to_lowercase();
            if !sym.is_empty() && !seen.contains(&sym) {
                seen.push(sym);
            }
        }
        self.symbols = seen;
    }

    pub fn capacity_for(&self, timeframe: Timeframe) -> usize {
        self.capacities.for_timeframe(timeframe)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    /// Apply `QUANTDASH_*` overrides. `lookup` is `std::env::var` in
    /// production; tests pass a map.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(syms) = lookup("QUANTDASH_SYMBOLS") {
            self.symbols = syms.split(',').map(str::to_string).collect();
        }
        if let Some(url) = lookup("QUANTDASH_BACKEND_URL") {
            self.backend_http_url = url;
        }
        if let Some(url) = lookup("QUANTDASH_WS_URL") {
            self.backend_ws_url = url;
        }
        if let Some(addr) = lookup("QUANTDASH_BIND_ADDR") {
            self.bind_addr = addr;
        }
        self.normalize();
        if self.symbols.is_empty() {
            self.symbols = default_symbols();
        }
    }

    /// Resolve the z-score threshold for a backtest run, clamped to the range
    /// the backend accepts.
    pub fn z_threshold(&self, requested: Option<f64>) -> f64 {
        let z = requested
            .filter(|z| z.is_finite())
            .unwrap_or(self.default_z_threshold);
        z.clamp(Z_THRESHOLD_MIN, Z_THRESHOLD_MAX)
    }
}
