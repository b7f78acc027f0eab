// =============================================================================
// History loader — fetch a snapshot and replace the buffer wholesale
// =============================================================================

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::app_state::AppState;
use crate::market_data::SeriesKey;

/// Fetch the most recent `capacity` candles for `key` and load them.
///
/// On failure the existing buffer is left exactly as it was and the error is
/// recorded in the dashboard error log before being returned.
pub async fn load_history(state: &Arc<AppState>, key: &SeriesKey) -> Result<usize> {
    let capacity = state.capacity_for(key.timeframe);

    match state
        .backend
        .fetch_candles(&key.symbol, key.timeframe, capacity)
        .await
    {
        Ok(candles) => {
            let fetched = candles.len();
            let loaded = state.candle_buffer.load(key.clone(), candles, capacity);
            state.increment_version();
            info!(key = %key, fetched, loaded, "history loaded");
            Ok(loaded)
        }
        Err(e) => {
            warn!(key = %key, error = %e, "history fetch failed, buffer unchanged");
            state.push_error_with_code(
                format!("History fetch failed for {key}: {e}"),
                Some("history".to_string()),
            );
            Err(e)
        }
    }
}

/// Load every configured key, logging but not propagating individual failures.
/// Returns the number of keys that loaded successfully.
pub async fn load_all(state: &Arc<AppState>) -> usize {
    let keys = state.configured_keys();
    let mut ok = 0;
    for key in &keys {
        if load_history(state, key).await.is_ok() {
            ok += 1;
        }
    }
    info!(loaded = ok, total = keys.len(), "initial history load finished");
    ok
}
