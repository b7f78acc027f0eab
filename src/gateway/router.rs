// =============================================================================
// Message router — dispatch push-channel payloads to the owning buffer
// =============================================================================

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::market_data::{CandleUpdate, ScoreUpdate, SeriesKey};

use super::message::{parse_message, GatewayMessage};

/// What the router did with one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Routed {
    Candle { key: SeriesKey, outcome: CandleUpdate },
    Score { key: SeriesKey, outcome: ScoreUpdate },
    Welcome,
    Ignored,
    Dropped,
}

pub struct MessageRouter {
    state: Arc<AppState>,
}

impl MessageRouter {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Parse and route one text frame. Malformed payloads are logged and
    /// dropped; they never reach a buffer.
    pub fn route_text(&self, text: &str) -> Routed {
        match parse_message(text) {
            Ok(msg) => self.route(msg),
            Err(e) => {
                warn!(error = %e, payload = %truncate(text, 200), "dropping malformed gateway message");
                self.state.gateway_counters.dropped.fetch_add(1, Ordering::Relaxed);
                Routed::Dropped
            }
        }
    }

    pub fn route(&self, msg: GatewayMessage) -> Routed {
        let counters = &self.state.gateway_counters;

        match msg {
            GatewayMessage::CandleUpdate {
                symbol,
                timeframe,
                candle,
            } => {
                let key = SeriesKey::new(&symbol, timeframe);
                let outcome = self.state.candle_buffer.apply_update(&key, candle);
                match outcome {
                    o if o.changed() => {
                        counters.applied.fetch_add(1, Ordering::Relaxed);
                        self.state.increment_version();
                    }
                    CandleUpdate::Rejected { .. } => {
                        counters.rejected.fetch_add(1, Ordering::Relaxed);
                    }
                    _ => {
                        counters.ignored.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Routed::Candle { key, outcome }
            }
            msg @ GatewayMessage::LiveZscore { .. } => {
                let (Some(key), Some(point)) = (msg.key(), msg.score_point()) else {
                    return Routed::Ignored;
                };
                let outcome = self.state.score_buffer.apply_update(&key, point);
                match outcome {
                    ScoreUpdate::Appended { .. } => {
                        counters.applied.fetch_add(1, Ordering::Relaxed);
                        self.state.increment_version();
                    }
                    ScoreUpdate::UnknownKey => {
                        counters.ignored.fetch_add(1, Ordering::Relaxed);
                    }
                }
                Routed::Score { key, outcome }
            }
            GatewayMessage::Connection { status } => {
                info!(status = status.as_deref().unwrap_or("unknown"), "gateway welcome received");
                Routed::Welcome
            }
            GatewayMessage::Other => {
                debug!("unhandled gateway message type ignored");
                counters.ignored.fetch_add(1, Ordering::Relaxed);
                Routed::Ignored
            }
        }
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app_state::test_state;
    use crate::market_data::Candle;
    use crate::runtime_config::RuntimeConfig;
    use crate::types::Timeframe;

    fn candle_json(symbol: &str, tf: &str, t: i64, close: f64) -> String {
        serde_json::json!({
            "type": "candle_update",
            "symbol": symbol,
            "timeframe": tf,
            "candle": {"timestamp": t, "open": close, "high": close, "low": close, "close": close, "volume": 1.0}
        })
        .to_string()
    }

    fn setup() -> (Arc<AppState>, MessageRouter, SeriesKey) {
        let state = test_state(RuntimeConfig::default());
        let key = SeriesKey::new("btcusdt", Timeframe::OneMinute);
        state.candle_buffer.load(
            key.clone(),
            vec![Candle { timestamp: 60, open: 1.0, high: 1.0, low: 1.0, close: 1.0, volume: 0.0 }],
            60,
        );
        state.score_buffer.track(key.clone());
        let router = MessageRouter::new(state.clone());
        (state, router, key)
    }

    #[test]
    fn candle_updates_reach_the_buffer() {
        let (state, router, key) = setup();
        let before = state.current_state_version();

        let routed = router.route_text(&candle_json("BTCUSDT", "1m", 120, 2.0));
        assert_eq!(routed, Routed::Candle { key: key.clone(), outcome: CandleUpdate::Appended { evicted: 0 } });
        assert_eq!(state.candle_buffer.last_close(&key), Some(2.0));
        assert!(state.current_state_version() > before);
    }

    #[test]
    fn stale_candle_is_rejected_without_version_bump() {
        let (state, router, _key) = setup();
        let before = state.current_state_version();

        let routed = router.route_text(&candle_json("btcusdt", "1m", 0, 9.0));
        assert!(matches!(
            routed,
            Routed::Candle { outcome: CandleUpdate::Rejected { last_timestamp: 60 }, .. }
        ));
        assert_eq!(state.current_state_version(), before);
        assert_eq!(state.gateway_counters.snapshot().rejected, 1);
    }

    #[test]
    fn unloaded_key_is_ignored() {
        let (state, router, _key) = setup();
        let routed = router.route_text(&candle_json("ethusdt", "1m", 60, 1.0));
        assert!(matches!(routed, Routed::Candle { outcome: CandleUpdate::UnknownKey, .. }));
        assert!(!state.candle_buffer.contains(&SeriesKey::new("ethusdt", Timeframe::OneMinute)));
    }

    #[test]
    fn live_scores_are_appended() {
        let (state, router, key) = setup();
        let text = r#"{"type": "live_zscore", "symbol": "btcusdt", "timeframe": "1m",
                       "z_score": 2.4, "timestamp": "2024-01-01T00:00:01.000001"}"#;
        let routed = router.route_text(text);
        assert_eq!(routed, Routed::Score { key: key.clone(), outcome: ScoreUpdate::Appended { evicted: 0 } });
        assert_eq!(state.score_buffer.latest(&key), Some(2.4));
    }

    #[test]
    fn malformed_and_unknown_frames() {
        let (state, router, key) = setup();
        assert_eq!(router.route_text("{not json"), Routed::Dropped);
        assert_eq!(router.route_text(r#"{"type": "candle_update", "symbol": "btcusdt"}"#), Routed::Dropped);
        assert_eq!(router.route_text(r#"{"type": "analytics_update", "analytics": {}}"#), Routed::Ignored);
        assert_eq!(router.route_text(r#"{"type": "connection", "status": "connected"}"#), Routed::Welcome);

        let stats = state.gateway_counters.snapshot();
        assert_eq!(stats.dropped, 2);
        assert_eq!(state.candle_buffer.count(&key), 1);
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé");
        assert_eq!(truncate("abc", 10), "abc");
    }
}
