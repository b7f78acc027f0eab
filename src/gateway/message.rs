// =============================================================================
// Gateway messages — typed view of push-channel payloads
// =============================================================================
//
// Recognised shapes, routed by the `type` field:
//   { "type": "candle_update", "symbol", "timeframe", "candle": { ... } }
//   { "type": "live_zscore", "symbol", "timeframe", "timestamp", "z_score" }
//   { "type": "connection", "status" }            (welcome frame)
//
// Any other `type` parses to `Other`.  A known type with a missing or
// mistyped field, or a body that is not JSON at all, is a parse error.
// =============================================================================

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use serde::Deserialize;

use crate::market_data::{Candle, ScorePoint, SeriesKey};
use crate::types::Timeframe;

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayMessage {
    CandleUpdate {
        symbol: String,
        timeframe: Timeframe,
        candle: Candle,
    },
    LiveZscore {
        symbol: String,
        timeframe: Timeframe,
        #[serde(deserialize_with = "crate::market_data::score_buffer::deserialize_score_timestamp")]
        timestamp: NaiveDateTime,
        z_score: f64,
    },
    Connection {
        #[serde(default)]
        status: Option<String>,
    },
    #[serde(other)]
    Other,
}

impl GatewayMessage {
    /// Series key addressed by this message, for data-bearing variants.
    pub fn key(&self) -> Option<SeriesKey> {
        match self {
            Self::CandleUpdate {
                symbol, timeframe, ..
            }
            | Self::LiveZscore {
                symbol, timeframe, ..
            } => Some(SeriesKey::new(symbol, *timeframe)),
            Self::Connection { .. } | Self::Other => None,
        }
    }

    /// Convert a `live_zscore` payload into a buffer point.
    pub fn score_point(&self) -> Option<ScorePoint> {
        match self {
            Self::LiveZscore {
                timestamp, z_score, ..
            } => Some(ScorePoint {
                timestamp: *timestamp,
                value: *z_score,
            }),
            _ => None,
        }
    }
}

/// Parse one text frame from the push channel.
pub fn parse_message(text: &str) -> Result<GatewayMessage> {
    serde_json::from_str(text).context("failed to parse gateway message")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_candle_update() {
        let json = r#"{
            "type": "candle_update",
            "symbol": "btcusdt",
            "timeframe": "1s",
            "candle": {"timestamp": 1700000000, "open": 37000.0, "high": 37010.0,
                       "low": 36990.0, "close": 37005.0, "volume": 1.25}
        }"#;
        let msg = parse_message(json).expect("should parse");
        assert_eq!(msg.key(), Some(SeriesKey::new("btcusdt", Timeframe::OneSecond)));
        match msg {
            GatewayMessage::CandleUpdate { candle, .. } => {
                assert_eq!(candle.timestamp, 1_700_000_000);
                assert!((candle.close - 37005.0).abs() < f64::EPSILON);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_live_zscore() {
        let json = r#"{"type": "live_zscore", "symbol": "ethusdt", "timeframe": "5m",
                       "z_score": -1.75, "timestamp": "2024-03-01T10:15:00.500000"}"#;
        let msg = parse_message(json).unwrap();
        let point = msg.score_point().unwrap();
        assert!((point.value + 1.75).abs() < f64::EPSILON);
        assert_eq!(msg.key().unwrap().timeframe, Timeframe::FiveMinutes);
    }

    #[test]
    fn welcome_and_unknown_types() {
        let welcome = parse_message(r#"{"type": "connection", "status": "connected"}"#).unwrap();
        assert_eq!(
            welcome,
            GatewayMessage::Connection {
                status: Some("connected".into())
            }
        );

        let other = parse_message(r#"{"type": "analytics_update", "symbol": "btcusdt", "analytics": {}}"#).unwrap();
        assert_eq!(other, GatewayMessage::Other);
        assert!(other.key().is_none());
    }

    #[test]
    fn malformed_payloads_are_errors() {
        assert!(parse_message("not json").is_err());
        assert!(parse_message(r#"{"symbol": "btcusdt"}"#).is_err());
        // Known type, missing candle.
        assert!(parse_message(r#"{"type": "candle_update", "symbol": "btcusdt", "timeframe": "1m"}"#).is_err());
        // Unsupported timeframe.
        assert!(parse_message(
            r#"{"type": "live_zscore", "symbol": "x", "timeframe": "1h", "z_score": 1, "timestamp": "2024-01-01T00:00:00"}"#
        )
        .is_err());
    }
}
