// =============================================================================
// Backend REST client — historical candles and backtest signals
// =============================================================================
//
// Endpoints:
//   GET /api/price/{symbol}?timeframe=&limit=            -> { candles: [...] }
//   GET /api/backtest-signals/{symbol}?timeframe=&z_threshold= -> { signals: [...] }
//
// Non-2xx statuses and undecodable bodies are errors; callers decide whether
// to surface them. Nothing here mutates shared state.
// =============================================================================

use std::time::Duration;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::{debug, instrument};

use crate::backtest::Signal;
use crate::market_data::Candle;
use crate::types::Timeframe;

#[derive(Debug, Deserialize)]
struct PriceResponse {
    #[serde(default)]
    candles: Vec<Candle>,
}

#[derive(Debug, Deserialize)]
struct SignalsResponse {
    #[serde(default)]
    signals: Vec<Signal>,
}

/// HTTP client for the analytics backend.
#[derive(Clone)]
pub struct BackendClient {
    base_url: String,
    client: reqwest::Client,
}

impl BackendClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build reqwest client")?;

        let base_url = base_url.trim_end_matches('/').to_string();
        debug!(base_url = %base_url, "BackendClient initialised");

        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// GET /api/price/{symbol} — the most recent `limit` candles, oldest first
    /// as the backend sends them (the buffer sorts regardless).
    #[instrument(skip(self), name = "backend::fetch_candles")]
    pub async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!("{}/api/price/{}", self.base_url, symbol);
        let query = [
            ("timeframe", timeframe.as_str().to_string()),
            ("limit", limit.to_string()),
        ];
        let body: PriceResponse = self.get_json(&url, &query).await?;

        debug!(symbol, timeframe = %timeframe, count = body.candles.len(), "candles fetched");
        Ok(body.candles)
    }

    /// GET /api/backtest-signals/{symbol} — ordered entry/exit signals.
    #[instrument(skip(self), name = "backend::fetch_signals")]
    pub async fn fetch_signals(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        z_threshold: f64,
    ) -> Result<Vec<Signal>> {
        let url = format!("{}/api/backtest-signals/{}", self.base_url, symbol);
        let query = [
            ("timeframe", timeframe.as_str().to_string()),
            ("z_threshold", z_threshold.to_string()),
        ];
        let body: SignalsResponse = self.get_json(&url, &query).await?;

        debug!(symbol, timeframe = %timeframe, count = body.signals.len(), "signals fetched");
        Ok(body.signals)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: &str, query: &[(&str, String)]) -> Result<T> {
        let resp = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .with_context(|| format!("GET {url} request failed"))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            anyhow::bail!("backend GET {} returned {}: {}", url, status, text);
        }

        resp.json::<T>()
            .await
            .with_context(|| format!("failed to parse response from {url}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::extract::{Path, Query};
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::{Json, Router};
    use std::collections::HashMap;

    async fn price(
        Path(symbol): Path<String>,
        Query(q): Query<HashMap<String, String>>,
    ) -> Result<Json<serde_json::Value>, StatusCode> {
        if symbol == "missing" {
            return Err(StatusCode::NOT_FOUND);
        }
        let limit: i64 = q.get("limit").and_then(|l| l.parse().ok()).unwrap_or(0);
        let candles: Vec<serde_json::Value> = (0..limit)
            .map(|i| {
                serde_json::json!({
                    "timestamp": 60 * i, "open": 1.0, "high": 2.0,
                    "low": 0.5, "close": 1.5, "volume": 10.0
                })
            })
            .collect();
        Ok(Json(serde_json::json!({
            "prices": [], "timestamps": [], "candles": candles, "count": limit
        })))
    }

    async fn signals(Query(q): Query<HashMap<String, String>>) -> Json<serde_json::Value> {
        assert_eq!(q.get("timeframe").map(String::as_str), Some("5m"));
        Json(serde_json::json!({
            "signals": [
                {"timestamp": 1, "price": 100.0, "z_score": -2.3, "type": "entry"},
                {"timestamp": 2, "price": 101.0, "z_score": 0.1, "type": "exit"}
            ]
        }))
    }

    async fn spawn_backend() -> String {
        let app = Router::new()
            .route("/api/price/:symbol", get(price))
            .route("/api/backtest-signals/:symbol", get(signals));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    #[tokio::test]
    async fn fetches_candles_with_limit() {
        let base = spawn_backend().await;
        let client = BackendClient::new(&base, Duration::from_secs(5)).unwrap();
        assert!(!client.base_url().ends_with('/'));

        let candles = client.fetch_candles("btcusdt", Timeframe::OneMinute, 3).await.unwrap();
        assert_eq!(candles.len(), 3);
        assert_eq!(candles[2].timestamp, 120);
    }

    #[tokio::test]
    async fn non_success_status_is_an_error() {
        let base = spawn_backend().await;
        let client = BackendClient::new(&base, Duration::from_secs(5)).unwrap();
        let err = client
            .fetch_candles("missing", Timeframe::OneMinute, 3)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }

    #[tokio::test]
    async fn fetches_signals() {
        let base = spawn_backend().await;
        let client = BackendClient::new(&base, Duration::from_secs(5)).unwrap();
        let signals = client
            .fetch_signals("ethusdt", Timeframe::FiveMinutes, 2.0)
            .await
            .unwrap();
        assert_eq!(signals.len(), 2);
        assert_eq!(signals[0].z_score, Some(-2.3));
    }

    #[tokio::test]
    async fn unreachable_backend_is_an_error() {
        // Port 9 (discard) is closed on test hosts.
        let client = BackendClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert!(client.fetch_candles("btcusdt", Timeframe::OneSecond, 1).await.is_err());
    }
}
