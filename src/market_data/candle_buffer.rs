use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::events::{EventBus, SeriesEvent, SeriesEventKind};
use super::series::BoundedSeries;
use crate::types::Timeframe;

// ---------------------------------------------------------------------------
// Data types
// ---------------------------------------------------------------------------

/// A single OHLCV candle as produced by the analytics backend.
///
/// `timestamp` is the bucket start in epoch seconds. OHLC consistency is the
/// producer's responsibility and is not checked here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    #[serde(deserialize_with = "deserialize_epoch_secs")]
    pub timestamp: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
}

/// Composite key that identifies a unique candle series.
///
/// Symbols are stored lowercase so `BTCUSDT` from the UI and `btcusdt` from
/// the push channel address the same buffer.
#[derive(Debug, Clone, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: String,
    pub timeframe: Timeframe,
}

impl SeriesKey {
    pub fn new(symbol: &str, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.trim().to_lowercase(),
            timeframe,
        }
    }
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

/// Result of feeding one live candle into the buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandleUpdate {
    /// Buffer was empty; it now holds exactly this candle.
    Initialized,
    /// Same bucket as the newest candle; newest candle overwritten.
    Replaced,
    /// Newer bucket appended; `evicted` oldest candles dropped to stay in capacity.
    Appended { evicted: usize },
    /// Older than the newest candle; buffer untouched.
    Rejected { last_timestamp: i64 },
    /// No buffer for this key; only `load` establishes one.
    UnknownKey,
}

impl CandleUpdate {
    pub fn changed(&self) -> bool {
        matches!(
            self,
            Self::Initialized | Self::Replaced | Self::Appended { .. }
        )
    }
}

/// Read-only summary of one buffer for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct SeriesSummary {
    pub key: SeriesKey,
    pub len: usize,
    pub capacity: usize,
    pub first_timestamp: Option<i64>,
    pub last_timestamp: Option<i64>,
}

// ---------------------------------------------------------------------------
// CandleBuffer -- bounded, strictly time-ordered series per (symbol, timeframe)
// ---------------------------------------------------------------------------

/// Owns one bounded candle series per [`SeriesKey`].
///
/// Invariant, after every operation: each series is strictly increasing in
/// `timestamp` and no longer than its capacity. Switching the displayed
/// timeframe only selects another key; it never touches other buffers.
pub struct CandleBuffer {
    buffers: RwLock<HashMap<SeriesKey, BoundedSeries<Candle>>>,
    events: EventBus,
}

impl CandleBuffer {
    pub fn new() -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            events: EventBus::new(),
        }
    }

    /// Replace the buffer for `key` with a historical snapshot.
    ///
    /// The snapshot is sorted ascending (upstream order is not trusted),
    /// duplicate timestamps collapse to the later occurrence, and only the
    /// last `capacity` candles are kept. Any prior buffer for the key is
    /// discarded wholesale, including live updates applied before this call.
    /// Returns the resulting length.
    pub fn load(&self, key: SeriesKey, mut initial: Vec<Candle>, capacity: usize) -> usize {
        let received = initial.len();

        // Stable sort keeps arrival order among equal timestamps, so keeping
        // the last of each run keeps the later revision.
        initial.sort_by_key(|c| c.timestamp);
        let mut ordered: Vec<Candle> = Vec::with_capacity(initial.len());
        for candle in initial {
            match ordered.last_mut() {
                Some(last) if last.timestamp == candle.timestamp => *last = candle,
                _ => ordered.push(candle),
            }
        }

        let series = BoundedSeries::from_ordered(ordered, capacity);
        let len = series.len();

        self.buffers.write().insert(key.clone(), series);

        info!(
            key = %key,
            received,
            kept = len,
            capacity = capacity.max(1),
            "candle snapshot loaded"
        );
        self.events.publish(key, SeriesEventKind::Loaded, len);
        len
    }

    /// Apply one live candle to the buffer for `key`.
    ///
    /// * empty buffer      -> becomes `[candle]`
    /// * same timestamp    -> newest candle replaced (bucket still forming)
    /// * newer timestamp   -> appended, oldest evicted beyond capacity
    /// * older timestamp   -> rejected, buffer unchanged
    pub fn apply_update(&self, key: &SeriesKey, candle: Candle) -> CandleUpdate {
        let mut map = self.buffers.write();
        let Some(series) = map.get_mut(key) else {
            debug!(key = %key, "candle update for unloaded key ignored");
            return CandleUpdate::UnknownKey;
        };

        let outcome = match series.last().map(|c| c.timestamp) {
            None => {
                series.push_evicting(candle);
                CandleUpdate::Initialized
            }
            Some(last) if candle.timestamp == last => {
                series.replace_last(candle);
                CandleUpdate::Replaced
            }
            Some(last) if candle.timestamp > last => {
                let evicted = series.push_evicting(candle);
                CandleUpdate::Appended { evicted }
            }
            Some(last) => {
                debug!(
                    key = %key,
                    timestamp = candle.timestamp,
                    last_timestamp = last,
                    "out-of-order candle rejected"
                );
                CandleUpdate::Rejected {
                    last_timestamp: last,
                }
            }
        };
        let len = series.len();
        drop(map);

        let kind = match outcome {
            CandleUpdate::Initialized => Some(SeriesEventKind::Appended { evicted: 0 }),
            CandleUpdate::Replaced => Some(SeriesEventKind::Replaced),
            CandleUpdate::Appended { evicted } => Some(SeriesEventKind::Appended { evicted }),
            CandleUpdate::Rejected { .. } | CandleUpdate::UnknownKey => None,
        };
        if let Some(kind) = kind {
            self.events.publish(key.clone(), kind, len);
        }
        outcome
    }

    /// Oldest-first copy of the series for `key`, or `None` if never loaded.
    pub fn current(&self, key: &SeriesKey) -> Option<Vec<Candle>> {
        self.buffers.read().get(key).map(BoundedSeries::to_vec)
    }

    pub fn contains(&self, key: &SeriesKey) -> bool {
        self.buffers.read().contains_key(key)
    }

    /// Number of candles stored for a key (0 when unknown).
    pub fn count(&self, key: &SeriesKey) -> usize {
        self.buffers.read().get(key).map_or(0, BoundedSeries::len)
    }

    /// Close price of the newest candle, if any.
    pub fn last_close(&self, key: &SeriesKey) -> Option<f64> {
        self.buffers
            .read()
            .get(key)
            .and_then(|s| s.last().map(|c| c.close))
    }

    /// Summaries for every loaded key, sorted by key.
    pub fn summaries(&self) -> Vec<SeriesSummary> {
        let map = self.buffers.read();
        let mut out: Vec<SeriesSummary> = map
            .iter()
            .map(|(key, s)| SeriesSummary {
                key: key.clone(),
                len: s.len(),
                capacity: s.capacity(),
                first_timestamp: s.iter().next().map(|c| c.timestamp),
                last_timestamp: s.last().map(|c| c.timestamp),
            })
            .collect();
        out.sort_by(|a, b| a.key.cmp(&b.key));
        out
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeriesEvent> {
        self.events.subscribe()
    }
}

impl Default for CandleBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// The backend emits integer bucket starts, but tolerate float seconds.
fn deserialize_epoch_secs<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum EpochSecs {
        Int(i64),
        Float(f64),
    }

    match EpochSecs::deserialize(deserializer)? {
        EpochSecs::Int(v) => Ok(v),
        EpochSecs::Float(v) if v.is_finite() => Ok(v.trunc() as i64),
        EpochSecs::Float(v) => {
            warn!(value = v, "non-finite candle timestamp");
            Err(serde::de::Error::custom("candle timestamp is not finite"))
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn candle(timestamp: i64, close: f64) -> Candle {
        Candle {
            timestamp,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10.0,
        }
    }

    fn key(tf: Timeframe) -> SeriesKey {
        SeriesKey::new("BTCUSDT", tf)
    }

    fn timestamps(buf: &CandleBuffer, key: &SeriesKey) -> Vec<i64> {
        buf.current(key)
            .unwrap_or_default()
            .iter()
            .map(|c| c.timestamp)
            .collect()
    }

    fn assert_invariant(buf: &CandleBuffer, key: &SeriesKey, capacity: usize) {
        let ts = timestamps(buf, key);
        assert!(ts.len() <= capacity, "len {} > capacity {capacity}", ts.len());
        assert!(ts.windows(2).all(|w| w[0] < w[1]), "not strictly increasing: {ts:?}");
    }

    // ---- load ---------------------------------------------------------------

    #[test]
    fn load_sorts_and_truncates_to_capacity() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        let initial = vec![candle(300, 5.0), candle(60, 1.0), candle(240, 4.0), candle(120, 2.0), candle(180, 3.0)];

        assert_eq!(buf.load(k.clone(), initial, 3), 3);
        assert_eq!(timestamps(&buf, &k), vec![180, 240, 300]);
    }

    #[test]
    fn load_collapses_duplicate_timestamps_keeping_later() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneSecond);
        buf.load(k.clone(), vec![candle(2, 1.0), candle(1, 0.5), candle(2, 9.0)], 10);

        let series = buf.current(&k).unwrap();
        assert_eq!(series.len(), 2);
        assert_eq!(series[1].close, 9.0);
    }

    #[test]
    fn load_replaces_prior_buffer_wholesale() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        buf.load(k.clone(), vec![candle(60, 1.0)], 5);
        buf.apply_update(&k, candle(120, 2.0));
        buf.apply_update(&k, candle(180, 3.0));

        buf.load(k.clone(), vec![candle(0, 0.0)], 5);
        assert_eq!(timestamps(&buf, &k), vec![0]);
    }

    #[test]
    fn load_empty_then_update_initializes() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::FiveMinutes);
        buf.load(k.clone(), Vec::new(), 72);
        assert_eq!(buf.count(&k), 0);

        assert_eq!(buf.apply_update(&k, candle(300, 1.0)), CandleUpdate::Initialized);
        assert_eq!(timestamps(&buf, &k), vec![300]);
    }

    // ---- apply_update ---------------------------------------------------------

    #[test]
    fn replace_on_equal_timestamp() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        buf.load(k.clone(), vec![candle(10, 1.0)], 60);

        assert_eq!(buf.apply_update(&k, candle(10, 2.0)), CandleUpdate::Replaced);
        let series = buf.current(&k).unwrap();
        assert_eq!(series.len(), 1);
        assert_eq!(series[0].close, 2.0);
    }

    #[test]
    fn eviction_is_fifo() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneSecond);
        buf.load(k.clone(), Vec::new(), 3);

        for t in 1..=3 {
            buf.apply_update(&k, candle(t, t as f64));
        }
        assert_eq!(
            buf.apply_update(&k, candle(4, 4.0)),
            CandleUpdate::Appended { evicted: 1 }
        );
        assert_eq!(timestamps(&buf, &k), vec![2, 3, 4]);
    }

    #[test]
    fn out_of_order_update_is_rejected() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        buf.load(k.clone(), vec![candle(5, 1.0)], 10);

        assert_eq!(
            buf.apply_update(&k, candle(3, 7.0)),
            CandleUpdate::Rejected { last_timestamp: 5 }
        );
        assert_eq!(buf.current(&k).unwrap(), vec![candle(5, 1.0)]);
    }

    #[test]
    fn update_for_unknown_key_does_not_create_buffer() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        assert_eq!(buf.apply_update(&k, candle(1, 1.0)), CandleUpdate::UnknownKey);
        assert!(!buf.contains(&k));
        assert!(buf.current(&k).is_none());
    }

    #[test]
    fn keys_are_independent_across_timeframes() {
        let buf = CandleBuffer::new();
        let one_m = key(Timeframe::OneMinute);
        let five_m = key(Timeframe::FiveMinutes);
        buf.load(one_m.clone(), vec![candle(60, 1.0), candle(120, 2.0)], 60);
        buf.load(five_m.clone(), vec![candle(300, 5.0)], 72);

        buf.apply_update(&five_m, candle(600, 6.0));
        assert_eq!(timestamps(&buf, &one_m), vec![60, 120]);
        assert_eq!(timestamps(&buf, &five_m), vec![300, 600]);
    }

    #[test]
    fn symbol_case_is_normalised() {
        let buf = CandleBuffer::new();
        buf.load(SeriesKey::new("ETHUSDT", Timeframe::OneMinute), vec![candle(60, 1.0)], 5);
        let lower = SeriesKey::new("ethusdt", Timeframe::OneMinute);
        assert_eq!(buf.apply_update(&lower, candle(120, 2.0)), CandleUpdate::Appended { evicted: 0 });
        assert_eq!(buf.last_close(&lower), Some(2.0));
    }

    #[test]
    fn invariant_holds_under_mixed_adversarial_sequence() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneSecond);
        let capacity = 4;
        buf.load(k.clone(), vec![candle(7, 0.0), candle(3, 0.0), candle(7, 1.0), candle(5, 0.0)], capacity);
        assert_invariant(&buf, &k, capacity);

        let feed = [8, 8, 2, 9, 9, 10, 4, 11, 12, 12, 1, 13, 20, 15];
        for (i, t) in feed.iter().enumerate() {
            buf.apply_update(&k, candle(*t, i as f64));
            assert_invariant(&buf, &k, capacity);
        }
        assert_eq!(timestamps(&buf, &k), vec![11, 12, 13, 20]);
    }

    #[test]
    fn summaries_report_bounds() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        buf.load(k.clone(), vec![candle(60, 1.0), candle(120, 2.0)], 60);

        let summaries = buf.summaries();
        assert_eq!(summaries.len(), 1);
        assert_eq!(summaries[0].len, 2);
        assert_eq!(summaries[0].capacity, 60);
        assert_eq!(summaries[0].first_timestamp, Some(60));
        assert_eq!(summaries[0].last_timestamp, Some(120));
    }

    // ---- parsing / events -----------------------------------------------------

    #[test]
    fn candle_accepts_float_timestamp() {
        let c: Candle = serde_json::from_str(
            r#"{"timestamp": 1700000060.0, "open": 1, "high": 2, "low": 0.5, "close": 1.5, "volume": 3}"#,
        )
        .unwrap();
        assert_eq!(c.timestamp, 1_700_000_060);

        let missing = serde_json::from_str::<Candle>(r#"{"timestamp": 1, "open": 1}"#);
        assert!(missing.is_err());
    }

    #[tokio::test]
    async fn subscribers_see_changes_but_not_rejections() {
        let buf = CandleBuffer::new();
        let k = key(Timeframe::OneMinute);
        let mut rx = buf.subscribe();

        buf.load(k.clone(), vec![candle(60, 1.0)], 5);
        buf.apply_update(&k, candle(30, 1.0));
        buf.apply_update(&k, candle(60, 2.0));

        let first = rx.recv().await.unwrap();
        assert_eq!(first.kind, SeriesEventKind::Loaded);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.kind, SeriesEventKind::Replaced);
        assert_eq!(second.len, 1);
        assert!(rx.try_recv().is_err());
    }
}
