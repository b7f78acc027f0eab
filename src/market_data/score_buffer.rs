// =============================================================================
// Live Score Buffer — rolling z-score stream per (symbol, timeframe)
// =============================================================================
//
// Same length bound and oldest-first eviction as the candle buffer, but every
// point is appended: the stream is a sequence of observations, not an
// evolving bucket, so equal timestamps are kept side by side.
// =============================================================================

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use super::candle_buffer::SeriesKey;
use super::events::{EventBus, SeriesEvent, SeriesEventKind};
use super::series::BoundedSeries;

/// One observation of a scalar statistic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScorePoint {
    #[serde(deserialize_with = "deserialize_score_timestamp")]
    pub timestamp: NaiveDateTime,
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScoreUpdate {
    Appended { evicted: usize },
    UnknownKey,
}

pub struct ScoreBuffer {
    buffers: RwLock<HashMap<SeriesKey, BoundedSeries<ScorePoint>>>,
    capacity: usize,
    events: EventBus,
}

impl ScoreBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
            events: EventBus::new(),
        }
    }

    /// Establish an (empty) stream for `key`. Idempotent: an already-tracked
    /// key keeps its points.
    pub fn track(&self, key: SeriesKey) {
        let mut map = self.buffers.write();
        if map.contains_key(&key) {
            return;
        }
        map.insert(key.clone(), BoundedSeries::new(self.capacity));
        drop(map);
        self.events.publish(key, SeriesEventKind::Tracked, 0);
    }

    /// Append one point, evicting the oldest beyond capacity.
    pub fn apply_update(&self, key: &SeriesKey, point: ScorePoint) -> ScoreUpdate {
        let mut map = self.buffers.write();
        let Some(series) = map.get_mut(key) else {
            debug!(key = %key, "score update for untracked key ignored");
            return ScoreUpdate::UnknownKey;
        };
        let evicted = series.push_evicting(point);
        let len = series.len();
        drop(map);

        self.events
            .publish(key.clone(), SeriesEventKind::ScoreAppended { evicted }, len);
        ScoreUpdate::Appended { evicted }
    }

    pub fn current(&self, key: &SeriesKey) -> Option<Vec<ScorePoint>> {
        self.buffers.read().get(key).map(BoundedSeries::to_vec)
    }

    /// Most recent value for `key`, if any point has arrived.
    pub fn latest(&self, key: &SeriesKey) -> Option<f64> {
        self.buffers
            .read()
            .get(key)
            .and_then(|s| s.last().map(|p| p.value))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeriesEvent> {
        self.events.subscribe()
    }
}

/// The backend emits naive `isoformat()` strings; accept RFC 3339 with an
/// offset as well and keep the wall-clock reading.
pub(crate) fn deserialize_score_timestamp<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    if let Ok(dt) = DateTime::parse_from_rfc3339(&raw) {
        return Ok(dt.naive_local());
    }
    NaiveDateTime::parse_from_str(&raw, "%Y-%m-%dT%H:%M:%S%.f")
        .map_err(|e| serde::de::Error::custom(format!("invalid score timestamp '{raw}': {e}")))
}
