// =============================================================================
// Series events — change notifications for buffer consumers
// =============================================================================
//
// Buffers publish one `SeriesEvent` per state-changing operation on a
// `tokio::sync::broadcast` channel.  Rejected updates publish nothing.  A send
// with no live receivers is not an error.
// =============================================================================

use serde::Serialize;
use tokio::sync::broadcast;

use super::candle_buffer::SeriesKey;

/// Capacity of the broadcast channel. Slow receivers see `Lagged` and skip.
const EVENT_CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SeriesEventKind {
    /// Candle buffer replaced by a historical snapshot.
    Loaded,
    /// Live candle revised the current bucket.
    Replaced,
    /// Live candle opened a new bucket.
    Appended { evicted: usize },
    /// Score stream established for the key.
    Tracked,
    /// Live score point appended.
    ScoreAppended { evicted: usize },
}

#[derive(Debug, Clone, Serialize)]
pub struct SeriesEvent {
    pub key: SeriesKey,
    #[serde(flatten)]
    pub kind: SeriesEventKind,
    /// Buffer length after the operation.
    pub len: usize,
}

/// Thin wrapper over a broadcast sender so buffers can own one each.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SeriesEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _rx) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    pub fn publish(&self, key: SeriesKey, kind: SeriesEventKind, len: usize) {
        let _ = self.tx.send(SeriesEvent { key, kind, len });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SeriesEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
