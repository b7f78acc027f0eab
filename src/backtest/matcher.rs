// =============================================================================
// Trade Matcher — entry/exit signals into closed round trips
// =============================================================================
//
// Single forward pass with one position slot:
//   - entry while flat      -> open a trade
//   - entry while in trade  -> discarded (no pyramiding)
//   - exit while in trade   -> close and emit the trade
//   - exit while flat       -> discarded (no naked exits)
//   - open trade at the end -> dropped; only closed trades are emitted
//
// The matcher is greedy FIFO and never fails: stray signals are counted, not
// reported as errors.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalKind {
    Entry,
    Exit,
}

/// A generated entry/exit marker from the backtest-signal endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    #[serde(rename = "type")]
    pub kind: SignalKind,
    /// Epoch seconds of the candle that produced the signal.
    pub timestamp: i64,
    pub price: f64,
    /// Z-score at signal time, when the producer includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub z_score: Option<f64>,
}

/// A round trip. Open while `exit` is `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub entry: Signal,
    pub exit: Option<Signal>,
}

impl Trade {
    pub fn is_closed(&self) -> bool {
        self.exit.is_some()
    }

    /// Long-only percentage return, `(exit - entry) / entry * 100`.
    ///
    /// `None` while the trade is open or when the entry price cannot anchor a
    /// percentage (zero, negative or non-finite).
    pub fn pnl_pct(&self) -> Option<f64> {
        let exit = self.exit.as_ref()?;
        let entry = self.entry.price;
        if !(entry.is_finite() && entry > 0.0) {
            return None;
        }
        Some((exit.price - entry) / entry * 100.0)
    }
}

/// Matched trades plus counts of what was thrown away.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchOutcome {
    pub trades: Vec<Trade>,
    pub discarded_entries: usize,
    pub discarded_exits: usize,
    pub dropped_open_trade: bool,
}

pub fn match_trades(signals: &[Signal]) -> MatchOutcome {
    let mut outcome = MatchOutcome::default();
    let mut open: Option<&Signal> = None;

    for signal in signals {
        match (signal.kind, open) {
            (SignalKind::Entry, None) => open = Some(signal),
            (SignalKind::Entry, Some(_)) => {
                trace!(timestamp = signal.timestamp, "entry while in trade discarded");
                outcome.discarded_entries += 1;
            }
            (SignalKind::Exit, Some(entry)) => {
                outcome.trades.push(Trade {
                    entry: entry.clone(),
                    exit: Some(signal.clone()),
                });
                open = None;
            }
            (SignalKind::Exit, None) => {
                trace!(timestamp = signal.timestamp, "exit while flat discarded");
                outcome.discarded_exits += 1;
            }
        }
    }

    if let Some(entry) = open {
        debug!(timestamp = entry.timestamp, "trailing open trade dropped");
        outcome.dropped_open_trade = true;
    }

    debug!(
        signals = signals.len(),
        trades = outcome.trades.len(),
        discarded_entries = outcome.discarded_entries,
        discarded_exits = outcome.discarded_exits,
        "signals matched"
    );
    outcome
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(t: i64, price: f64) -> Signal {
        Signal {
            kind: SignalKind::Entry,
            timestamp: t,
            price,
            z_score: None,
        }
    }

    fn exit(t: i64, price: f64) -> Signal {
        Signal {
            kind: SignalKind::Exit,
            timestamp: t,
            price,
            z_score: None,
        }
    }

    #[test]
    fn alternating_signals_pair_in_order() {
        let out = match_trades(&[entry(1, 100.0), exit(2, 110.0), entry(3, 90.0), exit(4, 80.0)]);
        assert_eq!(out.trades.len(), 2);
        assert_eq!(out.trades[0].entry.timestamp, 1);
        assert_eq!(out.trades[0].exit.as_ref().unwrap().timestamp, 2);
        assert_eq!(out.trades[1].entry.timestamp, 3);
        assert!(out.trades.iter().all(Trade::is_closed));
    }

    #[test]
    fn repeated_entries_keep_the_first() {
        let out = match_trades(&[entry(1, 100.0), entry(2, 95.0), entry(3, 90.0), exit(4, 105.0)]);
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].entry.timestamp, 1);
        assert_eq!(out.discarded_entries, 2);
    }

    #[test]
    fn naked_exits_are_discarded() {
        let out = match_trades(&[exit(1, 100.0), exit(2, 101.0), entry(3, 100.0), exit(4, 102.0), exit(5, 99.0)]);
        assert_eq!(out.trades.len(), 1);
        assert_eq!(out.trades[0].exit.as_ref().unwrap().timestamp, 4);
        assert_eq!(out.discarded_exits, 3);
    }

    #[test]
    fn trailing_entry_is_not_emitted() {
        let signals = [entry(1, 100.0), exit(2, 101.0), entry(3, 102.0), exit(4, 103.0), entry(5, 104.0)];
        let out = match_trades(&signals);
        assert_eq!(out.trades.len(), 2);
        assert!(out.dropped_open_trade);
        assert!(out.trades.iter().all(|t| t.entry.timestamp != 5));
    }

    #[test]
    fn empty_and_exit_only_inputs() {
        assert!(match_trades(&[]).trades.is_empty());
        let out = match_trades(&[exit(1, 1.0)]);
        assert!(out.trades.is_empty());
        assert!(!out.dropped_open_trade);
    }

    #[test]
    fn pnl_pct_long_only() {
        let win = Trade { entry: entry(1, 100.0), exit: Some(exit(2, 110.0)) };
        assert!((win.pnl_pct().unwrap() - 10.0).abs() < 1e-10);

        let loss = Trade { entry: entry(1, 90.0), exit: Some(exit(2, 80.0)) };
        assert!((loss.pnl_pct().unwrap() + 11.111_111).abs() < 1e-5);

        let open = Trade { entry: entry(1, 90.0), exit: None };
        assert!(open.pnl_pct().is_none());

        let zero = Trade { entry: entry(1, 0.0), exit: Some(exit(2, 1.0)) };
        assert!(zero.pnl_pct().is_none());
    }

    #[test]
    fn parses_backend_signal_shape() {
        let json = r#"{"timestamp": 1700000000, "price": 37020.5, "z_score": 2.4, "type": "entry"}"#;
        let s: Signal = serde_json::from_str(json).unwrap();
        assert_eq!(s.kind, SignalKind::Entry);
        assert_eq!(s.z_score, Some(2.4));

        let bare: Signal = serde_json::from_str(r#"{"timestamp": 1, "price": 1.0, "type": "exit"}"#).unwrap();
        assert_eq!(bare.kind, SignalKind::Exit);
        assert!(bare.z_score.is_none());
    }
}
