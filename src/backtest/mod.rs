// =============================================================================
// Backtest — signals -> matched trades -> performance report
// =============================================================================

pub mod matcher;
pub mod performance;

use chrono::Utc;
use serde::Serialize;
use tracing::info;

use crate::market_data::SeriesKey;
use crate::types::Timeframe;

pub use matcher::{match_trades, MatchOutcome, Signal};
pub use performance::{calculate, PerformanceStats};

/// One closed trade with its computed return, for the trade table.
#[derive(Debug, Clone, Serialize)]
pub struct TradeResult {
    pub entry: Signal,
    pub exit: Signal,
    pub pnl_pct: Option<f64>,
}

/// Everything the UI shows for one backtest run. Recomputed in full on
/// every run; never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct BacktestReport {
    pub id: String,
    pub symbol: String,
    pub timeframe: Timeframe,
    pub z_threshold: f64,
    pub generated_at: String,
    pub signal_count: usize,
    pub discarded_entries: usize,
    pub discarded_exits: usize,
    pub dropped_open_trade: bool,
    pub trades: Vec<TradeResult>,
    pub stats: PerformanceStats,
}

/// Run the matcher and the calculator over `signals` for `key`.
pub fn run_backtest(key: &SeriesKey, z_threshold: f64, signals: &[Signal]) -> BacktestReport {
    let MatchOutcome {
        trades,
        discarded_entries,
        discarded_exits,
        dropped_open_trade,
    } = match_trades(signals);

    let stats = calculate(&trades);

    let trades: Vec<TradeResult> = trades
        .into_iter()
        .filter_map(|t| {
            let pnl_pct = t.pnl_pct();
            t.exit.map(|exit| TradeResult {
                entry: t.entry,
                exit,
                pnl_pct,
            })
        })
        .collect();

    info!(
        key = %key,
        signals = signals.len(),
        trades = stats.total_trades,
        win_rate = stats.win_rate,
        total_pnl = stats.total_profit_loss,
        sharpe = stats.sharpe_ratio,
        "backtest complete"
    );

    BacktestReport {
        id: uuid::Uuid::new_v4().to_string(),
        symbol: key.symbol.clone(),
        timeframe: key.timeframe,
        z_threshold,
        generated_at: Utc::now().to_rfc3339(),
        signal_count: signals.len(),
        discarded_entries,
        discarded_exits,
        dropped_open_trade,
        trades,
        stats,
    }
}
