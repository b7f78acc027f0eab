// =============================================================================
// Performance Calculator — aggregate statistics over closed trades
// =============================================================================
//
// Per-trade return (percent, long only):
//   pnl_i = (exit - entry) / entry * 100
//
// Aggregates:
//   win_rate          = count(pnl > 0) / n * 100
//   avg_profit        = mean of pnl > 0   (0 if none)
//   avg_loss          = mean of pnl < 0   (0 if none)
//   total_profit_loss = sum of pnl        (simple sum, not compounded)
//   max_drawdown      = max(peak_cum - cum) over the cumulative pnl curve
//   sharpe_ratio      = mean / stddev_pop * sqrt(252), 0 when stddev == 0
//
// Flat trades (pnl == 0) count toward n but neither bucket.  The 252 factor
// and the population divisor are fixed conventions and must not change.
// =============================================================================

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::matcher::Trade;

/// Periods per year used to annualise the Sharpe ratio.
const ANNUALIZATION_PERIODS: f64 = 252.0;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PerformanceStats {
    pub total_trades: usize,
    pub winning_trades: usize,
    pub losing_trades: usize,
    /// Percent of trades with a strictly positive return.
    pub win_rate: f64,
    pub avg_profit: f64,
    pub avg_loss: f64,
    pub total_profit_loss: f64,
    pub max_drawdown: f64,
    pub sharpe_ratio: f64,
}

/// Compute statistics over `trades`. Open trades and trades without a usable
/// entry price are skipped; an empty input yields all zeros.
pub fn calculate(trades: &[Trade]) -> PerformanceStats {
    let returns: Vec<f64> = trades.iter().filter_map(Trade::pnl_pct).collect();

    let open = trades.iter().filter(|t| !t.is_closed()).count();
    let unpriced = trades.len() - returns.len() - open;
    if open + unpriced > 0 {
        warn!(open, unpriced, "trades without a computable return excluded from statistics");
    }

    calculate_from_returns(&returns)
}

/// Same aggregates, starting from per-trade percentage returns.
pub fn calculate_from_returns(returns: &[f64]) -> PerformanceStats {
    if returns.is_empty() {
        return PerformanceStats::default();
    }

    let n = returns.len() as f64;

    let wins: Vec<f64> = returns.iter().copied().filter(|r| *r > 0.0).collect();
    let losses: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();

    let total_profit_loss: f64 = returns.iter().sum();
    let avg_return = total_profit_loss / n;

    let variance = returns
        .iter()
        .map(|r| (r - avg_return).powi(2))
        .sum::<f64>()
        / n;
    let std_dev = variance.sqrt();
    let sharpe_ratio = if std_dev > 0.0 {
        avg_return / std_dev * ANNUALIZATION_PERIODS.sqrt()
    } else {
        0.0
    };

    PerformanceStats {
        total_trades: returns.len(),
        winning_trades: wins.len(),
        losing_trades: losses.len(),
        win_rate: wins.len() as f64 / n * 100.0,
        avg_profit: mean(&wins),
        avg_loss: mean(&losses),
        total_profit_loss,
        max_drawdown: max_drawdown(returns),
        sharpe_ratio,
    }
}

/// Largest drop of the cumulative return curve below its running peak.
/// The peak starts at the first cumulative value, so the result is >= 0.
pub fn max_drawdown(returns: &[f64]) -> f64 {
    let mut cumulative = 0.0;
    let mut peak = f64::NEG_INFINITY;
    let mut max_dd: f64 = 0.0;

    for r in returns {
        cumulative += r;
        peak = peak.max(cumulative);
        max_dd = max_dd.max(peak - cumulative);
    }
    max_dd
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}
