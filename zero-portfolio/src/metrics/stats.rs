//! Trade statistics and shared ratio helpers.
//!
//! Used by the portfolio metrics calculator and by the validators, so every
//! report computes Sharpe, drawdown and profit factor the same way.

use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;

use crate::ledger::ClosedTrade;

// ============================================================================
// Basic statistics
// ============================================================================

/// Arithmetic mean, 0 for an empty slice
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().mean()
    }
}

/// Sample standard deviation, 0 with fewer than two values
pub fn std_dev(values: &[f64]) -> f64 {
    if values.len() < 2 {
        0.0
    } else {
        values.iter().std_dev()
    }
}

/// Population variance, 0 for an empty slice
pub fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().population_variance()
    }
}

/// `numerator / denominator`, replacing an unbounded result with `cap`.
///
/// Returns the value and whether the cap was applied. A zero denominator
/// with a non-positive numerator yields 0.
pub fn capped_ratio(numerator: f64, denominator: f64, cap: f64) -> (f64, bool) {
    if denominator > f64::EPSILON {
        let value = numerator / denominator;
        if value > cap {
            (cap, true)
        } else if value < -cap {
            (-cap, true)
        } else {
            (value, false)
        }
    } else if numerator > 0.0 {
        (cap, true)
    } else {
        (0.0, false)
    }
}

/// Annualised Sharpe ratio of per-period returns
pub fn sharpe_ratio(returns: &[f64], risk_free_per_period: f64, periods_per_year: f64, cap: f64) -> (f64, bool) {
    if returns.is_empty() {
        return (0.0, false);
    }
    let excess = mean(returns) - risk_free_per_period;
    let (ratio, capped) = capped_ratio(excess, std_dev(returns), cap / periods_per_year.sqrt());
    (ratio * periods_per_year.sqrt(), capped)
}

/// Annualised Sortino ratio; only below-target returns enter the denominator
pub fn sortino_ratio(returns: &[f64], risk_free_per_period: f64, periods_per_year: f64, cap: f64) -> (f64, bool) {
    if returns.is_empty() {
        return (0.0, false);
    }
    let excess = mean(returns) - risk_free_per_period;
    let downside = (returns
        .iter()
        .map(|r| (r - risk_free_per_period).min(0.0).powi(2))
        .sum::<f64>()
        / returns.len() as f64)
        .sqrt();
    let (ratio, capped) = capped_ratio(excess, downside, cap / periods_per_year.sqrt());
    (ratio * periods_per_year.sqrt(), capped)
}

/// Simple returns between consecutive equity values
pub fn period_returns(equity: &[f64]) -> Vec<f64> {
    equity
        .windows(2)
        .map(|w| if w[0] > 0.0 { w[1] / w[0] - 1.0 } else { 0.0 })
        .collect()
}

// ============================================================================
// Drawdown
// ============================================================================

/// Peak-to-trough profile of an equity series
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DrawdownProfile {
    /// Deepest decline in currency
    pub max_drawdown: f64,
    /// Deepest decline as % of the running peak
    pub max_drawdown_pct: f64,
    /// Mean depth of drawdown episodes (%)
    pub avg_drawdown_pct: f64,
    /// Number of drawdown episodes, including an unrecovered one
    pub episodes: usize,
}

impl DrawdownProfile {
    /// Track the running peak through an equity series
    pub fn from_equity(equity: &[f64]) -> Self {
        let Some(&first) = equity.first() else {
            return Self::default();
        };

        let mut peak = first;
        let mut max_drawdown: f64 = 0.0;
        let mut max_drawdown_pct: f64 = 0.0;
        let mut episode_depth: f64 = 0.0;
        let mut depths = Vec::new();

        for &value in equity {
            if value >= peak {
                if episode_depth > 0.0 {
                    depths.push(episode_depth);
                    episode_depth = 0.0;
                }
                peak = value;
                continue;
            }

            let drawdown = peak - value;
            let drawdown_pct = if peak > 0.0 { drawdown / peak * 100.0 } else { 100.0 };
            max_drawdown = max_drawdown.max(drawdown);
            max_drawdown_pct = max_drawdown_pct.max(drawdown_pct);
            episode_depth = episode_depth.max(drawdown_pct);
        }
        if episode_depth > 0.0 {
            depths.push(episode_depth);
        }

        Self {
            max_drawdown,
            max_drawdown_pct,
            avg_drawdown_pct: mean(&depths),
            episodes: depths.len(),
        }
    }
}

// ============================================================================
// Trade statistics
// ============================================================================

/// Aggregate statistics of a set of realized trades
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TradeStatistics {
    /// Total number of trades
    pub total_trades: usize,
    /// Number of winning trades
    pub winning_trades: usize,
    /// Number of losing trades
    pub losing_trades: usize,
    /// Win rate (percentage)
    pub win_rate: f64,
    /// Sum of winning P&L
    pub gross_profit: f64,
    /// Sum of losing P&L, as a positive number
    pub gross_loss: f64,
    /// Net P&L
    pub net_profit: f64,
    /// Average trade P&L
    pub avg_trade_pnl: f64,
    /// Average winning trade
    pub avg_winner: f64,
    /// Average losing trade, as a positive number
    pub avg_loser: f64,
    /// Best trade
    pub best_trade: f64,
    /// Worst trade
    pub worst_trade: f64,
    /// Gross profit / gross loss
    pub profit_factor: f64,
    /// Profit factor was replaced by the cap
    pub profit_factor_capped: bool,
    /// Expected P&L per trade
    pub expectancy: f64,
    /// Average holding period (hours)
    pub avg_holding_hours: f64,
    /// Total commission paid
    pub total_commission: f64,
}

impl TradeStatistics {
    /// Calculate statistics from realized trades
    pub fn from_trades(trades: &[ClosedTrade], ratio_cap: f64) -> Self {
        let pnls: Vec<f64> = trades.iter().map(|t| t.realized_pnl).collect();
        let mut stats = Self::from_pnls(&pnls, ratio_cap);
        if !trades.is_empty() {
            stats.avg_holding_hours =
                trades.iter().map(ClosedTrade::holding_hours).sum::<f64>() / trades.len() as f64;
            stats.total_commission = trades.iter().map(|t| t.commission).sum();
        }
        stats
    }

    /// Calculate statistics from net P&L values alone
    pub fn from_pnls(pnls: &[f64], ratio_cap: f64) -> Self {
        let total_trades = pnls.len();
        if total_trades == 0 {
            return Self::default();
        }

        let winners: Vec<f64> = pnls.iter().copied().filter(|p| *p > 0.0).collect();
        let losers: Vec<f64> = pnls.iter().copied().filter(|p| *p <= 0.0).collect();

        let gross_profit: f64 = winners.iter().sum();
        let gross_loss: f64 = losers.iter().map(|p| p.abs()).sum();
        let net_profit: f64 = pnls.iter().sum();

        let win_rate = winners.len() as f64 / total_trades as f64 * 100.0;
        let avg_winner = if winners.is_empty() { 0.0 } else { gross_profit / winners.len() as f64 };
        let avg_loser = if losers.is_empty() { 0.0 } else { gross_loss / losers.len() as f64 };
        let (profit_factor, profit_factor_capped) = capped_ratio(gross_profit, gross_loss, ratio_cap);

        let expectancy = (win_rate / 100.0 * avg_winner) - ((1.0 - win_rate / 100.0) * avg_loser);

        Self {
            total_trades,
            winning_trades: winners.len(),
            losing_trades: losers.len(),
            win_rate,
            gross_profit,
            gross_loss,
            net_profit,
            avg_trade_pnl: net_profit / total_trades as f64,
            avg_winner,
            avg_loser,
            best_trade: pnls.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            worst_trade: pnls.iter().copied().fold(f64::INFINITY, f64::min),
            profit_factor,
            profit_factor_capped,
            expectancy,
            avg_holding_hours: 0.0,
            total_commission: 0.0,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
