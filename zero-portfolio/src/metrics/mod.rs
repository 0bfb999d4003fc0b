//! Portfolio performance metrics.
//!
//! Computed from realized trades, the ledger equity curve and the initial
//! balance. The equity curve is resampled to one value per calendar day
//! (last snapshot of the day) before period returns are taken, so
//! `periods_per_year` is a trading-day count.

mod attribution;
mod stats;

pub use attribution::{attribute, correlation_impact, diversification_ratio, InstrumentAttribution};
pub use stats::{
    capped_ratio, mean, period_returns, population_variance, sharpe_ratio, sortino_ratio, std_dev,
    DrawdownProfile, TradeStatistics,
};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::config::MetricsConfig;
use crate::error::Result;
use crate::ledger::ClosedTrade;
use crate::types::SimInstant;
use zero_common::Validate;

/// Complete portfolio performance report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PortfolioMetrics {
    /// Starting balance
    pub initial_balance: f64,
    /// Equity at the end of the curve
    pub final_equity: f64,
    /// Total return (%)
    pub total_return_pct: f64,
    /// Compound annual growth rate (%)
    pub annualized_return_pct: f64,
    /// Standard deviation of daily returns (%)
    pub volatility_pct: f64,
    /// Annualised volatility (%)
    pub annualized_volatility_pct: f64,
    /// Drawdown profile of the daily equity series
    pub drawdown: DrawdownProfile,
    /// Annualised Sharpe ratio
    pub sharpe_ratio: f64,
    /// Annualised Sortino ratio
    pub sortino_ratio: f64,
    /// Annualised return / max drawdown
    pub calmar_ratio: f64,
    /// Annualised information ratio against the benchmark, when one is given
    pub information_ratio: Option<f64>,
    /// At least one ratio hit the finite cap instead of being unbounded
    pub ratios_capped: bool,
    /// Number of daily return periods
    pub periods: usize,
    /// Trade statistics
    pub trades: TradeStatistics,
    /// Per-instrument attribution
    pub attribution: Vec<InstrumentAttribution>,
    /// HHI-based diversification of contributions (%)
    pub diversification_ratio: f64,
    /// Variance reduction from combining instruments (%)
    pub correlation_impact_pct: f64,
}

/// Portfolio metrics calculator
#[derive(Debug, Clone)]
pub struct MetricsCalculator {
    config: MetricsConfig,
}

impl MetricsCalculator {
    /// Create a calculator
    pub fn new(config: MetricsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    pub fn config(&self) -> &MetricsConfig {
        &self.config
    }

    /// Risk-free rate per period
    pub fn risk_free_per_period(&self) -> f64 {
        self.config.risk_free_rate / self.config.periods_per_year
    }

    /// Calculate the full report.
    ///
    /// `benchmark` holds per-period (daily) benchmark returns aligned with
    /// the resampled equity curve.
    pub fn calculate(
        &self,
        trades: &[ClosedTrade],
        equity_curve: &[(SimInstant, f64)],
        initial_balance: f64,
        benchmark: Option<&[f64]>,
    ) -> PortfolioMetrics {
        let cap = self.config.ratio_cap;
        let ppy = self.config.periods_per_year;
        let rf = self.risk_free_per_period();

        let daily = daily_equity(equity_curve);
        let mut series = Vec::with_capacity(daily.len() + 1);
        series.push(initial_balance);
        series.extend(daily.iter().map(|(_, equity)| *equity));

        let final_equity = series.last().copied().unwrap_or(initial_balance);
        let total_return_pct = if initial_balance > 0.0 {
            (final_equity / initial_balance - 1.0) * 100.0
        } else {
            0.0
        };

        let annualized_return_pct = cagr(initial_balance, final_equity, equity_curve, total_return_pct);

        let returns = period_returns(&series);
        let volatility = std_dev(&returns);
        let drawdown = DrawdownProfile::from_equity(&series);

        let (sharpe, sharpe_capped) = sharpe_ratio(&returns, rf, ppy, cap);
        let (sortino, sortino_capped) = sortino_ratio(&returns, rf, ppy, cap);
        let (calmar, calmar_capped) = capped_ratio(annualized_return_pct, drawdown.max_drawdown_pct, cap);

        let mut ratios_capped = sharpe_capped || sortino_capped || calmar_capped;
        let information_ratio = benchmark.and_then(|bench| {
            let n = bench.len().min(returns.len());
            if n < 2 {
                return None;
            }
            let active: Vec<f64> = returns[..n].iter().zip(&bench[..n]).map(|(r, b)| r - b).collect();
            let (ratio, capped) = sharpe_ratio(&active, 0.0, ppy, cap);
            ratios_capped |= capped;
            Some(ratio)
        });

        let trade_stats = TradeStatistics::from_trades(trades, cap);
        ratios_capped |= trade_stats.profit_factor_capped;
        let attribution = attribute(trades, cap);

        let metrics = PortfolioMetrics {
            initial_balance,
            final_equity,
            total_return_pct,
            annualized_return_pct,
            volatility_pct: volatility * 100.0,
            annualized_volatility_pct: volatility * ppy.sqrt() * 100.0,
            drawdown,
            sharpe_ratio: sharpe,
            sortino_ratio: sortino,
            calmar_ratio: calmar,
            information_ratio,
            ratios_capped,
            periods: returns.len(),
            trades: trade_stats,
            diversification_ratio: diversification_ratio(&attribution),
            correlation_impact_pct: correlation_impact(trades),
            attribution,
        };

        tracing::info!(
            total_return_pct = metrics.total_return_pct,
            sharpe = metrics.sharpe_ratio,
            max_drawdown_pct = metrics.drawdown.max_drawdown_pct,
            trades = metrics.trades.total_trades,
            "Portfolio metrics calculated"
        );
        metrics
    }
}

/// Last equity of each calendar day, in date order
pub fn daily_equity(curve: &[(SimInstant, f64)]) -> Vec<(NaiveDate, f64)> {
    let mut daily: Vec<(NaiveDate, f64)> = Vec::new();
    for (instant, equity) in curve {
        let date = instant.date_naive();
        match daily.last_mut() {
            Some((last, value)) if *last == date => *value = *equity,
            _ => daily.push((date, *equity)),
        }
    }
    daily
}

fn cagr(initial: f64, final_equity: f64, curve: &[(SimInstant, f64)], total_return_pct: f64) -> f64 {
    let (Some((start, _)), Some((end, _))) = (curve.first(), curve.last()) else {
        return 0.0;
    };
    let years = (*end - *start).num_seconds() as f64 / (365.25 * 86_400.0);
    if years < 1.0 / 365.25 || initial <= 0.0 {
        return total_return_pct;
    }
    if final_equity <= 0.0 {
        return -100.0;
    }
    ((final_equity / initial).powf(1.0 / years) - 1.0) * 100.0
}

// ============================================================================
// Tests
// ============================================================================
