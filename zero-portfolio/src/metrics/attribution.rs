//! Per-instrument performance attribution.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::stats::{population_variance, TradeStatistics};
use crate::ledger::ClosedTrade;

/// Contribution of one instrument to the portfolio result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentAttribution {
    /// Instrument
    pub instrument: String,
    /// Trade statistics of this instrument
    pub stats: TradeStatistics,
    /// Net P&L / |total net P&L| x 100
    pub contribution_pct: f64,
    /// Share of all trades (%)
    pub trade_weight_pct: f64,
}

/// Group trades by instrument, sorted by contribution descending (ties by name)
pub fn attribute(trades: &[ClosedTrade], ratio_cap: f64) -> Vec<InstrumentAttribution> {
    let mut groups: BTreeMap<&str, Vec<ClosedTrade>> = BTreeMap::new();
    for trade in trades {
        groups.entry(trade.instrument.as_str()).or_default().push(trade.clone());
    }

    let total_net: f64 = trades.iter().map(|t| t.realized_pnl).sum();
    let total_trades = trades.len();

    let mut rows: Vec<InstrumentAttribution> = groups
        .into_iter()
        .map(|(instrument, group)| {
            let stats = TradeStatistics::from_trades(&group, ratio_cap);
            let contribution_pct = if total_net.abs() > f64::EPSILON {
                stats.net_profit / total_net.abs() * 100.0
            } else {
                0.0
            };
            InstrumentAttribution {
                instrument: instrument.to_string(),
                trade_weight_pct: group.len() as f64 / total_trades as f64 * 100.0,
                contribution_pct,
                stats,
            }
        })
        .collect();

    rows.sort_by(|a, b| {
        b.contribution_pct
            .total_cmp(&a.contribution_pct)
            .then_with(|| a.instrument.cmp(&b.instrument))
    });
    rows
}

/// Effective number of contributors relative to the actual number, in
/// percent. Based on the Herfindahl-Hirschman index of absolute contribution
/// shares: an even N-way split scores 100, full concentration scores 100/N.
/// Fewer than two instruments score 0.
pub fn diversification_ratio(attribution: &[InstrumentAttribution]) -> f64 {
    let n = attribution.len();
    if n < 2 {
        return 0.0;
    }
    let total: f64 = attribution.iter().map(|a| a.stats.net_profit.abs()).sum();
    if total <= f64::EPSILON {
        return 0.0;
    }
    let hhi: f64 = attribution
        .iter()
        .map(|a| (a.stats.net_profit.abs() / total).powi(2))
        .sum();
    (1.0 / hhi) / n as f64 * 100.0
}

/// Variance reduction (%) of the combined daily realized P&L versus the sum
/// of the standalone instrument variances. Negative when instruments
/// amplify each other.
pub fn correlation_impact(trades: &[ClosedTrade]) -> f64 {
    let mut daily: BTreeMap<&str, BTreeMap<NaiveDate, f64>> = BTreeMap::new();
    let mut dates: BTreeSet<NaiveDate> = BTreeSet::new();
    for trade in trades {
        let date = trade.closed_at.date_naive();
        dates.insert(date);
        *daily
            .entry(trade.instrument.as_str())
            .or_default()
            .entry(date)
            .or_insert(0.0) += trade.realized_pnl;
    }
    if daily.len() < 2 || dates.len() < 2 {
        return 0.0;
    }

    let series: Vec<Vec<f64>> = daily
        .values()
        .map(|by_date| dates.iter().map(|d| by_date.get(d).copied().unwrap_or(0.0)).collect())
        .collect();
    let combined: Vec<f64> = (0..dates.len())
        .map(|i| series.iter().map(|s| s[i]).sum())
        .collect();

    let standalone: f64 = series.iter().map(|s| population_variance(s)).sum();
    if standalone <= f64::EPSILON {
        return 0.0;
    }
    (1.0 - population_variance(&combined) / standalone) * 100.0
}
