//! Market regime detection and per-regime performance attribution.
//!
//! Classification is a single online pass: the label of candle `i` is
//! derived from candles `[i - lookback, i]` only. Consecutive identical
//! labels merge into [`RegimePeriod`]s that partition the candle timeline.
//! A trade belongs to the period containing its open instant.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::config::RegimeConfig;
use crate::context::RunContext;
use crate::error::{EngineError, Result, TemporalViolation};
use crate::ledger::ClosedTrade;
use crate::metrics::{mean, std_dev, TradeStatistics};
use crate::providers::PriceDataSource;
use crate::types::{Candle, DateRange, SimInstant, Timeframe};
use zero_common::Validate;

/// Candles classified between progress updates
const PROGRESS_EVERY: usize = 1000;

/// Closes needed before a window can be classified
const MIN_CLOSES: usize = 3;

/// Finite stand-in for an unbounded profit factor
const RATIO_CAP: f64 = 100.0;

// ============================================================================
// Regime Types
// ============================================================================

/// Market regime label
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MarketRegime {
    TrendingUp,
    TrendingDown,
    Ranging,
    HighVolatility,
    LowVolatility,
    Unknown,
}

impl MarketRegime {
    pub const ALL: [MarketRegime; 6] = [
        Self::TrendingUp,
        Self::TrendingDown,
        Self::Ranging,
        Self::HighVolatility,
        Self::LowVolatility,
        Self::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TrendingUp => "TRENDING_UP",
            Self::TrendingDown => "TRENDING_DOWN",
            Self::Ranging => "RANGING",
            Self::HighVolatility => "HIGH_VOLATILITY",
            Self::LowVolatility => "LOW_VOLATILITY",
            Self::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Label of one candle and the measurements behind it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeClassification {
    /// Candle timestamp
    pub instant: SimInstant,
    pub regime: MarketRegime,
    /// 0-100 distance of the deciding measurement past its boundary
    pub confidence: f64,
    /// Sample stdev of close-to-close returns (%)
    pub volatility_pct: f64,
    /// Regression slope / mean close (% per bar)
    pub trend_pct: f64,
    /// (max high - min low) / mean close (%)
    pub range_pct: f64,
}

/// Contiguous run of one regime.
///
/// Covers `[start, end)`, except the final period of a timeline which also
/// contains `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePeriod {
    pub regime: MarketRegime,
    pub start: SimInstant,
    pub end: SimInstant,
    /// Whether `end` belongs to this period
    pub end_inclusive: bool,
    /// Candles classified into this period
    pub candles: usize,
    /// Mean classification confidence
    pub confidence: f64,
}

impl RegimePeriod {
    /// Check if an instant falls inside the period
    pub fn contains(&self, instant: SimInstant) -> bool {
        instant >= self.start && (instant < self.end || (self.end_inclusive && instant == self.end))
    }
}

/// Change from one regime to the next
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimeTransition {
    pub from: MarketRegime,
    pub to: MarketRegime,
    pub at: SimInstant,
}

/// Trade performance inside one regime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegimePerformance {
    pub regime: MarketRegime,
    pub stats: TradeStatistics,
    /// Net P&L / |total net P&L| x 100
    pub contribution_pct: f64,
    /// Share of all attributed trades (%)
    pub trade_weight_pct: f64,
    /// Share of classified candles (%)
    pub time_pct: f64,
    /// Number of periods of this regime
    pub periods: usize,
}

/// Regime attribution warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RegimeWarning {
    /// One regime explains most of the profit
    Dominance { regime: MarketRegime, profit_share_pct: f64 },
    /// Too few trades to support the regime's contribution
    InsufficientSample {
        regime: MarketRegime,
        trades: usize,
        minimum: usize,
        contribution_pct: f64,
    },
    /// Regime loses money across a meaningful sample
    PersistentLoser { regime: MarketRegime, net_profit: f64, trades: usize },
}

impl std::fmt::Display for RegimeWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Dominance { regime, profit_share_pct } => {
                write!(f, "{} explains {:.1}% of profit", regime, profit_share_pct)
            }
            Self::InsufficientSample {
                regime,
                trades,
                minimum,
                contribution_pct,
            } => write!(
                f,
                "{} contributes {:.1}% from {} trades (minimum {})",
                regime, contribution_pct, trades, minimum
            ),
            Self::PersistentLoser {
                regime,
                net_profit,
                trades,
            } => write!(f, "{} lost {:.2} over {} trades", regime, net_profit, trades),
        }
    }
}

/// Regime analysis report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegimeReport {
    pub instrument: String,
    /// Candles classified
    pub candles: usize,
    /// Periods partitioning the candle timeline
    pub periods: Vec<RegimePeriod>,
    pub transitions: Vec<RegimeTransition>,
    /// Share of classified candles per regime (%)
    pub time_distribution: BTreeMap<MarketRegime, f64>,
    /// Per-regime performance, sorted by contribution descending
    pub performance: Vec<RegimePerformance>,
    /// Trades opened outside the classified timeline
    pub unattributed_trades: usize,
    /// Regime of the last candle
    pub current_regime: MarketRegime,
    pub warnings: Vec<RegimeWarning>,
}

impl RegimeReport {
    /// Performance of one regime, if it traded
    pub fn performance_of(&self, regime: MarketRegime) -> Option<&RegimePerformance> {
        self.performance.iter().find(|p| p.regime == regime)
    }
}

// ============================================================================
// Detector
// ============================================================================

/// Regime detector
#[derive(Debug, Clone)]
pub struct RegimeDetector {
    config: RegimeConfig,
}

impl RegimeDetector {
    /// Create a detector
    pub fn new(config: RegimeConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    pub fn config(&self) -> &RegimeConfig {
        &self.config
    }

    /// Classify the last candle of `window` from the window alone
    pub fn classify_window(&self, window: &[Candle]) -> RegimeClassification {
        let Some(last) = window.last() else {
            return unknown(SimInstant::default());
        };
        if window.len() < MIN_CLOSES {
            return unknown(last.timestamp);
        }

        let closes: Vec<f64> = window.iter().map(|c| c.close).collect();
        let mean_close = mean(&closes);
        if mean_close <= 0.0 {
            return unknown(last.timestamp);
        }

        let returns: Vec<f64> = closes
            .windows(2)
            .filter(|w| w[0] > 0.0)
            .map(|w| (w[1] / w[0] - 1.0) * 100.0)
            .collect();
        let volatility_pct = std_dev(&returns);
        let trend_pct = regression_slope(&closes) / mean_close * 100.0;
        let high = window.iter().map(|c| c.high).fold(f64::NEG_INFINITY, f64::max);
        let low = window.iter().map(|c| c.low).fold(f64::INFINITY, f64::min);
        let range_pct = (high - low) / mean_close * 100.0;

        let cfg = &self.config;
        let high_vol = cfg.volatility_threshold_pct * 1.5;
        let low_vol = cfg.volatility_threshold_pct * 0.5;

        let (regime, confidence) = if volatility_pct > high_vol {
            (MarketRegime::HighVolatility, margin(volatility_pct - high_vol, high_vol))
        } else if volatility_pct < low_vol {
            (MarketRegime::LowVolatility, margin(low_vol - volatility_pct, low_vol))
        } else if trend_pct.abs() > cfg.trend_threshold_pct {
            let regime = if trend_pct > 0.0 {
                MarketRegime::TrendingUp
            } else {
                MarketRegime::TrendingDown
            };
            (regime, margin(trend_pct.abs() - cfg.trend_threshold_pct, cfg.trend_threshold_pct))
        } else if range_pct < cfg.range_threshold_pct {
            (MarketRegime::Ranging, margin(cfg.range_threshold_pct - range_pct, cfg.range_threshold_pct))
        } else {
            (MarketRegime::Unknown, 0.0)
        };

        RegimeClassification {
            instant: last.timestamp,
            regime,
            confidence,
            volatility_pct,
            trend_pct,
            range_pct,
        }
    }

    /// Classify every candle using only the candles up to it
    pub fn classify(&self, candles: &[Candle]) -> Result<Vec<RegimeClassification>> {
        self.classify_with(candles, &RunContext::new())
    }

    fn classify_with(&self, candles: &[Candle], ctx: &RunContext) -> Result<Vec<RegimeClassification>> {
        check_order(candles)?;

        let total = candles.len();
        let mut out = Vec::with_capacity(total);
        for i in 0..total {
            let from = i.saturating_sub(self.config.lookback);
            out.push(self.classify_window(&candles[from..=i]));

            if (i + 1) % PROGRESS_EVERY == 0 {
                ctx.report("REGIME", i + 1, total, format!("{} candles classified", i + 1));
            }
        }
        Ok(out)
    }

    /// Merge consecutive identical labels into periods
    pub fn detect_periods(&self, candles: &[Candle]) -> Result<Vec<RegimePeriod>> {
        Ok(merge_periods(&self.classify(candles)?))
    }

    /// Classify `candles` and attribute `trades` to the regimes they opened in
    pub fn analyze(
        &self,
        instrument: &str,
        candles: &[Candle],
        trades: &[ClosedTrade],
        ctx: &RunContext,
    ) -> Result<RegimeReport> {
        if candles.is_empty() {
            return Err(EngineError::insufficient(format!("{} candles", instrument), 1, 0));
        }

        tracing::info!(
            run_id = %ctx.run_id(),
            instrument,
            candles = candles.len(),
            trades = trades.len(),
            "Regime analysis started"
        );

        let classifications = self.classify_with(candles, ctx)?;
        let periods = merge_periods(&classifications);
        let report = self.build_report(instrument, &classifications, periods, trades);

        for warning in &report.warnings {
            tracing::warn!(instrument, warning = %warning, "Regime warning");
        }
        tracing::info!(
            instrument,
            periods = report.periods.len(),
            current = %report.current_regime,
            "Regime analysis finished"
        );
        Ok(report)
    }

    /// Pull candles from a data source and run [`RegimeDetector::analyze`]
    pub fn detect_from_source(
        &self,
        source: &dyn PriceDataSource,
        instrument: &str,
        timeframe: Timeframe,
        range: &DateRange,
        trades: &[ClosedTrade],
        ctx: &RunContext,
    ) -> Result<RegimeReport> {
        let candles = source
            .candles(instrument, timeframe, range)
            .map_err(|e| EngineError::Strategy {
                instrument: instrument.to_string(),
                reason: format!("{} data source: {}", source.name(), e),
            })?;
        self.analyze(instrument, &candles, trades, ctx)
    }

    fn build_report(
        &self,
        instrument: &str,
        classifications: &[RegimeClassification],
        periods: Vec<RegimePeriod>,
        trades: &[ClosedTrade],
    ) -> RegimeReport {
        let total_candles = classifications.len();
        let mut time_distribution: BTreeMap<MarketRegime, f64> = BTreeMap::new();
        for c in classifications {
            *time_distribution.entry(c.regime).or_insert(0.0) += 1.0;
        }
        for share in time_distribution.values_mut() {
            *share = *share / total_candles as f64 * 100.0;
        }

        let transitions: Vec<RegimeTransition> = periods
            .windows(2)
            .map(|w| RegimeTransition {
                from: w[0].regime,
                to: w[1].regime,
                at: w[1].start,
            })
            .collect();

        let mut groups: BTreeMap<MarketRegime, Vec<ClosedTrade>> = BTreeMap::new();
        let mut unattributed = 0;
        for trade in trades {
            match regime_at(&periods, trade.opened_at) {
                Some(regime) => groups.entry(regime).or_default().push(trade.clone()),
                None => unattributed += 1,
            }
        }

        let attributed: usize = groups.values().map(Vec::len).sum();
        let total_net: f64 = groups.values().flatten().map(|t| t.realized_pnl).sum();
        let mut performance: Vec<RegimePerformance> = groups
            .into_iter()
            .map(|(regime, group)| {
                let stats = TradeStatistics::from_trades(&group, RATIO_CAP);
                RegimePerformance {
                    regime,
                    contribution_pct: if total_net.abs() > f64::EPSILON {
                        stats.net_profit / total_net.abs() * 100.0
                    } else {
                        0.0
                    },
                    trade_weight_pct: group.len() as f64 / attributed as f64 * 100.0,
                    time_pct: time_distribution.get(&regime).copied().unwrap_or(0.0),
                    periods: periods.iter().filter(|p| p.regime == regime).count(),
                    stats,
                }
            })
            .collect();
        performance.sort_by(|a, b| {
            b.contribution_pct
                .total_cmp(&a.contribution_pct)
                .then_with(|| a.regime.cmp(&b.regime))
        });

        RegimeReport {
            instrument: instrument.to_string(),
            candles: total_candles,
            current_regime: periods.last().map_or(MarketRegime::Unknown, |p| p.regime),
            warnings: self.warnings(&performance),
            periods,
            transitions,
            time_distribution,
            performance,
            unattributed_trades: unattributed,
        }
    }

    fn warnings(&self, performance: &[RegimePerformance]) -> Vec<RegimeWarning> {
        let cfg = &self.config;
        let mut warnings = Vec::new();

        let total_profit: f64 = performance.iter().map(|p| p.stats.net_profit.max(0.0)).sum();
        if total_profit > f64::EPSILON {
            for p in performance {
                let share = p.stats.net_profit.max(0.0) / total_profit * 100.0;
                if share > cfg.dominance_pct {
                    warnings.push(RegimeWarning::Dominance {
                        regime: p.regime,
                        profit_share_pct: share,
                    });
                }
            }
        }

        for p in performance {
            let trades = p.stats.total_trades;
            if trades < cfg.min_trades_per_regime && p.contribution_pct.abs() > p.trade_weight_pct {
                warnings.push(RegimeWarning::InsufficientSample {
                    regime: p.regime,
                    trades,
                    minimum: cfg.min_trades_per_regime,
                    contribution_pct: p.contribution_pct,
                });
            }
            if trades >= cfg.min_trades_per_regime && p.stats.net_profit < 0.0 {
                warnings.push(RegimeWarning::PersistentLoser {
                    regime: p.regime,
                    net_profit: p.stats.net_profit,
                    trades,
                });
            }
        }
        warnings
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn unknown(instant: SimInstant) -> RegimeClassification {
    RegimeClassification {
        instant,
        regime: MarketRegime::Unknown,
        confidence: 0.0,
        volatility_pct: 0.0,
        trend_pct: 0.0,
        range_pct: 0.0,
    }
}

/// Confidence from how far a measurement passed its boundary: 50 at the
/// boundary, 100 at twice the boundary distance.
fn margin(excess: f64, boundary: f64) -> f64 {
    if boundary <= 0.0 {
        return 50.0;
    }
    (50.0 + 50.0 * excess / boundary).clamp(50.0, 100.0)
}

/// Least-squares slope of values against their index
fn regression_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = mean(values);
    let (mut num, mut den) = (0.0, 0.0);
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    if den > 0.0 {
        num / den
    } else {
        0.0
    }
}

fn check_order(candles: &[Candle]) -> Result<()> {
    for (index, pair) in candles.windows(2).enumerate() {
        if pair[1].timestamp <= pair[0].timestamp {
            return Err(TemporalViolation::UnorderedSeries {
                index: index + 1,
                previous: pair[0].timestamp,
                next: pair[1].timestamp,
            }
            .into());
        }
    }
    Ok(())
}

/// Merge consecutive identical labels. Each period ends where the next one
/// starts; the last one ends at the final candle, inclusively.
pub fn merge_periods(classifications: &[RegimeClassification]) -> Vec<RegimePeriod> {
    let mut periods: Vec<RegimePeriod> = Vec::new();
    let mut confidence_sum = 0.0;

    for c in classifications {
        match periods.last_mut() {
            Some(current) if current.regime == c.regime => {
                current.candles += 1;
                confidence_sum += c.confidence;
            }
            _ => {
                if let Some(current) = periods.last_mut() {
                    current.end = c.instant;
                    current.confidence = confidence_sum / current.candles as f64;
                }
                periods.push(RegimePeriod {
                    regime: c.regime,
                    start: c.instant,
                    end: c.instant,
                    end_inclusive: false,
                    candles: 1,
                    confidence: 0.0,
                });
                confidence_sum = c.confidence;
            }
        }
    }

    if let (Some(current), Some(last)) = (periods.last_mut(), classifications.last()) {
        current.end = last.instant;
        current.end_inclusive = true;
        current.confidence = confidence_sum / current.candles as f64;
    }
    periods
}

/// Regime of the period containing `instant`
pub fn regime_at(periods: &[RegimePeriod], instant: SimInstant) -> Option<MarketRegime> {
    let index = periods.partition_point(|p| p.start <= instant);
    let period = periods.get(index.checked_sub(1)?)?;
    period.contains(instant).then_some(period.regime)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::PositionId;
    use crate::types::Direction;
    use chrono::{Duration, TimeZone, Utc};

    fn at(i: usize) -> SimInstant {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap() + Duration::hours(i as i64)
    }

    fn candle(i: usize, close: f64) -> Candle {
        Candle {
            timestamp: at(i),
            open: close,
            high: close * 1.0005,
            low: close * 0.9995,
            close,
            volume: 0.0,
        }
    }

    fn detector() -> RegimeDetector {
        RegimeDetector::new(RegimeConfig {
            lookback: 5,
            ..Default::default()
        })
        .unwrap()
    }

    /// Two steps forward, one back: ~0.5 %/bar drift with ~0.8 % volatility
    fn stepping(i: usize, up: bool) -> f64 {
        let offset = 0.9 * (i / 2) as f64 + if i % 2 == 1 { 1.2 } else { 0.0 };
        if up {
            100.0 + offset
        } else {
            100.0 - offset
        }
    }

    /// Stepping uptrend, then a violent zig-zag
    fn flip_series(flip_at: usize, len: usize) -> Vec<Candle> {
        (0..len)
            .map(|i| {
                if i < flip_at {
                    candle(i, stepping(i, true))
                } else if i % 2 == 0 {
                    candle(i, 110.0)
                } else {
                    candle(i, 95.0)
                }
            })
            .collect()
    }

    fn trade(opened: usize, closed: usize, pnl: f64) -> ClosedTrade {
        ClosedTrade {
            position_id: PositionId(opened as u64),
            instrument: "EURUSD".into(),
            direction: Direction::Long,
            entry_price: 1.0,
            exit_price: 1.0,
            size: 1.0,
            opened_at: at(opened),
            closed_at: at(closed),
            gross_pnl: pnl,
            commission: 0.0,
            realized_pnl: pnl,
        }
    }

    #[test]
    fn test_short_window_is_unknown() {
        let c = detector().classify_window(&[candle(0, 1.0), candle(1, 1.1)]);
        assert_eq!(c.regime, MarketRegime::Unknown);
    }

    #[test]
    fn test_precedence_volatility_first() {
        let d = detector();
        // Zig-zag with a strong upward drift is still high volatility
        let window: Vec<Candle> = (0..6)
            .map(|i| candle(i, if i % 2 == 0 { 100.0 + i as f64 * 3.0 } else { 90.0 + i as f64 * 3.0 }))
            .collect();
        assert_eq!(d.classify_window(&window).regime, MarketRegime::HighVolatility);

        let up: Vec<Candle> = (0..6).map(|i| candle(i, stepping(i, true))).collect();
        let c = d.classify_window(&up);
        assert_eq!(c.regime, MarketRegime::TrendingUp);
        assert!(c.volatility_pct > 0.5 && c.volatility_pct < 1.5);
        assert!(c.trend_pct > 0.1);

        let down: Vec<Candle> = (0..6).map(|i| candle(i, stepping(i, false))).collect();
        assert_eq!(d.classify_window(&down).regime, MarketRegime::TrendingDown);

        // Oscillating without drift inside a narrow band
        let range: Vec<Candle> = (0..6).map(|i| candle(i, if i % 2 == 0 { 100.0 } else { 100.8 })).collect();
        let c = d.classify_window(&range);
        assert_eq!(c.regime, MarketRegime::Ranging);
        assert!(c.range_pct < 3.0);
    }

    #[test]
    fn test_flat_market_is_low_volatility() {
        let flat: Vec<Candle> = (0..6).map(|i| candle(i, 100.0)).collect();
        assert_eq!(detector().classify_window(&flat).regime, MarketRegime::LowVolatility);
    }

    #[test]
    fn test_periods_partition_timeline() {
        let candles = flip_series(10, 20);
        let periods = detector().detect_periods(&candles).unwrap();

        assert_eq!(periods.first().unwrap().start, candles[0].timestamp);
        assert_eq!(periods.last().unwrap().end, candles[19].timestamp);
        assert!(periods.last().unwrap().end_inclusive);
        for pair in periods.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
            assert_ne!(pair[0].regime, pair[1].regime);
        }
        assert_eq!(periods.iter().map(|p| p.candles).sum::<usize>(), 20);
        for c in &candles {
            assert_eq!(periods.iter().filter(|p| p.contains(c.timestamp)).count(), 1);
        }
    }

    #[test]
    fn test_trade_keeps_regime_at_open() {
        let candles = flip_series(10, 20);
        let d = detector();
        let classes = d.classify(&candles).unwrap();
        assert_eq!(classes[9].regime, MarketRegime::TrendingUp);
        assert_eq!(classes[10].regime, MarketRegime::HighVolatility);

        // Opens on the last trending candle, closes deep in the volatile phase
        let report = d
            .analyze("EURUSD", &candles, &[trade(9, 15, 50.0)], &RunContext::new())
            .unwrap();
        assert_eq!(report.performance.len(), 1);
        assert_eq!(report.performance[0].regime, MarketRegime::TrendingUp);
    }

    #[test]
    fn test_unordered_candles_are_rejected() {
        let mut candles = flip_series(5, 8);
        candles.swap(3, 4);
        let err = detector().classify(&candles).unwrap_err();
        assert!(err.is_temporal());
    }

    #[test]
    fn test_dominance_and_loser_warnings() {
        let candles = flip_series(10, 40);
        let mut trades: Vec<ClosedTrade> = (0..5).map(|i| trade(3 + i, 9, 100.0)).collect();
        trades.extend((0..5).map(|i| trade(12 + i * 2, 39, -10.0)));
        let report = detector()
            .analyze("EURUSD", &candles, &trades, &RunContext::new())
            .unwrap();

        assert!(report.warnings.iter().any(|w| matches!(
            w,
            RegimeWarning::Dominance { regime: MarketRegime::TrendingUp, .. }
        )));
        assert!(report.warnings.iter().any(|w| matches!(
            w,
            RegimeWarning::PersistentLoser { regime: MarketRegime::HighVolatility, .. }
        )));
        assert_eq!(report.unattributed_trades, 0);
        let share: f64 = report.time_distribution.values().sum();
        assert!((share - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_trade_outside_timeline_is_unattributed() {
        let candles = flip_series(5, 8);
        let report = detector()
            .analyze("EURUSD", &candles, &[trade(50, 51, 1.0)], &RunContext::new())
            .unwrap();
        assert_eq!(report.unattributed_trades, 1);
        assert!(report.performance.is_empty());
    }
}
