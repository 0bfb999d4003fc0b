//! Rolling cross-instrument correlation.
//!
//! Keeps a bounded, time-stamped return history per instrument and builds
//! pairwise Pearson matrices from overlapping observations. A matrix computed
//! as of instant T only reads returns stamped at or before T.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};

use crate::config::CorrelationConfig;
use crate::error::{Result, TemporalViolation};
use crate::types::SimInstant;
use zero_common::Validate;

// ============================================================================
// Types
// ============================================================================

/// Strength bucket of |r|
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CorrelationStrength {
    Strong,
    Moderate,
    Weak,
}

/// One off-diagonal pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationPair {
    /// First instrument (sorted order)
    pub first: String,
    /// Second instrument
    pub second: String,
    /// Pearson correlation
    pub correlation: f64,
    /// Strength bucket
    pub strength: CorrelationStrength,
}

/// Symmetric N x N correlation matrix with unit diagonal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationMatrix {
    /// Instruments in row order (sorted)
    pub instruments: Vec<String>,
    /// Row-major values
    pub values: Vec<Vec<f64>>,
    /// Cut-off instant used, if any data existed
    pub as_of: Option<SimInstant>,
}

impl CorrelationMatrix {
    /// Correlation between two instruments
    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.instruments.iter().position(|x| x == a)?;
        let j = self.instruments.iter().position(|x| x == b)?;
        Some(self.values[i][j])
    }

    /// Number of instruments
    pub fn len(&self) -> usize {
        self.instruments.len()
    }

    /// Whether the matrix has no instruments
    pub fn is_empty(&self) -> bool {
        self.instruments.is_empty()
    }

    /// Off-diagonal (i < j) values
    pub fn off_diagonal(&self) -> impl Iterator<Item = (usize, usize, f64)> + '_ {
        let n = self.instruments.len();
        (0..n).flat_map(move |i| ((i + 1)..n).map(move |j| (i, j, self.values[i][j])))
    }

    /// Mean |r| over off-diagonal pairs (0 with fewer than two instruments)
    pub fn mean_abs_correlation(&self) -> f64 {
        let (sum, count) = self
            .off_diagonal()
            .fold((0.0, 0usize), |(s, c), (_, _, r)| (s + r.abs(), c + 1));
        if count == 0 {
            0.0
        } else {
            sum / count as f64
        }
    }

    /// 100 x (1 - mean |r|); a single instrument scores 100
    pub fn diversification_score(&self) -> f64 {
        if self.instruments.len() < 2 {
            return 100.0;
        }
        100.0 * (1.0 - self.mean_abs_correlation())
    }

    fn same_values(&self, other: &Self) -> bool {
        self.instruments == other.instruments && self.values == other.values
    }
}

/// Pair whose correlation moved by at least the shift threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationShift {
    pub first: String,
    pub second: String,
    pub previous: f64,
    pub current: f64,
    /// current - previous
    pub delta: f64,
    /// Cut-off instant of the newer matrix
    pub as_of: Option<SimInstant>,
}

// ============================================================================
// Analyzer
// ============================================================================

/// Correlation analyzer
#[derive(Debug, Clone)]
pub struct CorrelationAnalyzer {
    config: CorrelationConfig,
    returns: BTreeMap<String, VecDeque<(SimInstant, f64)>>,
    history: VecDeque<CorrelationMatrix>,
    /// Latest computation matched the stored latest matrix
    last_recompute_identical: bool,
}

impl CorrelationAnalyzer {
    /// Create an analyzer
    pub fn new(config: CorrelationConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            returns: BTreeMap::new(),
            history: VecDeque::new(),
            last_recompute_identical: false,
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &CorrelationConfig {
        &self.config
    }

    /// Make an instrument part of every matrix, even before it has returns
    pub fn register_instrument(&mut self, instrument: impl Into<String>) {
        self.returns.entry(instrument.into()).or_default();
    }

    /// Instruments known to the analyzer, sorted
    pub fn instruments(&self) -> Vec<String> {
        self.returns.keys().cloned().collect()
    }

    /// Append a return observation.
    ///
    /// Observations of one instrument must arrive in strictly increasing
    /// instant order. The oldest observation is evicted beyond `max_history`.
    pub fn add_return(&mut self, instrument: &str, instant: SimInstant, value: f64) -> Result<()> {
        let max_history = self.config.max_history;
        let series = self.returns.entry(instrument.to_string()).or_default();

        if let Some(&(previous, _)) = series.back() {
            if instant <= previous {
                return Err(TemporalViolation::UnorderedSeries {
                    index: series.len(),
                    previous,
                    next: instant,
                }
                .into());
            }
        }

        series.push_back((instant, value));
        while series.len() > max_history {
            series.pop_front();
        }
        Ok(())
    }

    /// Observations retained for an instrument
    pub fn observation_count(&self, instrument: &str) -> usize {
        self.returns.get(instrument).map_or(0, VecDeque::len)
    }

    /// Latest observation instant across all instruments
    pub fn latest_instant(&self) -> Option<SimInstant> {
        self.returns
            .values()
            .filter_map(|s| s.back().map(|(t, _)| *t))
            .max()
    }

    /// Compute the matrix over every retained observation and keep it in the
    /// history.
    pub fn compute_matrix(&mut self) -> CorrelationMatrix {
        match self.latest_instant() {
            Some(as_of) => self.compute_matrix_at(as_of),
            None => {
                let matrix = self.build_matrix(None);
                self.remember(matrix.clone());
                matrix
            }
        }
    }

    /// Compute the matrix from observations stamped at or before `as_of` and
    /// keep it in the history.
    pub fn compute_matrix_at(&mut self, as_of: SimInstant) -> CorrelationMatrix {
        let matrix = self.build_matrix(Some(as_of));
        self.remember(matrix.clone());
        matrix
    }

    /// Pairwise correlation as of an instant, without touching the history
    pub fn correlation_between(&self, a: &str, b: &str, as_of: SimInstant) -> f64 {
        if a == b {
            return 1.0;
        }
        match (self.returns.get(a), self.returns.get(b)) {
            (Some(sa), Some(sb)) => self.pair_correlation(sa, sb, Some(as_of)),
            _ => 0.0,
        }
    }

    /// Strongest |r| between `instrument` and any of `others`, as of an
    /// instant. Ties keep the first instrument in `others` order.
    pub fn max_correlation_with(
        &self,
        instrument: &str,
        others: &[String],
        as_of: SimInstant,
    ) -> Option<(String, f64)> {
        let mut best: Option<(String, f64)> = None;
        for other in others.iter().filter(|o| o.as_str() != instrument) {
            let r = self.correlation_between(instrument, other, as_of);
            let better = match &best {
                Some((_, current)) => r.abs() > current.abs(),
                None => true,
            };
            if better {
                best = Some((other.clone(), r));
            }
        }
        best
    }

    /// Strength bucket for a correlation value
    pub fn classify(&self, r: f64) -> CorrelationStrength {
        let abs = r.abs();
        if abs >= self.config.strong_threshold {
            CorrelationStrength::Strong
        } else if abs < self.config.weak_threshold {
            CorrelationStrength::Weak
        } else {
            CorrelationStrength::Moderate
        }
    }

    /// Classified off-diagonal pairs of a matrix, strongest first
    pub fn correlated_pairs(&self, matrix: &CorrelationMatrix) -> Vec<CorrelationPair> {
        let mut pairs: Vec<CorrelationPair> = matrix
            .off_diagonal()
            .map(|(i, j, r)| CorrelationPair {
                first: matrix.instruments[i].clone(),
                second: matrix.instruments[j].clone(),
                correlation: r,
                strength: self.classify(r),
            })
            .collect();
        pairs.sort_by(|a, b| {
            b.correlation
                .abs()
                .total_cmp(&a.correlation.abs())
                .then_with(|| a.first.cmp(&b.first))
                .then_with(|| a.second.cmp(&b.second))
        });
        pairs
    }

    /// Diversification score of the latest matrix (100 before any matrix)
    pub fn diversification_score(&self) -> f64 {
        self.history
            .back()
            .map_or(100.0, CorrelationMatrix::diversification_score)
    }

    /// Retained matrices, oldest first
    pub fn history(&self) -> impl Iterator<Item = &CorrelationMatrix> {
        self.history.iter()
    }

    /// Latest matrix
    pub fn latest_matrix(&self) -> Option<&CorrelationMatrix> {
        self.history.back()
    }

    /// Pairs whose correlation moved by at least the shift threshold between
    /// the two latest computations.
    ///
    /// Empty after a recompute that reproduced the latest matrix.
    pub fn detect_regime_shift(&self) -> Vec<CorrelationShift> {
        let n = self.history.len();
        if n < 2 || self.last_recompute_identical {
            return Vec::new();
        }
        let previous = &self.history[n - 2];
        let current = &self.history[n - 1];

        let mut shifts = Vec::new();
        for (i, j, now) in current.off_diagonal() {
            let (a, b) = (&current.instruments[i], &current.instruments[j]);
            let Some(before) = previous.get(a, b) else {
                continue;
            };
            let delta = now - before;
            if delta.abs() >= self.config.shift_threshold {
                shifts.push(CorrelationShift {
                    first: a.clone(),
                    second: b.clone(),
                    previous: before,
                    current: now,
                    delta,
                    as_of: current.as_of,
                });
            }
        }

        if !shifts.is_empty() {
            tracing::info!(pairs = shifts.len(), "Correlation regime shift detected");
        }
        shifts
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn remember(&mut self, matrix: CorrelationMatrix) {
        self.last_recompute_identical = self.history.back().is_some_and(|last| last.same_values(&matrix));
        if self.last_recompute_identical {
            return;
        }
        self.history.push_back(matrix);
        while self.history.len() > self.config.matrix_history {
            self.history.pop_front();
        }
    }

    fn build_matrix(&self, as_of: Option<SimInstant>) -> CorrelationMatrix {
        let instruments: Vec<String> = self.returns.keys().cloned().collect();
        let series: Vec<&VecDeque<(SimInstant, f64)>> = self.returns.values().collect();
        let n = instruments.len();

        let mut values = vec![vec![0.0; n]; n];
        for i in 0..n {
            values[i][i] = 1.0;
            for j in (i + 1)..n {
                let r = self.pair_correlation(series[i], series[j], as_of);
                values[i][j] = r;
                values[j][i] = r;
            }
        }

        tracing::debug!(instruments = n, as_of = ?as_of, "Correlation matrix computed");
        CorrelationMatrix {
            instruments,
            values,
            as_of,
        }
    }

    /// Pearson r over the most recent `period` shared instants
    fn pair_correlation(
        &self,
        a: &VecDeque<(SimInstant, f64)>,
        b: &VecDeque<(SimInstant, f64)>,
        as_of: Option<SimInstant>,
    ) -> f64 {
        let visible = |t: &SimInstant| as_of.map_or(true, |cut| *t <= cut);
        let lookup: BTreeMap<SimInstant, f64> =
            a.iter().filter(|(t, _)| visible(t)).copied().collect();

        let overlap: Vec<(f64, f64)> = b
            .iter()
            .filter(|(t, _)| visible(t))
            .filter_map(|(t, vb)| lookup.get(t).map(|va| (*va, *vb)))
            .collect();

        let start = overlap.len().saturating_sub(self.config.period);
        let window = &overlap[start..];
        if window.len() < self.config.min_observations {
            return 0.0;
        }
        pearson(window)
    }
}

/// Pearson correlation of paired samples; 0 when either side has no variance
pub fn pearson(pairs: &[(f64, f64)]) -> f64 {
    if pairs.len() < 2 {
        return 0.0;
    }
    let n = pairs.len() as f64;
    let mean_a = pairs.iter().map(|(a, _)| a).sum::<f64>() / n;
    let mean_b = pairs.iter().map(|(_, b)| b).sum::<f64>() / n;

    let mut cov = 0.0;
    let mut var_a = 0.0;
    let mut var_b = 0.0;
    for (a, b) in pairs {
        let da = a - mean_a;
        let db = b - mean_b;
        cov += da * db;
        var_a += da * da;
        var_b += db * db;
    }

    if var_a <= f64::EPSILON * n || var_b <= f64::EPSILON * n {
        return 0.0;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};

    fn day(n: i64) -> SimInstant {
        Utc.with_ymd_and_hms(2024, 1, 1, 23, 59, 59).unwrap() + Duration::days(n)
    }

    fn analyzer() -> CorrelationAnalyzer {
        let config = CorrelationConfig {
            period: 10,
            min_observations: 3,
            ..Default::default()
        };
        CorrelationAnalyzer::new(config).unwrap()
    }

    fn feed(analyzer: &mut CorrelationAnalyzer, instrument: &str, values: &[f64]) {
        for (i, v) in values.iter().enumerate() {
            analyzer.add_return(instrument, day(i as i64), *v).unwrap();
        }
    }

    #[test]
    fn test_pearson_perfect_and_inverse() {
        let up: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 2.0 * i as f64 + 1.0)).collect();
        assert!((pearson(&up) - 1.0).abs() < 1e-12);
        let down: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, -(i as f64))).collect();
        assert!((pearson(&down) + 1.0).abs() < 1e-12);
        let flat: Vec<(f64, f64)> = (0..5).map(|i| (i as f64, 3.0)).collect();
        assert_eq!(pearson(&flat), 0.0);
    }

    #[test]
    fn test_matrix_is_symmetric_with_unit_diagonal() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02, 0.015, 0.003, -0.007]);
        feed(&mut a, "GBPUSD", &[0.012, -0.018, 0.01, 0.004, -0.009]);
        feed(&mut a, "USDJPY", &[-0.01, 0.02, -0.012, 0.0, 0.008]);

        let m = a.compute_matrix();
        assert_eq!(m.instruments, vec!["EURUSD", "GBPUSD", "USDJPY"]);
        for i in 0..3 {
            assert_eq!(m.values[i][i], 1.0);
            for j in 0..3 {
                assert_eq!(m.values[i][j], m.values[j][i]);
            }
        }
        assert!(m.get("EURUSD", "GBPUSD").unwrap() > 0.9);
        assert!(m.get("EURUSD", "USDJPY").unwrap() < -0.9);
        assert_eq!(a.classify(m.get("EURUSD", "GBPUSD").unwrap()), CorrelationStrength::Strong);
    }

    #[test]
    fn test_compute_matrix_is_idempotent() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02, 0.015, 0.003]);
        feed(&mut a, "GBPUSD", &[0.02, -0.01, 0.011, -0.004]);

        let first = a.compute_matrix();
        let second = a.compute_matrix();
        assert_eq!(first, second);
        assert_eq!(a.history().count(), 1);
    }

    #[test]
    fn test_matrix_at_ignores_future_returns() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02, 0.015, 0.003, 0.5]);
        feed(&mut a, "GBPUSD", &[0.01, -0.02, 0.015, 0.003, -0.5]);

        let past = a.compute_matrix_at(day(3));
        assert!((past.get("EURUSD", "GBPUSD").unwrap() - 1.0).abs() < 1e-9);
        assert_eq!(past.as_of, Some(day(3)));

        let now = a.compute_matrix();
        assert!(now.get("EURUSD", "GBPUSD").unwrap() < past.get("EURUSD", "GBPUSD").unwrap());
    }

    #[test]
    fn test_insufficient_overlap_is_zero() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02]);
        feed(&mut a, "GBPUSD", &[0.01, -0.02]);
        let m = a.compute_matrix();
        assert_eq!(m.get("EURUSD", "GBPUSD"), Some(0.0));
        assert!((m.diversification_score() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_unordered_returns_rejected() {
        let mut a = analyzer();
        a.add_return("EURUSD", day(2), 0.01).unwrap();
        let err = a.add_return("EURUSD", day(1), 0.01).unwrap_err();
        assert!(err.is_temporal());
    }

    #[test]
    fn test_history_is_bounded() {
        let config = CorrelationConfig {
            max_history: 3,
            period: 3,
            min_observations: 2,
            ..Default::default()
        };
        let mut a = CorrelationAnalyzer::new(config).unwrap();
        feed(&mut a, "EURUSD", &[0.1, 0.2, 0.3, 0.4, 0.5]);
        assert_eq!(a.observation_count("EURUSD"), 3);
    }

    #[test]
    fn test_single_instrument_scores_full_diversification() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, 0.02, 0.03]);
        let m = a.compute_matrix();
        assert_eq!(m.len(), 1);
        assert!((a.diversification_score() - 100.0).abs() < 1e-12);
    }

    #[test]
    fn test_regime_shift_between_latest_matrices() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02, 0.015, 0.003, -0.01]);
        feed(&mut a, "GBPUSD", &[0.01, -0.02, 0.015, 0.003, -0.01]);
        a.compute_matrix();
        assert!(a.detect_regime_shift().is_empty());

        for (i, (x, y)) in [(0.02, -0.03), (-0.03, 0.04), (0.04, -0.05), (-0.05, 0.05)]
            .iter()
            .enumerate()
        {
            let t = day(10 + i as i64);
            a.add_return("EURUSD", t, *x).unwrap();
            a.add_return("GBPUSD", t, *y).unwrap();
        }
        a.compute_matrix();

        let shifts = a.detect_regime_shift();
        assert_eq!(shifts.len(), 1);
        assert!(shifts[0].delta < 0.0);
    }

    #[test]
    fn test_identical_recompute_reports_no_shift() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02, 0.015, 0.003, -0.01]);
        feed(&mut a, "GBPUSD", &[0.01, -0.02, 0.015, 0.003, -0.01]);
        a.compute_matrix();
        for (i, (x, y)) in [(0.02, -0.03), (-0.03, 0.04), (0.04, -0.05), (-0.05, 0.05)]
            .iter()
            .enumerate()
        {
            let t = day(10 + i as i64);
            a.add_return("EURUSD", t, *x).unwrap();
            a.add_return("GBPUSD", t, *y).unwrap();
        }
        a.compute_matrix();
        assert_eq!(a.detect_regime_shift().len(), 1);

        // No new returns: the two latest computations agree
        a.compute_matrix();
        assert!(a.detect_regime_shift().is_empty());
        assert_eq!(a.history().count(), 2);

        // A fresh observation that moves the matrix re-enables detection
        a.add_return("EURUSD", day(20), 0.06).unwrap();
        a.add_return("GBPUSD", day(20), 0.06).unwrap();
        a.compute_matrix();
        assert_eq!(a.history().count(), 3);
        assert!(a.detect_regime_shift().iter().all(|s| s.as_of == Some(day(20))));
    }

    #[test]
    fn test_max_correlation_with() {
        let mut a = analyzer();
        feed(&mut a, "EURUSD", &[0.01, -0.02, 0.015, 0.003]);
        feed(&mut a, "GBPUSD", &[0.01, -0.02, 0.015, 0.003]);
        feed(&mut a, "USDJPY", &[0.0, 0.01, 0.0, 0.01]);

        let others = vec!["USDJPY".to_string(), "GBPUSD".to_string()];
        let (with, r) = a.max_correlation_with("EURUSD", &others, day(10)).unwrap();
        assert_eq!(with, "GBPUSD");
        assert!((r - 1.0).abs() < 1e-9);
    }
}
