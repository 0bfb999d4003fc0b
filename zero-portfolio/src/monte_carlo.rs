//! Monte Carlo robustness simulation.
//!
//! Resamples a strategy's per-trade P&L sequence many times and replays
//! every resampled sequence additively from the initial balance. The spread
//! of outcomes shows how much of a backtest result depends on the particular
//! order and selection of trades.
//!
//! Trial `i` draws from its own `ChaCha8Rng` seeded with
//! `derive_seed(seed, i)`, so results are identical whether trials run
//! sequentially or on the rayon pool.

use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use statrs::statistics::{Data, OrderStatistics};

use crate::config::{MonteCarloConfig, ResamplingMethod};
use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::ledger::ClosedTrade;
use crate::metrics::{mean, sharpe_ratio, std_dev};
use crate::providers::derive_seed;
use zero_common::Validate;

/// Trials evaluated between cancellation checks
const CHUNK_SIZE: usize = 100;

/// Percentiles reported for every distribution
pub const PERCENTILES: [usize; 9] = [1, 5, 10, 25, 50, 75, 90, 95, 99];

/// Finite stand-in for an unbounded per-trial Sharpe ratio
const SHARPE_CAP: f64 = 100.0;

/// Trials kept in the best and worst lists
const EXTREME_TRIALS: usize = 5;

// ============================================================================
// Results
// ============================================================================

/// Outcome of replaying one P&L sequence
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PathOutcome {
    /// Equity after the last trade
    pub final_equity: f64,
    /// Total return (%)
    pub total_return_pct: f64,
    /// Deepest decline from the running peak (%)
    pub max_drawdown_pct: f64,
    /// Lowest equity reached
    pub min_equity: f64,
    /// Annualised Sharpe of per-trade returns
    pub sharpe_ratio: f64,
    /// Drawdown reached the ruin threshold or equity reached zero
    pub ruined: bool,
}

/// One resampled trial
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrialResult {
    /// Trial index
    pub trial: usize,
    /// Seed the trial drew from
    pub seed: u64,
    #[serde(flatten)]
    pub outcome: PathOutcome,
}

/// Symmetric confidence interval
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceInterval {
    /// Confidence level (%)
    pub level: f64,
    pub lower: f64,
    pub upper: f64,
}

impl ConfidenceInterval {
    /// Whether a value lies inside the interval
    pub fn contains(&self, value: f64) -> bool {
        value >= self.lower && value <= self.upper
    }
}

/// Summary of one outcome distribution across trials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Distribution {
    pub mean: f64,
    pub median: f64,
    pub std_dev: f64,
    pub min: f64,
    pub max: f64,
    /// Third standardized moment
    pub skewness: f64,
    /// Fourth standardized moment minus 3
    pub excess_kurtosis: f64,
    /// `(percentile, value)` for every entry of [`PERCENTILES`]
    pub percentiles: Vec<(usize, f64)>,
    /// Interval at the configured confidence level
    pub confidence_interval: ConfidenceInterval,
}

impl Distribution {
    /// Summarize a set of values at `confidence_level` (%)
    pub fn from_values(values: &[f64], confidence_level: f64) -> Self {
        if values.is_empty() {
            return Self::default();
        }

        let mut data = Data::new(values.to_vec());
        let tail = (1.0 - confidence_level / 100.0) / 2.0;
        let (skewness, excess_kurtosis) = shape(values);

        Self {
            mean: mean(values),
            median: data.quantile(0.5),
            std_dev: std_dev(values),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            skewness,
            excess_kurtosis,
            percentiles: PERCENTILES
                .iter()
                .map(|&p| (p, data.quantile(p as f64 / 100.0)))
                .collect(),
            confidence_interval: ConfidenceInterval {
                level: confidence_level,
                lower: data.quantile(tail),
                upper: data.quantile(1.0 - tail),
            },
        }
    }

    /// Value at percentile `p` if it is one of [`PERCENTILES`]
    pub fn percentile(&self, p: usize) -> Option<f64> {
        self.percentiles.iter().find(|(q, _)| *q == p).map(|(_, v)| *v)
    }
}

/// Skewness and excess kurtosis from population moments
fn shape(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let m = mean(values);
    let m2 = values.iter().map(|v| (v - m).powi(2)).sum::<f64>() / n;
    if m2 <= f64::EPSILON {
        return (0.0, 0.0);
    }
    let m3 = values.iter().map(|v| (v - m).powi(3)).sum::<f64>() / n;
    let m4 = values.iter().map(|v| (v - m).powi(4)).sum::<f64>() / n;
    (m3 / m2.powf(1.5), m4 / (m2 * m2) - 3.0)
}

/// Monte Carlo report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonteCarloReport {
    /// Resampling method
    pub method: ResamplingMethod,
    /// Block length used (block bootstrap only)
    pub block_size: Option<usize>,
    /// Base seed
    pub seed: u64,
    /// Trials requested
    pub trials_requested: usize,
    /// Trials completed before any cancellation
    pub trials_completed: usize,
    /// Run stopped before every trial completed
    pub cancelled: bool,
    /// Trades in the source sequence
    pub trade_count: usize,
    /// Replay of the source sequence in its original order
    pub original: PathOutcome,
    /// Share of trials ending at or below the original final equity (%)
    pub original_percentile: f64,
    pub final_equity: Distribution,
    pub total_return_pct: Distribution,
    pub max_drawdown_pct: Distribution,
    pub sharpe_ratio: Distribution,
    /// Share of ruined trials (0..=1)
    pub probability_of_ruin: f64,
    /// Share of trials ending above the initial balance (0..=1)
    pub probability_of_profit: f64,
    /// Highest final equity first
    pub best_trials: Vec<TrialResult>,
    /// Lowest final equity first
    pub worst_trials: Vec<TrialResult>,
}

// ============================================================================
// Simulator
// ============================================================================

/// Monte Carlo simulator
#[derive(Debug, Clone)]
pub struct MonteCarloSimulator {
    config: MonteCarloConfig,
}

impl MonteCarloSimulator {
    /// Create a simulator
    pub fn new(config: MonteCarloConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Configuration in use
    pub fn config(&self) -> &MonteCarloConfig {
        &self.config
    }

    /// Block length used for a sequence of `n` trades
    pub fn effective_block_size(&self, n: usize) -> usize {
        let block = if self.config.block_size == 0 {
            (n as f64).sqrt().round() as usize
        } else {
            self.config.block_size
        };
        block.max(2).min(n.max(2))
    }

    /// Run on the net P&L of realized trades, in close order
    pub fn run_trades(&self, trades: &[ClosedTrade], ctx: &RunContext) -> Result<MonteCarloReport> {
        let pnls: Vec<f64> = trades.iter().map(|t| t.realized_pnl).collect();
        self.run(&pnls, ctx)
    }

    /// Run every trial on a per-trade P&L sequence
    pub fn run(&self, pnls: &[f64], ctx: &RunContext) -> Result<MonteCarloReport> {
        if pnls.len() < self.config.min_trades {
            return Err(EngineError::insufficient("monte carlo trades", self.config.min_trades, pnls.len()));
        }
        if let Some(index) = pnls.iter().position(|p| !p.is_finite()) {
            return Err(EngineError::invalid_input("monte carlo trades", format!("trade {} has a non-finite P&L", index)));
        }

        let total = self.config.trials;
        tracing::info!(
            run_id = %ctx.run_id(),
            method = %self.config.method,
            trials = total,
            trades = pnls.len(),
            seed = self.config.seed,
            "Monte Carlo started"
        );

        let mut results: Vec<TrialResult> = Vec::with_capacity(total);
        let mut cancelled = false;
        let mut chunk_start = 0;
        while chunk_start < total {
            if ctx.should_stop() {
                cancelled = true;
                break;
            }
            let chunk_end = (chunk_start + CHUNK_SIZE).min(total);

            let run_trial = |trial: usize| {
                ctx.consume_step();
                self.run_trial(pnls, trial)
            };
            let chunk: Vec<TrialResult> = if self.config.parallel {
                (chunk_start..chunk_end).into_par_iter().map(run_trial).collect()
            } else {
                (chunk_start..chunk_end).map(run_trial).collect()
            };
            results.extend(chunk);

            chunk_start = chunk_end;
            ctx.report(
                "MONTE_CARLO",
                results.len(),
                total,
                format!("{} of {} trials", results.len(), total),
            );
        }

        if cancelled {
            tracing::warn!(completed = results.len(), requested = total, "Monte Carlo cancelled");
        }

        let report = self.summarize(pnls, results, cancelled);
        tracing::info!(
            trials = report.trials_completed,
            probability_of_ruin = report.probability_of_ruin,
            probability_of_profit = report.probability_of_profit,
            median_final_equity = report.final_equity.median,
            "Monte Carlo finished"
        );
        Ok(report)
    }

    /// Run a single trial
    pub fn run_trial(&self, pnls: &[f64], trial: usize) -> TrialResult {
        let seed = derive_seed(self.config.seed, trial as u64);
        let mut rng = ChaCha8Rng::seed_from_u64(seed);
        let sequence = self.resample(pnls, &mut rng);
        TrialResult {
            trial,
            seed,
            outcome: self.replay(&sequence),
        }
    }

    /// Draw one resampled sequence of the same length
    pub fn resample<R: Rng>(&self, pnls: &[f64], rng: &mut R) -> Vec<f64> {
        let n = pnls.len();
        if n == 0 {
            return Vec::new();
        }
        match self.config.method {
            ResamplingMethod::TradeResampling => (0..n).map(|_| pnls[rng.gen_range(0..n)]).collect(),
            ResamplingMethod::OrderRandomization => {
                let mut shuffled = pnls.to_vec();
                shuffled.shuffle(rng);
                shuffled
            }
            ResamplingMethod::BlockBootstrap => {
                // Circular blocks keep the tail as likely as the head
                let block = self.effective_block_size(n);
                let mut out = Vec::with_capacity(n);
                while out.len() < n {
                    let start = rng.gen_range(0..n);
                    let take = block.min(n - out.len());
                    out.extend((0..take).map(|k| pnls[(start + k) % n]));
                }
                out
            }
        }
    }

    /// Replay a P&L sequence additively from the initial balance
    pub fn replay(&self, pnls: &[f64]) -> PathOutcome {
        let initial = self.config.initial_balance;
        let mut equity = initial;
        let mut peak = initial;
        let mut min_equity = initial;
        let mut max_drawdown_pct: f64 = 0.0;
        let mut ruined = false;
        let mut returns = Vec::with_capacity(pnls.len());

        for pnl in pnls {
            if equity > 0.0 {
                returns.push(pnl / equity);
            }
            equity += pnl;
            peak = peak.max(equity);
            min_equity = min_equity.min(equity);

            let drawdown_pct = if peak > 0.0 { (peak - equity) / peak * 100.0 } else { 100.0 };
            max_drawdown_pct = max_drawdown_pct.max(drawdown_pct);
            if drawdown_pct >= self.config.ruin_threshold_pct || equity <= 0.0 {
                ruined = true;
            }
        }

        let (sharpe, _) = sharpe_ratio(&returns, 0.0, self.config.periods_per_year, SHARPE_CAP);
        PathOutcome {
            final_equity: equity,
            total_return_pct: (equity / initial - 1.0) * 100.0,
            max_drawdown_pct,
            min_equity,
            sharpe_ratio: sharpe,
            ruined,
        }
    }

    fn summarize(&self, pnls: &[f64], mut results: Vec<TrialResult>, cancelled: bool) -> MonteCarloReport {
        let cl = self.config.confidence_level;
        let original = self.replay(pnls);
        let completed = results.len();

        let column = |f: fn(&PathOutcome) -> f64| -> Vec<f64> { results.iter().map(|r| f(&r.outcome)).collect() };
        let final_equity = column(|o| o.final_equity);
        let total_return = column(|o| o.total_return_pct);
        let drawdown = column(|o| o.max_drawdown_pct);
        let sharpe = column(|o| o.sharpe_ratio);

        let share = |count: usize| if completed == 0 { 0.0 } else { count as f64 / completed as f64 };
        let ruined = results.iter().filter(|r| r.outcome.ruined).count();
        let profitable = final_equity.iter().filter(|e| **e > self.config.initial_balance).count();
        let at_or_below = final_equity.iter().filter(|e| **e <= original.final_equity).count();

        // Highest final equity first; trial index breaks ties
        results.sort_by(|a, b| {
            b.outcome
                .final_equity
                .total_cmp(&a.outcome.final_equity)
                .then_with(|| a.trial.cmp(&b.trial))
        });
        let best_trials: Vec<TrialResult> = results.iter().take(EXTREME_TRIALS).cloned().collect();
        let worst_trials: Vec<TrialResult> = results.iter().rev().take(EXTREME_TRIALS).cloned().collect();

        MonteCarloReport {
            method: self.config.method,
            block_size: (self.config.method == ResamplingMethod::BlockBootstrap)
                .then(|| self.effective_block_size(pnls.len())),
            seed: self.config.seed,
            trials_requested: self.config.trials,
            trials_completed: completed,
            cancelled,
            trade_count: pnls.len(),
            original_percentile: share(at_or_below) * 100.0,
            original,
            final_equity: Distribution::from_values(&final_equity, cl),
            total_return_pct: Distribution::from_values(&total_return, cl),
            max_drawdown_pct: Distribution::from_values(&drawdown, cl),
            sharpe_ratio: Distribution::from_values(&sharpe, cl),
            probability_of_ruin: share(ruined),
            probability_of_profit: share(profitable),
            best_trials,
            worst_trials,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn simulator(method: ResamplingMethod, trials: usize) -> MonteCarloSimulator {
        MonteCarloSimulator::new(MonteCarloConfig {
            method,
            trials,
            ..Default::default()
        })
        .unwrap()
    }

    fn sample_pnls() -> Vec<f64> {
        vec![120.0, -80.0, 45.0, -30.0, 200.0, -150.0, 60.0, 10.0, -25.0, 90.0, -60.0, 35.0]
    }

    #[test]
    fn test_requires_min_trades() {
        let sim = simulator(ResamplingMethod::TradeResampling, 10);
        let err = sim.run(&[1.0, 2.0], &RunContext::new()).unwrap_err();
        assert!(matches!(err, EngineError::InsufficientData { required: 10, actual: 2, .. }));
    }

    #[test]
    fn test_non_finite_pnl_is_invalid_input() {
        let mut pnls = sample_pnls();
        pnls[4] = f64::NAN;
        let err = simulator(ResamplingMethod::TradeResampling, 10)
            .run(&pnls, &RunContext::new())
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidInput { .. }));
        assert!(!err.is_configuration());
    }

    #[test]
    fn test_same_seed_same_report() {
        let sim = simulator(ResamplingMethod::BlockBootstrap, 250);
        let a = sim.run(&sample_pnls(), &RunContext::new()).unwrap();
        let b = sim.run(&sample_pnls(), &RunContext::new()).unwrap();
        assert_eq!(a.final_equity, b.final_equity);
        assert_eq!(a.best_trials, b.best_trials);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let parallel = simulator(ResamplingMethod::TradeResampling, 300);
        let sequential = MonteCarloSimulator::new(MonteCarloConfig {
            method: ResamplingMethod::TradeResampling,
            trials: 300,
            parallel: false,
            ..Default::default()
        })
        .unwrap();
        let a = parallel.run(&sample_pnls(), &RunContext::new()).unwrap();
        let b = sequential.run(&sample_pnls(), &RunContext::new()).unwrap();
        assert_eq!(a.final_equity, b.final_equity);
        assert_eq!(a.probability_of_ruin, b.probability_of_ruin);
    }

    #[test]
    fn test_order_randomization_preserves_final_equity() {
        let sim = simulator(ResamplingMethod::OrderRandomization, 100);
        let report = sim.run(&sample_pnls(), &RunContext::new()).unwrap();
        let expected = 10_000.0 + sample_pnls().iter().sum::<f64>();
        assert!((report.final_equity.min - expected).abs() < 1e-6);
        assert!((report.final_equity.max - expected).abs() < 1e-6);
        assert!((report.probability_of_profit - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ruin_threshold_is_inclusive() {
        let mut pnls = vec![0.0; 10];
        pnls[3] = -5_000.0;
        let sim = simulator(ResamplingMethod::OrderRandomization, 50);
        let report = sim.run(&pnls, &RunContext::new()).unwrap();
        assert!((report.probability_of_ruin - 1.0).abs() < 1e-12);
        assert!(report.original.ruined);
        assert!((report.original.max_drawdown_pct - 50.0).abs() < 1e-12);
    }

    #[test]
    fn test_block_size_defaults_to_sqrt() {
        let sim = simulator(ResamplingMethod::BlockBootstrap, 1);
        assert_eq!(sim.effective_block_size(16), 4);
        assert_eq!(sim.effective_block_size(2), 2);
        assert_eq!(sim.effective_block_size(3), 2);
    }

    #[test]
    fn test_block_bootstrap_draws_contiguous_blocks() {
        let sim = MonteCarloSimulator::new(MonteCarloConfig {
            block_size: 3,
            ..Default::default()
        })
        .unwrap();
        let pnls: Vec<f64> = (0..9).map(f64::from).collect();
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let sequence = sim.resample(&pnls, &mut rng);
        assert_eq!(sequence.len(), 9);
        for block in sequence.chunks(3) {
            assert_eq!((block[0] as usize + 1) % 9, block[1] as usize);
            assert_eq!((block[1] as usize + 1) % 9, block[2] as usize);
        }
    }

    #[test]
    fn test_cancelled_run_reports_partial() {
        let ctx = RunContext::new().with_step_budget(150);
        let sim = MonteCarloSimulator::new(MonteCarloConfig {
            trials: 1_000,
            parallel: false,
            ..Default::default()
        })
        .unwrap();
        let report = sim.run(&sample_pnls(), &ctx).unwrap();
        assert!(report.cancelled);
        assert_eq!(report.trials_completed, 200);
    }

    #[test]
    fn test_distribution_shape() {
        let symmetric = Distribution::from_values(&[1.0, 2.0, 3.0, 4.0, 5.0], 90.0);
        assert!(symmetric.skewness.abs() < 1e-12);
        assert!((symmetric.median - 3.0).abs() < 1e-12);
        assert_eq!(symmetric.percentiles.len(), PERCENTILES.len());
        assert!(symmetric.confidence_interval.contains(3.0));

        let skewed = Distribution::from_values(&[1.0, 1.0, 1.0, 1.0, 10.0], 90.0);
        assert!(skewed.skewness > 0.0);
    }
}
