//! Walk-forward validation.
//!
//! Slides a train window followed by a test window across a date range,
//! runs the strategy over both independently and measures how much of the
//! in-sample performance survives out of sample.
//!
//! ```text
//!   |---- train 0 ----|- test 0 -|
//!             |---- train 1 ----|- test 1 -|
//!                       |---- train 2 ----|- test 2 -|
//!   <-step->
//! ```

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::config::{LedgerConfig, WalkForwardConfig};
use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::metrics::{capped_ratio, mean, sharpe_ratio, std_dev, DrawdownProfile, TradeStatistics};
use crate::providers::{derive_seed, InstrumentSpec, StrategyRequest, StrategyRunner};
use crate::types::{DateRange, StrategyTrade};
use zero_common::Validate;

/// Finite stand-in for unbounded window ratios
const RATIO_CAP: f64 = 100.0;

/// Window count at which the count component of confidence saturates
const CONFIDENCE_WINDOW_SATURATION: usize = 12;

// ============================================================================
// Windows
// ============================================================================

/// One train/test window pair
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalkForwardWindow {
    /// Window index
    pub index: usize,
    /// In-sample range
    pub train: DateRange,
    /// Out-of-sample range, starting where `train` ends
    pub test: DateRange,
}

/// Lay out windows over `range`.
///
/// Window `i` trains on `[start + i*step, +window)` and tests on the `step`
/// months that follow. Generation stops before a test range would pass the
/// end of `range`.
pub fn generate_windows(range: &DateRange, window_months: u32, step_months: u32) -> Vec<WalkForwardWindow> {
    let mut windows = Vec::new();
    if window_months == 0 || step_months == 0 {
        return windows;
    }

    let add = |date: NaiveDate, months: u32| date.checked_add_months(Months::new(months));
    let mut offset = 0u32;
    loop {
        let Some(train_start) = add(range.start, offset) else { break };
        let Some(train_end) = add(train_start, window_months) else { break };
        let Some(test_end) = add(train_end, step_months) else { break };
        if test_end > range.end {
            break;
        }
        windows.push(WalkForwardWindow {
            index: windows.len(),
            train: DateRange::new(train_start, train_end),
            test: DateRange::new(train_end, test_end),
        });
        offset += step_months;
    }
    windows
}

// ============================================================================
// Results
// ============================================================================

/// Performance of one strategy run over one range
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WindowMetrics {
    /// Number of trades
    pub trades: usize,
    /// Net P&L
    pub net_profit: f64,
    /// Net P&L as % of the initial balance
    pub total_return_pct: f64,
    /// Annualised Sharpe of per-trade returns
    pub sharpe_ratio: f64,
    /// Win rate (%)
    pub win_rate: f64,
    /// Gross profit / gross loss, capped
    pub profit_factor: f64,
    /// Max drawdown of the trade-by-trade equity path (%)
    pub max_drawdown_pct: f64,
}

impl WindowMetrics {
    /// Evaluate net trade P&L replayed additively from `initial_balance`
    pub fn from_pnls(pnls: &[f64], initial_balance: f64, periods_per_year: f64) -> Self {
        if pnls.is_empty() {
            return Self::default();
        }

        let mut equity = vec![initial_balance];
        let mut returns = Vec::with_capacity(pnls.len());
        let mut current = initial_balance;
        for pnl in pnls {
            if current > 0.0 {
                returns.push(pnl / current);
            }
            current += pnl;
            equity.push(current);
        }

        let stats = TradeStatistics::from_pnls(pnls, RATIO_CAP);
        let (sharpe, _) = sharpe_ratio(&returns, 0.0, periods_per_year, RATIO_CAP);
        Self {
            trades: pnls.len(),
            net_profit: stats.net_profit,
            total_return_pct: stats.net_profit / initial_balance * 100.0,
            sharpe_ratio: sharpe,
            win_rate: stats.win_rate,
            profit_factor: stats.profit_factor,
            max_drawdown_pct: DrawdownProfile::from_equity(&equity).max_drawdown_pct,
        }
    }
}

/// Train-to-test decline per metric (%), floored at 0
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Degradation {
    pub sharpe_ratio: f64,
    pub win_rate: f64,
    pub total_return: f64,
    pub profit_factor: f64,
    /// Mean of the four metrics
    pub overall: f64,
}

impl Degradation {
    /// Compare out-of-sample metrics with in-sample metrics
    pub fn between(train: &WindowMetrics, test: &WindowMetrics) -> Self {
        let sharpe_ratio = degradation(train.sharpe_ratio, test.sharpe_ratio);
        let win_rate = degradation(train.win_rate, test.win_rate);
        let total_return = degradation(train.total_return_pct, test.total_return_pct);
        let profit_factor = degradation(train.profit_factor, test.profit_factor);
        Self {
            overall: mean(&[sharpe_ratio, win_rate, total_return, profit_factor]),
            sharpe_ratio,
            win_rate,
            total_return,
            profit_factor,
        }
    }
}

/// `max(0, (train - test) / |train| x 100)`; 0 when train is 0
pub fn degradation(train: f64, test: f64) -> f64 {
    if train.abs() <= f64::EPSILON {
        return 0.0;
    }
    ((train - test) / train.abs() * 100.0).max(0.0)
}

/// A completed window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowResult {
    pub window: WalkForwardWindow,
    pub train: WindowMetrics,
    pub test: WindowMetrics,
    pub degradation: Degradation,
}

/// A window whose strategy run failed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WindowFailure {
    pub window: WalkForwardWindow,
    pub reason: String,
}

/// Walk-forward warning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WalkForwardWarning {
    /// Fewer windows than recommended
    FewWindows { windows: usize, recommended: usize },
    /// Mean degradation above the limit
    HighDegradation { mean_degradation: f64, limit: f64 },
    /// Stability below the minimum
    LowStability { stability: f64, minimum: f64 },
    /// Worst window's test Sharpe below the catastrophic level
    CatastrophicWindow { index: usize, sharpe_ratio: f64 },
    /// Test returns vary widely between windows
    HighVariance { coefficient_of_variation: f64 },
}

impl std::fmt::Display for WalkForwardWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FewWindows { windows, recommended } => {
                write!(f, "only {} windows, {} recommended", windows, recommended)
            }
            Self::HighDegradation { mean_degradation, limit } => {
                write!(f, "mean degradation {:.1}% exceeds {:.1}%", mean_degradation, limit)
            }
            Self::LowStability { stability, minimum } => {
                write!(f, "stability {:.1} below {:.1}", stability, minimum)
            }
            Self::CatastrophicWindow { index, sharpe_ratio } => {
                write!(f, "window {} test Sharpe {:.2}", index, sharpe_ratio)
            }
            Self::HighVariance { coefficient_of_variation } => {
                write!(f, "test return CV {:.2}", coefficient_of_variation)
            }
        }
    }
}

/// Walk-forward report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalkForwardReport {
    /// Instrument validated
    pub instrument: String,
    /// Validated range
    pub range: DateRange,
    /// Windows laid out over the range
    pub windows_planned: usize,
    /// Completed windows, in window order
    pub windows: Vec<WindowResult>,
    /// Windows whose strategy run failed
    pub failed: Vec<WindowFailure>,
    /// Run stopped before every window completed
    pub cancelled: bool,
    pub mean_test_sharpe: f64,
    pub mean_test_win_rate: f64,
    pub mean_test_return_pct: f64,
    pub mean_degradation: f64,
    /// `max(0, 100 - 50 x stdev(test Sharpes))`
    pub stability: f64,
    /// Windows with a positive test Sharpe (%)
    pub positive_window_pct: f64,
    /// Index of the window with the highest test Sharpe
    pub best_window: Option<usize>,
    /// Index of the window with the lowest test Sharpe
    pub worst_window: Option<usize>,
    /// 0-100 confidence in the verdict
    pub confidence: f64,
    /// All robustness criteria met
    pub is_robust: bool,
    pub warnings: Vec<WalkForwardWarning>,
}

// ============================================================================
// Validator
// ============================================================================

/// Walk-forward validator
#[derive(Debug, Clone)]
pub struct WalkForwardValidator {
    config: WalkForwardConfig,
    ledger: LedgerConfig,
}

impl WalkForwardValidator {
    /// Create a validator. Contract sizes come from the ledger section.
    pub fn new(config: WalkForwardConfig, ledger: LedgerConfig) -> Result<Self> {
        config.validate()?;
        ledger.validate()?;
        Ok(Self { config, ledger })
    }

    /// Configuration in use
    pub fn config(&self) -> &WalkForwardConfig {
        &self.config
    }

    /// Windows this validator lays out over `range`
    pub fn windows(&self, range: &DateRange) -> Vec<WalkForwardWindow> {
        generate_windows(range, self.config.window_months, self.config.step_months)
    }

    /// Net P&L of strategy trades, in close order
    pub fn trade_pnls(&self, trades: &[StrategyTrade]) -> Vec<f64> {
        let mut ordered: Vec<&StrategyTrade> = trades.iter().collect();
        ordered.sort_by_key(|t| t.closed_at);
        ordered
            .iter()
            .map(|t| t.price_pnl() * self.ledger.contract_size_for(&t.instrument) - t.commission)
            .collect()
    }

    /// Validate one instrument's strategy over `range`
    pub fn run(
        &self,
        runner: &dyn StrategyRunner,
        spec: &InstrumentSpec,
        range: DateRange,
        ctx: &RunContext,
    ) -> Result<WalkForwardReport> {
        let windows = self.windows(&range);
        if windows.len() < self.config.min_windows {
            return Err(EngineError::insufficient(
                format!("walk-forward windows over {}", range),
                self.config.min_windows,
                windows.len(),
            ));
        }

        tracing::info!(
            run_id = %ctx.run_id(),
            instrument = %spec.instrument,
            runner = runner.name(),
            windows = windows.len(),
            "Walk-forward started"
        );

        let total = windows.len();
        let mut results = Vec::with_capacity(total);
        let mut failed = Vec::new();
        let mut cancelled = false;

        for window in &windows {
            if ctx.should_stop() {
                cancelled = true;
                break;
            }

            match self.evaluate_window(runner, spec, window) {
                Ok(result) => {
                    tracing::debug!(
                        window = window.index,
                        train_sharpe = result.train.sharpe_ratio,
                        test_sharpe = result.test.sharpe_ratio,
                        degradation = result.degradation.overall,
                        "Window evaluated"
                    );
                    results.push(result);
                }
                Err(e) => {
                    tracing::warn!(window = window.index, error = %e, "Window failed");
                    failed.push(WindowFailure {
                        window: *window,
                        reason: e.to_string(),
                    });
                }
            }

            ctx.consume_step();
            ctx.report(
                "WALK_FORWARD",
                window.index + 1,
                total,
                format!("window {} tested on {}", window.index, window.test),
            );
        }

        if cancelled {
            tracing::warn!(completed = results.len(), planned = total, "Walk-forward cancelled");
        }

        let report = self.summarize(spec, range, total, results, failed, cancelled);
        for warning in &report.warnings {
            tracing::warn!(instrument = %report.instrument, warning = %warning, "Walk-forward warning");
        }
        tracing::info!(
            instrument = %report.instrument,
            windows = report.windows.len(),
            mean_test_sharpe = report.mean_test_sharpe,
            stability = report.stability,
            robust = report.is_robust,
            "Walk-forward finished"
        );
        Ok(report)
    }

    fn evaluate_window(
        &self,
        runner: &dyn StrategyRunner,
        spec: &InstrumentSpec,
        window: &WalkForwardWindow,
    ) -> Result<WindowResult> {
        let seed = derive_seed(self.config.seed, window.index as u64);
        let run = |range: DateRange| -> Result<WindowMetrics> {
            let request = StrategyRequest {
                instrument: spec.instrument.clone(),
                parameters: spec.parameters.clone(),
                range,
                seed,
            };
            let trades = runner.run(&request).map_err(|e| EngineError::Strategy {
                instrument: spec.instrument.clone(),
                reason: e.to_string(),
            })?;
            Ok(WindowMetrics::from_pnls(
                &self.trade_pnls(&trades),
                self.config.initial_balance,
                self.config.periods_per_year,
            ))
        };

        let train = run(window.train)?;
        let test = run(window.test)?;
        Ok(WindowResult {
            window: *window,
            degradation: Degradation::between(&train, &test),
            train,
            test,
        })
    }

    fn summarize(
        &self,
        spec: &InstrumentSpec,
        range: DateRange,
        planned: usize,
        windows: Vec<WindowResult>,
        failed: Vec<WindowFailure>,
        cancelled: bool,
    ) -> WalkForwardReport {
        let cfg = &self.config;
        let sharpes: Vec<f64> = windows.iter().map(|w| w.test.sharpe_ratio).collect();
        let returns: Vec<f64> = windows.iter().map(|w| w.test.total_return_pct).collect();
        let win_rates: Vec<f64> = windows.iter().map(|w| w.test.win_rate).collect();
        let degradations: Vec<f64> = windows.iter().map(|w| w.degradation.overall).collect();

        let n = windows.len();
        let mean_test_sharpe = mean(&sharpes);
        let mean_degradation = mean(&degradations);
        let stability = (100.0 - 50.0 * std_dev(&sharpes)).max(0.0);
        let positive_window_pct = if n == 0 {
            0.0
        } else {
            sharpes.iter().filter(|s| **s > 0.0).count() as f64 / n as f64 * 100.0
        };

        let by_sharpe = |a: &&WindowResult, b: &&WindowResult| {
            a.test
                .sharpe_ratio
                .total_cmp(&b.test.sharpe_ratio)
                .then_with(|| b.window.index.cmp(&a.window.index))
        };
        let best = windows.iter().max_by(by_sharpe);
        let worst = windows.iter().min_by(by_sharpe);

        let confidence = match worst {
            Some(worst) => {
                let count_score =
                    n.min(CONFIDENCE_WINDOW_SATURATION) as f64 / CONFIDENCE_WINDOW_SATURATION as f64 * 100.0;
                let worst_score = ((worst.test.sharpe_ratio + 1.0) / 1.5 * 100.0).clamp(0.0, 100.0);
                0.3 * count_score + 0.4 * positive_window_pct + 0.3 * worst_score
            }
            None => 0.0,
        };

        let is_robust = n > 0
            && mean_test_sharpe >= cfg.min_mean_sharpe
            && mean_degradation <= cfg.max_mean_degradation
            && stability >= cfg.min_stability
            && positive_window_pct >= cfg.min_positive_window_pct;

        let mut warnings = Vec::new();
        if n < cfg.recommended_windows {
            warnings.push(WalkForwardWarning::FewWindows {
                windows: n,
                recommended: cfg.recommended_windows,
            });
        }
        if n > 0 && mean_degradation > cfg.max_mean_degradation {
            warnings.push(WalkForwardWarning::HighDegradation {
                mean_degradation,
                limit: cfg.max_mean_degradation,
            });
        }
        if n > 0 && stability < cfg.min_stability {
            warnings.push(WalkForwardWarning::LowStability {
                stability,
                minimum: cfg.min_stability,
            });
        }
        if let Some(worst) = worst {
            if worst.test.sharpe_ratio < cfg.catastrophic_sharpe {
                warnings.push(WalkForwardWarning::CatastrophicWindow {
                    index: worst.window.index,
                    sharpe_ratio: worst.test.sharpe_ratio,
                });
            }
        }
        let (cv, _) = capped_ratio(std_dev(&returns), mean(&returns).abs(), RATIO_CAP);
        if n > 1 && cv > cfg.high_variance_cv {
            warnings.push(WalkForwardWarning::HighVariance {
                coefficient_of_variation: cv,
            });
        }

        WalkForwardReport {
            instrument: spec.instrument.clone(),
            range,
            windows_planned: planned,
            best_window: best.map(|w| w.window.index),
            worst_window: worst.map(|w| w.window.index),
            windows,
            failed,
            cancelled,
            mean_test_sharpe,
            mean_test_win_rate: mean(&win_rates),
            mean_test_return_pct: mean(&returns),
            mean_degradation,
            stability,
            positive_window_pct,
            confidence,
            is_robust,
            warnings,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
