//! Engine configuration.
//!
//! One section per component. Every field has a default so a partial JSON
//! file only needs to carry the values it changes. Components validate their
//! own section at construction and refuse to start on invalid values.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

use zero_common::config_loader;
use zero_common::validation::{
    collect_errors, require_at_least, require_positive, require_range, Validate,
    ValidationError, ValidationResult,
};

use crate::error::Result;

/// Files merged by [`EngineConfig::load_from`], lowest priority first.
pub const CONFIG_FILES: &[&str] = &["engine.json", "risk.json", "validation.json"];

// ============================================================================
// Ledger
// ============================================================================

/// Position ledger configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerConfig {
    /// Starting account balance
    pub initial_balance: f64,
    /// Account leverage (notional / margin)
    pub leverage: f64,
    /// Units per lot when no override exists
    pub contract_size: f64,
    /// Per-instrument units per lot
    pub contract_sizes: BTreeMap<String, f64>,
    /// Margin level (%) at or below which a margin call is flagged
    pub margin_call_level: f64,
    /// Margin level (%) at or below which a stop-out is flagged
    pub stop_out_level: f64,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            leverage: 500.0,
            contract_size: 100_000.0,
            contract_sizes: BTreeMap::new(),
            margin_call_level: 100.0,
            stop_out_level: 50.0,
        }
    }
}

impl LedgerConfig {
    /// Units per lot for an instrument
    pub fn contract_size_for(&self, instrument: &str) -> f64 {
        self.contract_sizes
            .get(instrument)
            .copied()
            .unwrap_or(self.contract_size)
    }
}

impl Validate for LedgerConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_positive("ledger.initial_balance", self.initial_balance).err());
        errors.extend(require_positive("ledger.leverage", self.leverage).err());
        errors.extend(require_positive("ledger.contract_size", self.contract_size).err());
        for (instrument, size) in &self.contract_sizes {
            errors.extend(
                require_positive(&format!("ledger.contract_sizes.{}", instrument), *size).err(),
            );
        }
        errors.extend(require_positive("ledger.margin_call_level", self.margin_call_level).err());
        errors.extend(require_positive("ledger.stop_out_level", self.stop_out_level).err());
        if self.stop_out_level > self.margin_call_level {
            errors.push(ValidationError::Conflict {
                reason: format!(
                    "ledger.stop_out_level ({}) must not exceed ledger.margin_call_level ({})",
                    self.stop_out_level, self.margin_call_level
                ),
            });
        }
        collect_errors(errors)
    }
}

// ============================================================================
// Risk
// ============================================================================

/// Risk governor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    /// Maximum open positions across all instruments
    pub max_total_positions: usize,
    /// Maximum open positions on one instrument
    pub max_positions_per_instrument: usize,
    /// Maximum intraday drawdown vs. start-of-day equity (%)
    pub max_daily_drawdown_pct: f64,
    /// Maximum risk of a single trade (stop distance x size / equity, %)
    pub max_risk_per_trade_pct: f64,
    /// Maximum total notional / equity after the trade
    pub max_exposure_ratio: f64,
    /// |correlation| at or above which a correlated-exposure warning is raised
    pub correlation_warning_threshold: f64,
    /// Utilisation of a limit at which an approaching-limit warning is raised
    pub approaching_limit_ratio: f64,
    /// Liquidate open positions when the ledger reaches stop-out
    pub enforce_stop_out: bool,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            max_total_positions: 10,
            max_positions_per_instrument: 3,
            max_daily_drawdown_pct: 5.0,
            max_risk_per_trade_pct: 2.0,
            max_exposure_ratio: 30.0,
            correlation_warning_threshold: 0.7,
            approaching_limit_ratio: 0.8,
            enforce_stop_out: true,
        }
    }
}

impl Validate for RiskConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_at_least("risk.max_total_positions", self.max_total_positions, 1).err());
        errors.extend(
            require_at_least(
                "risk.max_positions_per_instrument",
                self.max_positions_per_instrument,
                1,
            )
            .err(),
        );
        errors.extend(
            require_range("risk.max_daily_drawdown_pct", self.max_daily_drawdown_pct, 0.0, 100.0)
                .err(),
        );
        errors.extend(
            require_range("risk.max_risk_per_trade_pct", self.max_risk_per_trade_pct, 0.0, 100.0)
                .err(),
        );
        errors.extend(require_positive("risk.max_exposure_ratio", self.max_exposure_ratio).err());
        errors.extend(
            require_range(
                "risk.correlation_warning_threshold",
                self.correlation_warning_threshold,
                0.0,
                1.0,
            )
            .err(),
        );
        errors.extend(
            require_range("risk.approaching_limit_ratio", self.approaching_limit_ratio, 0.0, 1.0)
                .err(),
        );
        collect_errors(errors)
    }
}

// ============================================================================
// Correlation
// ============================================================================

/// Correlation analyzer configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CorrelationConfig {
    /// Number of most recent overlapping observations used per pair
    pub period: usize,
    /// Returns retained per instrument
    pub max_history: usize,
    /// Overlapping observations required before a pair gets a non-zero value
    pub min_observations: usize,
    /// |r| at or above which a pair is strong
    pub strong_threshold: f64,
    /// |r| below which a pair is weak
    pub weak_threshold: f64,
    /// Change in r that counts as a correlation regime shift
    pub shift_threshold: f64,
    /// Matrices retained for shift detection
    pub matrix_history: usize,
}

impl Default for CorrelationConfig {
    fn default() -> Self {
        Self {
            period: 30,
            max_history: 500,
            min_observations: 5,
            strong_threshold: 0.7,
            weak_threshold: 0.3,
            shift_threshold: 0.3,
            matrix_history: 50,
        }
    }
}

impl Validate for CorrelationConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_at_least("correlation.period", self.period, 2).err());
        errors.extend(require_at_least("correlation.min_observations", self.min_observations, 2).err());
        errors.extend(require_at_least("correlation.max_history", self.max_history, self.period).err());
        errors.extend(require_at_least("correlation.matrix_history", self.matrix_history, 2).err());
        errors.extend(require_range("correlation.strong_threshold", self.strong_threshold, 0.0, 1.0).err());
        errors.extend(require_range("correlation.weak_threshold", self.weak_threshold, 0.0, 1.0).err());
        errors.extend(require_range("correlation.shift_threshold", self.shift_threshold, 0.0, 2.0).err());
        if self.weak_threshold > self.strong_threshold {
            errors.push(ValidationError::Conflict {
                reason: "correlation.weak_threshold must not exceed correlation.strong_threshold"
                    .into(),
            });
        }
        collect_errors(errors)
    }
}

// ============================================================================
// Metrics
// ============================================================================

/// Portfolio metrics configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Annual risk-free rate as a fraction (0.02 = 2%)
    pub risk_free_rate: f64,
    /// Return periods per year used for annualisation
    pub periods_per_year: f64,
    /// Finite value reported in place of an unbounded ratio
    pub ratio_cap: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            risk_free_rate: 0.02,
            periods_per_year: 252.0,
            ratio_cap: 100.0,
        }
    }
}

impl Validate for MetricsConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_range("metrics.risk_free_rate", self.risk_free_rate, -1.0, 1.0).err());
        errors.extend(require_positive("metrics.periods_per_year", self.periods_per_year).err());
        errors.extend(require_positive("metrics.ratio_cap", self.ratio_cap).err());
        collect_errors(errors)
    }
}

// ============================================================================
// Monte Carlo
// ============================================================================

/// Resampling scheme for Monte Carlo trials
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResamplingMethod {
    /// Contiguous random blocks, preserving short-range autocorrelation
    BlockBootstrap,
    /// Independent draw with replacement per trade
    TradeResampling,
    /// Permutation of the original sequence
    OrderRandomization,
}

impl Default for ResamplingMethod {
    fn default() -> Self {
        Self::BlockBootstrap
    }
}

impl std::fmt::Display for ResamplingMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::BlockBootstrap => write!(f, "block_bootstrap"),
            Self::TradeResampling => write!(f, "trade_resampling"),
            Self::OrderRandomization => write!(f, "order_randomization"),
        }
    }
}

/// Monte Carlo simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonteCarloConfig {
    /// Number of trials
    pub trials: usize,
    /// Resampling method
    pub method: ResamplingMethod,
    /// Block length for block bootstrap (0 = round(sqrt(n)), at least 2)
    pub block_size: usize,
    /// Base seed
    pub seed: u64,
    /// Starting equity of every trial
    pub initial_balance: f64,
    /// Drawdown (%) at or beyond which a trial is ruined
    pub ruin_threshold_pct: f64,
    /// Confidence level (%) of the reported intervals
    pub confidence_level: f64,
    /// Minimum trades required to run
    pub min_trades: usize,
    /// Trades per year used to annualise per-trial Sharpe
    pub periods_per_year: f64,
    /// Run trials on the rayon pool
    pub parallel: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            trials: 1000,
            method: ResamplingMethod::BlockBootstrap,
            block_size: 0,
            seed: 42,
            initial_balance: 10_000.0,
            ruin_threshold_pct: 50.0,
            confidence_level: 95.0,
            min_trades: 10,
            periods_per_year: 252.0,
            parallel: true,
        }
    }
}

impl Validate for MonteCarloConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_at_least("monte_carlo.trials", self.trials, 1).err());
        errors.extend(require_at_least("monte_carlo.min_trades", self.min_trades, 2).err());
        errors.extend(require_positive("monte_carlo.initial_balance", self.initial_balance).err());
        errors.extend(require_positive("monte_carlo.periods_per_year", self.periods_per_year).err());
        if !(self.ruin_threshold_pct > 0.0 && self.ruin_threshold_pct <= 100.0) {
            errors.push(ValidationError::InvalidValue {
                field: "monte_carlo.ruin_threshold_pct".into(),
                reason: format!("must be in (0, 100], got {}", self.ruin_threshold_pct),
            });
        }
        if !(self.confidence_level > 0.0 && self.confidence_level < 100.0) {
            errors.push(ValidationError::InvalidValue {
                field: "monte_carlo.confidence_level".into(),
                reason: format!("must be in (0, 100), got {}", self.confidence_level),
            });
        }
        collect_errors(errors)
    }
}

// ============================================================================
// Walk-Forward
// ============================================================================

/// Walk-forward validator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WalkForwardConfig {
    /// Training window length in months
    pub window_months: u32,
    /// Test window length and slide step in months
    pub step_months: u32,
    /// Minimum windows required to run
    pub min_windows: usize,
    /// Balance used to express window returns
    pub initial_balance: f64,
    /// Trade periods per year used for Sharpe annualisation
    pub periods_per_year: f64,
    /// Robustness: minimum mean test Sharpe
    pub min_mean_sharpe: f64,
    /// Robustness: maximum mean degradation (%)
    pub max_mean_degradation: f64,
    /// Robustness: minimum stability score
    pub min_stability: f64,
    /// Robustness: minimum share of windows with positive test Sharpe (%)
    pub min_positive_window_pct: f64,
    /// Fewer windows than this raises a warning
    pub recommended_windows: usize,
    /// Test Sharpe below this marks a catastrophic window
    pub catastrophic_sharpe: f64,
    /// Coefficient of variation of test returns above this is a warning
    pub high_variance_cv: f64,
    /// Base seed handed to strategy runs (window index is mixed in)
    pub seed: u64,
}

impl Default for WalkForwardConfig {
    fn default() -> Self {
        Self {
            window_months: 6,
            step_months: 3,
            min_windows: 2,
            initial_balance: 10_000.0,
            periods_per_year: 252.0,
            min_mean_sharpe: 0.5,
            max_mean_degradation: 30.0,
            min_stability: 60.0,
            min_positive_window_pct: 70.0,
            recommended_windows: 6,
            catastrophic_sharpe: -1.0,
            high_variance_cv: 1.0,
            seed: 42,
        }
    }
}

impl Validate for WalkForwardConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_at_least("walk_forward.window_months", self.window_months as usize, 1).err());
        errors.extend(require_at_least("walk_forward.step_months", self.step_months as usize, 1).err());
        errors.extend(require_at_least("walk_forward.min_windows", self.min_windows, 1).err());
        errors.extend(require_positive("walk_forward.initial_balance", self.initial_balance).err());
        errors.extend(require_positive("walk_forward.periods_per_year", self.periods_per_year).err());
        errors.extend(require_range("walk_forward.min_stability", self.min_stability, 0.0, 100.0).err());
        errors.extend(
            require_range("walk_forward.min_positive_window_pct", self.min_positive_window_pct, 0.0, 100.0)
                .err(),
        );
        errors.extend(require_positive("walk_forward.high_variance_cv", self.high_variance_cv).err());
        collect_errors(errors)
    }
}

// ============================================================================
// Regime
// ============================================================================

/// Regime detector configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegimeConfig {
    /// Candles looked back from the classified candle
    pub lookback: usize,
    /// Reference volatility (stdev of % returns); extremes are 1.5x / 0.5x
    pub volatility_threshold_pct: f64,
    /// Normalized regression slope (% of mean price per bar) that counts as a trend
    pub trend_threshold_pct: f64,
    /// Window range (% of mean price) below which the market is ranging
    pub range_threshold_pct: f64,
    /// Share of total profit above which one regime dominates (%)
    pub dominance_pct: f64,
    /// Trades needed before a regime's statistics are trusted
    pub min_trades_per_regime: usize,
}

impl Default for RegimeConfig {
    fn default() -> Self {
        Self {
            lookback: 20,
            volatility_threshold_pct: 1.0,
            trend_threshold_pct: 0.1,
            range_threshold_pct: 3.0,
            dominance_pct: 70.0,
            min_trades_per_regime: 5,
        }
    }
}

impl Validate for RegimeConfig {
    fn validate(&self) -> ValidationResult<()> {
        let mut errors = Vec::new();
        errors.extend(require_at_least("regime.lookback", self.lookback, 2).err());
        errors.extend(require_positive("regime.volatility_threshold_pct", self.volatility_threshold_pct).err());
        errors.extend(require_positive("regime.trend_threshold_pct", self.trend_threshold_pct).err());
        errors.extend(require_positive("regime.range_threshold_pct", self.range_threshold_pct).err());
        errors.extend(require_range("regime.dominance_pct", self.dominance_pct, 0.0, 100.0).err());
        collect_errors(errors)
    }
}

// ============================================================================
// Orchestrator & Observability
// ============================================================================

/// Multi-asset orchestrator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Run per-instrument strategy simulations on the rayon pool
    pub parallel: bool,
    /// Base seed handed to strategy runs (instrument index is mixed in)
    pub seed: u64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            parallel: true,
            seed: 42,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Base log level
    pub log_level: String,
    /// "json" or "pretty"
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Validate for ObservabilityConfig {
    fn validate(&self) -> ValidationResult<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
            other => Err(ValidationError::InvalidValue {
                field: "observability.log_level".into(),
                reason: format!("unknown level '{}'", other),
            }),
        }
    }
}

// ============================================================================
// Engine
// ============================================================================

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub ledger: LedgerConfig,
    pub risk: RiskConfig,
    pub correlation: CorrelationConfig,
    pub metrics: MetricsConfig,
    pub monte_carlo: MonteCarloConfig,
    pub walk_forward: WalkForwardConfig,
    pub regime: RegimeConfig,
    pub orchestrator: OrchestratorConfig,
    pub observability: ObservabilityConfig,
}

impl Validate for EngineConfig {
    fn validate(&self) -> ValidationResult<()> {
        let errors: Vec<ValidationError> = [
            self.ledger.validate(),
            self.risk.validate(),
            self.correlation.validate(),
            self.metrics.validate(),
            self.monte_carlo.validate(),
            self.walk_forward.validate(),
            self.regime.validate(),
            self.observability.validate(),
        ]
        .into_iter()
        .filter_map(|r| r.err())
        .collect();

        collect_errors(errors)
    }
}

impl EngineConfig {
    /// Load layered configuration from a directory (default `~/.zero-portfolio`)
    /// and validate it.
    pub fn load_from(dir: Option<PathBuf>) -> Result<Self> {
        let config: Self = config_loader::load_typed(dir, CONFIG_FILES)?;
        config.validate()?;
        Ok(config)
    }
}

// ============================================================================
// Tests
// ============================================================================
