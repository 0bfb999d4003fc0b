//! Zero Portfolio Library
//!
//! Portfolio risk and validation engine: replays the trades of several
//! independently simulated strategies through one shared account under a
//! risk policy, then measures how robust the result is.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────┐
//! │                     MultiAssetOrchestrator                          │
//! │   StrategyRunner (per instrument) ──▶ merge ──▶ chronological replay│
//! ├─────────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────┐               │
//! │  │ Simulation   │  │ Risk         │  │ Position     │               │
//! │  │ Clock        │─▶│ Governor     │─▶│ Ledger       │               │
//! │  └──────────────┘  └──────┬───────┘  └──────┬───────┘               │
//! │                           │                 │                       │
//! │                  ┌────────▼───────┐  ┌──────▼───────┐               │
//! │                  │ Correlation    │  │ Portfolio    │               │
//! │                  │ Analyzer       │  │ Metrics      │               │
//! │                  └────────────────┘  └──────────────┘               │
//! └─────────────────────────────────────────────────────────────────────┘
//!
//!   Validators (independent of the replay):
//!   MonteCarloSimulator · WalkForwardValidator · RegimeDetector
//! ```
//!
//! # Key Concepts
//!
//! ## Determinism
//! - One simulated time axis that never moves backwards
//! - Strategy trades merged by open instant, ties broken by instrument
//! - Every random draw comes from a seed derived from `(seed, index)`
//!
//! ## No look-ahead
//! - Risk decisions at instant T read only ledger and correlation state up to T
//! - Regimes are classified from past candles and trades keep the regime of
//!   their open instant
//!
//! ## Run context
//! - Each run gets a [`RunContext`] carrying its id, cancellation token,
//!   progress sink and step budget; nothing is process-global

#![warn(clippy::all)]
#![allow(clippy::pedantic)]

pub mod clock;
pub mod config;
pub mod context;
pub mod correlation;
pub mod error;
pub mod ledger;
pub mod metrics;
pub mod monte_carlo;
pub mod orchestrator;
pub mod providers;
pub mod regime;
pub mod risk;
pub mod types;
pub mod walk_forward;

pub use clock::{ClockState, SimulationClock, TickEvent};
pub use config::{EngineConfig, ResamplingMethod};
pub use context::{CancellationToken, ProgressUpdate, RunContext};
pub use correlation::{CorrelationAnalyzer, CorrelationMatrix, CorrelationStrength};
pub use error::{EngineError, Result, TemporalViolation};
pub use ledger::{ClosedTrade, Ledger, LedgerError, LedgerSnapshot, OpenPosition, PositionId};
pub use metrics::{MetricsCalculator, PortfolioMetrics, TradeStatistics};
pub use monte_carlo::{MonteCarloReport, MonteCarloSimulator};
pub use orchestrator::{MultiAssetOrchestrator, OrchestratorPhase, OrchestratorReport};
pub use providers::{InstrumentSpec, PriceDataSource, ProviderError, StrategyRequest, StrategyRunner};
pub use regime::{MarketRegime, RegimeDetector, RegimePeriod, RegimeReport};
pub use risk::{MarginStatus, RiskDecision, RiskGovernor, RiskRule, RiskViolation, RiskWarning};
pub use types::{Candle, DateRange, Direction, SimInstant, StrategyTrade, Timeframe, TradeProposal};
pub use walk_forward::{WalkForwardReport, WalkForwardValidator, WalkForwardWindow};

/// Install the tracing subscriber described by the observability section.
///
/// Safe to call more than once; later calls leave the first subscriber in
/// place.
pub fn init_tracing(config: &EngineConfig) {
    zero_common::logging::init_logging(&config.observability.log_level, &config.observability.log_format);
}
