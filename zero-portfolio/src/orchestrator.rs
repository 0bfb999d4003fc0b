//! Multi-asset orchestrator.
//!
//! Runs each registered instrument's strategy in isolation, merges the
//! resulting trades into one chronological stream and replays that stream
//! through the risk governor into a shared ledger.
//!
//! ```text
//!   LOADING ──▶ SIMULATING ──▶ ANALYZING ──▶ DONE
//!      │            │              │
//!      └────────────┴──────────────┴──▶ ABORTED (cancellation)
//! ```
//!
//! Strategy simulations may run in parallel. The replay is strictly
//! sequential: at each distinct instant the closes falling due are applied
//! first, then the proposals opening at that instant, in merge order.

use chrono::NaiveDate;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use uuid::Uuid;

use crate::clock::SimulationClock;
use crate::config::EngineConfig;
use crate::context::RunContext;
use crate::correlation::{CorrelationAnalyzer, CorrelationMatrix, CorrelationShift};
use crate::error::{EngineError, Result};
use crate::ledger::{ClosedTrade, Ledger, LedgerError, PositionId};
use crate::metrics::{MetricsCalculator, PortfolioMetrics};
use crate::providers::{derive_seed, InstrumentSpec, StrategyRequest, StrategyRunner};
use crate::risk::{MarginStatus, RiskDecision, RiskGovernor, RiskStats, RiskViolation};
use crate::types::{end_of_day, DateRange, SimInstant, StrategyTrade};
use zero_common::Validate;

/// Replay instants between progress updates
const REPLAY_PROGRESS_EVERY: usize = 1000;

// ============================================================================
// Report types
// ============================================================================

/// Orchestrator phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrchestratorPhase {
    Loading,
    Simulating,
    Analyzing,
    Done,
    Aborted,
}

impl OrchestratorPhase {
    /// Upper-case phase label used in progress updates
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Loading => "LOADING",
            Self::Simulating => "SIMULATING",
            Self::Analyzing => "ANALYZING",
            Self::Done => "DONE",
            Self::Aborted => "ABORTED",
        }
    }
}

/// An instrument excluded from the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstrumentFailure {
    pub instrument: String,
    pub reason: String,
}

/// A proposal the governor allowed but the ledger could not fund
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerRefusal {
    pub instrument: String,
    pub instant: SimInstant,
    pub reason: String,
}

/// Result of an orchestrated run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrchestratorReport {
    /// Run identifier
    pub run_id: Uuid,
    /// Final phase (`Done` or `Aborted`)
    pub phase: OrchestratorPhase,
    /// Simulated range
    pub range: DateRange,
    /// Instruments that produced trades
    pub instruments: Vec<String>,
    /// Instruments whose simulation failed
    pub failed: Vec<InstrumentFailure>,
    /// Trades produced by all strategy runs
    pub trades_generated: usize,
    /// Proposals that became positions
    pub trades_executed: usize,
    /// Proposals rejected by the governor
    pub trades_rejected: usize,
    /// Governor rejections
    pub violations: Vec<RiskViolation>,
    /// Allowed proposals the ledger refused
    pub ledger_refusals: Vec<LedgerRefusal>,
    /// Positions closed by stop-out liquidation
    pub liquidations: usize,
    /// Realized trades
    pub closed_trades: Vec<ClosedTrade>,
    /// Equity after every replayed instant
    pub equity_curve: Vec<(SimInstant, f64)>,
    /// Final balance
    pub final_balance: f64,
    /// Final equity
    pub final_equity: f64,
    /// Portfolio metrics
    pub metrics: Option<PortfolioMetrics>,
    /// Correlation of daily strategy returns at the end of the run
    pub correlation: Option<CorrelationMatrix>,
    /// Diversification score of the final matrix
    pub diversification_score: f64,
    /// Correlation shifts detected during the replay
    pub correlation_shifts: Vec<CorrelationShift>,
    /// Governor statistics
    pub risk_stats: RiskStats,
}

impl OrchestratorReport {
    /// Whether the run finished without cancellation
    pub fn is_complete(&self) -> bool {
        self.phase == OrchestratorPhase::Done
    }
}

// ============================================================================
// Orchestrator
// ============================================================================

enum SimulationOutcome {
    Completed(Vec<StrategyTrade>),
    Failed(String),
    Skipped,
}

/// Multi-asset orchestrator
#[derive(Debug, Clone)]
pub struct MultiAssetOrchestrator {
    config: EngineConfig,
    instruments: Vec<InstrumentSpec>,
}

impl MultiAssetOrchestrator {
    /// Create an orchestrator
    pub fn new(config: EngineConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            instruments: Vec::new(),
        })
    }

    /// Register an instrument. Returns false if it was already registered.
    pub fn register_instrument(&mut self, spec: InstrumentSpec) -> bool {
        if self.instruments.iter().any(|s| s.instrument == spec.instrument) {
            return false;
        }
        self.instruments.push(spec);
        true
    }

    /// Unregister an instrument. Returns false if it was not registered.
    pub fn unregister_instrument(&mut self, instrument: &str) -> bool {
        let before = self.instruments.len();
        self.instruments.retain(|s| s.instrument != instrument);
        before != self.instruments.len()
    }

    /// Registered instruments, in registration order
    pub fn instruments(&self) -> &[InstrumentSpec] {
        &self.instruments
    }

    /// Run every registered instrument over `range` and replay the merged
    /// trade stream.
    pub fn run(
        &self,
        runner: &dyn StrategyRunner,
        range: DateRange,
        ctx: &RunContext,
    ) -> Result<OrchestratorReport> {
        // LOADING
        if self.instruments.is_empty() {
            return Err(EngineError::insufficient("orchestrator instruments", 1, 0));
        }
        if range.is_empty() {
            return Err(EngineError::invalid_input("orchestrator range", format!("empty range {}", range)));
        }

        tracing::info!(
            run_id = %ctx.run_id(),
            runner = runner.name(),
            instruments = self.instruments.len(),
            range = %range,
            "Orchestrator loading"
        );
        ctx.report(OrchestratorPhase::Loading.as_str(), 0, 1, "preparing components");

        let ledger = Ledger::new(self.config.ledger.clone(), range.start_instant())?;
        let governor = RiskGovernor::new(self.config.risk.clone())?;
        let mut correlation = CorrelationAnalyzer::new(self.config.correlation.clone())?;
        let calculator = MetricsCalculator::new(self.config.metrics.clone())?;
        for spec in &self.instruments {
            correlation.register_instrument(spec.instrument.clone());
        }

        // SIMULATING
        tracing::info!(run_id = %ctx.run_id(), "Simulating instruments");
        let outcomes = self.simulate_all(runner, &range, ctx);

        let mut failed = Vec::new();
        let mut instruments = Vec::new();
        let mut merged: Vec<StrategyTrade> = Vec::new();
        let mut skipped = false;
        for (spec, outcome) in self.instruments.iter().zip(outcomes) {
            match outcome {
                SimulationOutcome::Completed(trades) => {
                    instruments.push(spec.instrument.clone());
                    merged.extend(trades);
                }
                SimulationOutcome::Failed(reason) => {
                    tracing::warn!(instrument = %spec.instrument, reason = %reason, "Instrument excluded");
                    failed.push(InstrumentFailure {
                        instrument: spec.instrument.clone(),
                        reason,
                    });
                }
                SimulationOutcome::Skipped => skipped = true,
            }
        }

        // Ties on the open instant break by instrument name
        merged.sort_by(|a, b| {
            a.opened_at
                .cmp(&b.opened_at)
                .then_with(|| a.instrument.cmp(&b.instrument))
        });

        let mut replay = Replay::new(ledger, governor, correlation, &merged, &self.config);

        if skipped || ctx.should_stop() {
            tracing::warn!(run_id = %ctx.run_id(), "Run cancelled during simulation");
            return Ok(replay.into_report(
                ctx.run_id(),
                OrchestratorPhase::Aborted,
                range,
                instruments,
                failed,
                None,
            ));
        }

        let completed = replay.run(&merged, &self.instruments, ctx)?;

        // ANALYZING
        ctx.report(OrchestratorPhase::Analyzing.as_str(), 0, 1, "computing portfolio metrics");
        tracing::info!(run_id = %ctx.run_id(), "Analyzing portfolio");
        // An aborted replay keeps only the days it already flushed
        if completed {
            replay.flush_days(NaiveDate::MAX)?;
        }
        let metrics = calculator.calculate(
            replay.ledger.closed_trades(),
            &replay.ledger.equity_curve(),
            replay.ledger.initial_balance(),
            None,
        );

        let phase = if completed {
            OrchestratorPhase::Done
        } else {
            tracing::warn!(run_id = %ctx.run_id(), "Run cancelled during replay");
            OrchestratorPhase::Aborted
        };
        ctx.report(phase.as_str(), 1, 1, "run finished");

        let report = replay.into_report(ctx.run_id(), phase, range, instruments, failed, Some(metrics));
        tracing::info!(
            run_id = %report.run_id,
            phase = phase.as_str(),
            executed = report.trades_executed,
            rejected = report.trades_rejected,
            final_equity = report.final_equity,
            "Orchestrator finished"
        );
        Ok(report)
    }

    fn simulate_all(
        &self,
        runner: &dyn StrategyRunner,
        range: &DateRange,
        ctx: &RunContext,
    ) -> Vec<SimulationOutcome> {
        let total = self.instruments.len();
        let finished = AtomicUsize::new(0);

        let simulate = |(index, spec): (usize, &InstrumentSpec)| {
            if ctx.should_stop() {
                return SimulationOutcome::Skipped;
            }
            let request = StrategyRequest {
                instrument: spec.instrument.clone(),
                parameters: spec.parameters.clone(),
                range: *range,
                seed: derive_seed(self.config.orchestrator.seed, index as u64),
            };

            let outcome = match runner.run(&request) {
                Ok(trades) => match check_trades(&spec.instrument, range, &trades) {
                    Ok(()) => SimulationOutcome::Completed(trades),
                    Err(reason) => SimulationOutcome::Failed(reason),
                },
                Err(e) => SimulationOutcome::Failed(e.to_string()),
            };

            ctx.consume_step();
            let done = finished.fetch_add(1, Ordering::Relaxed) + 1;
            ctx.report(
                OrchestratorPhase::Simulating.as_str(),
                done,
                total,
                format!("{} simulated", spec.instrument),
            );
            outcome
        };

        if self.config.orchestrator.parallel {
            self.instruments.par_iter().enumerate().map(simulate).collect()
        } else {
            self.instruments.iter().enumerate().map(simulate).collect()
        }
    }
}

/// Reject strategy output that breaks the trade contract
fn check_trades(instrument: &str, range: &DateRange, trades: &[StrategyTrade]) -> std::result::Result<(), String> {
    for (index, trade) in trades.iter().enumerate() {
        if trade.instrument != instrument {
            return Err(format!("trade {} is for {}, expected {}", index, trade.instrument, instrument));
        }
        if trade.closed_at < trade.opened_at {
            return Err(format!("trade {} closes before it opens", index));
        }
        if !range.contains_instant(trade.opened_at) {
            return Err(format!("trade {} opens outside {}", index, range));
        }
        let valid = |v: f64| v.is_finite() && v > 0.0;
        if !(valid(trade.entry_price) && valid(trade.exit_price) && valid(trade.size)) {
            return Err(format!("trade {} has a non-positive price or size", index));
        }
    }
    Ok(())
}

// ============================================================================
// Replay
// ============================================================================

struct ScheduledClose {
    closed_at: SimInstant,
    instrument: String,
    seq: usize,
    position: PositionId,
    exit_price: f64,
    commission: f64,
}

struct Replay {
    ledger: Ledger,
    governor: RiskGovernor,
    correlation: CorrelationAnalyzer,
    enforce_stop_out: bool,
    pending: Vec<ScheduledClose>,
    daily_returns: Vec<(NaiveDate, Vec<(String, f64)>)>,
    day_cursor: usize,
    trades_generated: usize,
    executed: usize,
    rejected: usize,
    refusals: Vec<LedgerRefusal>,
    liquidations: usize,
    shifts: Vec<CorrelationShift>,
}

impl Replay {
    fn new(
        ledger: Ledger,
        governor: RiskGovernor,
        correlation: CorrelationAnalyzer,
        merged: &[StrategyTrade],
        config: &EngineConfig,
    ) -> Self {
        let daily_returns = daily_strategy_returns(merged, &ledger, &correlation.instruments());
        Self {
            ledger,
            governor,
            correlation,
            enforce_stop_out: config.risk.enforce_stop_out,
            pending: Vec::new(),
            daily_returns,
            day_cursor: 0,
            trades_generated: merged.len(),
            executed: 0,
            rejected: 0,
            refusals: Vec::new(),
            liquidations: 0,
            shifts: Vec::new(),
        }
    }

    /// Replay the merged stream. Returns false when cancelled.
    fn run(&mut self, merged: &[StrategyTrade], specs: &[InstrumentSpec], ctx: &RunContext) -> Result<bool> {
        let instants: BTreeSet<SimInstant> = merged
            .iter()
            .flat_map(|t| [t.opened_at, t.closed_at])
            .collect();
        let (Some(&start), Some(&end)) = (instants.first(), instants.last()) else {
            return Ok(true);
        };

        let mut clock = SimulationClock::new(start, end)?;
        for spec in specs {
            clock.register_instrument(spec.instrument.clone());
        }
        clock.run()?;

        let total = instants.len();
        let mut opens = merged.iter().enumerate().peekable();
        let mut completed = true;

        for (step, &instant) in instants.iter().enumerate() {
            if ctx.should_stop() {
                completed = false;
                break;
            }

            clock.advance_to(instant)?;
            self.governor.observe_equity(instant, self.ledger.equity());
            self.flush_days(instant.date_naive())?;

            self.apply_due_closes(instant)?;
            while let Some((seq, trade)) = opens.next_if(|(_, t)| t.opened_at == instant) {
                self.submit(seq, trade, instant)?;
            }
            // Trades that open and close on the same instant
            self.apply_due_closes(instant)?;

            self.enforce_margin(instant)?;
            self.ledger.record_snapshot(instant);
            ctx.consume_step();

            if (step + 1) % REPLAY_PROGRESS_EVERY == 0 {
                ctx.report(
                    OrchestratorPhase::Simulating.as_str(),
                    step + 1,
                    total,
                    format!("replayed up to {}", instant),
                );
            }
        }

        clock.stop();
        Ok(completed)
    }

    fn submit(&mut self, seq: usize, trade: &StrategyTrade, instant: SimInstant) -> Result<()> {
        self.ledger.update_price(&trade.instrument, trade.entry_price)?;
        let proposal = trade.to_proposal();

        match self
            .governor
            .validate_order(&proposal, instant, &self.ledger, &self.correlation)
        {
            RiskDecision::Allowed { .. } => match self.ledger.open_from_proposal(&proposal, instant) {
                Ok(position) => {
                    self.executed += 1;
                    self.pending.push(ScheduledClose {
                        closed_at: trade.closed_at,
                        instrument: trade.instrument.clone(),
                        seq,
                        position,
                        exit_price: trade.exit_price,
                        commission: trade.commission,
                    });
                }
                Err(EngineError::Ledger(err @ LedgerError::InsufficientMargin { .. })) => {
                    tracing::warn!(instrument = %trade.instrument, reason = %err, "Ledger refused proposal");
                    self.refusals.push(LedgerRefusal {
                        instrument: trade.instrument.clone(),
                        instant,
                        reason: err.to_string(),
                    });
                }
                Err(other) => return Err(other),
            },
            RiskDecision::Rejected { .. } => self.rejected += 1,
        }
        Ok(())
    }

    fn apply_due_closes(&mut self, instant: SimInstant) -> Result<()> {
        let (mut due, rest): (Vec<ScheduledClose>, Vec<ScheduledClose>) =
            std::mem::take(&mut self.pending)
                .into_iter()
                .partition(|c| c.closed_at <= instant);
        self.pending = rest;

        due.sort_by(|a, b| {
            a.closed_at
                .cmp(&b.closed_at)
                .then_with(|| a.instrument.cmp(&b.instrument))
                .then_with(|| a.seq.cmp(&b.seq))
        });

        for close in due {
            // Already liquidated
            if self.ledger.position(close.position).is_none() {
                continue;
            }
            self.ledger.update_price(&close.instrument, close.exit_price)?;
            self.ledger
                .close_position(close.position, close.exit_price, close.closed_at, close.commission)?;
        }
        Ok(())
    }

    fn enforce_margin(&mut self, instant: SimInstant) -> Result<()> {
        if self.governor.margin_status(&self.ledger) != MarginStatus::StopOut || !self.enforce_stop_out {
            return Ok(());
        }

        let open: Vec<(PositionId, f64)> = self
            .ledger
            .open_positions()
            .map(|p| (p.id, p.current_price))
            .collect();
        for (id, price) in open {
            self.ledger.close_position(id, price, instant, 0.0)?;
            self.liquidations += 1;
        }
        tracing::warn!(instant = %instant, equity = self.ledger.equity(), "Stop-out liquidation");
        Ok(())
    }

    /// Push strategy returns of every day before `today` into the analyzer
    fn flush_days(&mut self, today: NaiveDate) -> Result<()> {
        while let Some((date, returns)) = self.daily_returns.get(self.day_cursor) {
            if *date >= today {
                break;
            }
            let stamp = end_of_day(*date);
            for (instrument, value) in returns {
                self.correlation.add_return(instrument, stamp, *value)?;
            }
            self.day_cursor += 1;

            self.correlation.compute_matrix_at(stamp);
            self.shifts.extend(self.correlation.detect_regime_shift());
        }
        Ok(())
    }

    fn into_report(
        self,
        run_id: Uuid,
        phase: OrchestratorPhase,
        range: DateRange,
        instruments: Vec<String>,
        failed: Vec<InstrumentFailure>,
        metrics: Option<PortfolioMetrics>,
    ) -> OrchestratorReport {
        let correlation = self.correlation.latest_matrix().cloned();
        OrchestratorReport {
            run_id,
            phase,
            range,
            instruments,
            failed,
            trades_generated: self.trades_generated,
            trades_executed: self.executed,
            trades_rejected: self.rejected,
            violations: self.governor.violations().to_vec(),
            ledger_refusals: self.refusals,
            liquidations: self.liquidations,
            closed_trades: self.ledger.closed_trades().to_vec(),
            equity_curve: self.ledger.equity_curve(),
            final_balance: self.ledger.balance(),
            final_equity: self.ledger.equity(),
            metrics,
            diversification_score: self.correlation.diversification_score(),
            correlation,
            correlation_shifts: self.shifts,
            risk_stats: self.governor.stats().clone(),
        }
    }
}

/// Daily net strategy P&L per instrument as a fraction of the initial
/// balance, keyed by close date. Every instrument gets a value on every day.
fn daily_strategy_returns(
    trades: &[StrategyTrade],
    ledger: &Ledger,
    instruments: &[String],
) -> Vec<(NaiveDate, Vec<(String, f64)>)> {
    let initial = ledger.initial_balance();
    let mut by_day: BTreeMap<NaiveDate, BTreeMap<&str, f64>> = BTreeMap::new();
    for trade in trades {
        let pnl = trade.price_pnl() * ledger.contract_size_for(&trade.instrument) - trade.commission;
        *by_day
            .entry(trade.closed_at.date_naive())
            .or_default()
            .entry(trade.instrument.as_str())
            .or_insert(0.0) += pnl / initial;
    }

    by_day
        .into_iter()
        .map(|(date, values)| {
            let row = instruments
                .iter()
                .map(|i| (i.clone(), values.get(i.as_str()).copied().unwrap_or(0.0)))
                .collect();
            (date, row)
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================
