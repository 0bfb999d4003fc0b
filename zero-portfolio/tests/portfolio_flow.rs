//! Integration tests for the portfolio replay path.
//!
//! Ledger, risk governor and correlation analyzer used together, and the
//! orchestrator driving all of them from fake strategy runners.

mod common;

use std::sync::{Arc, Mutex};

use common::{at, date, ScriptedRunner, SeededRunner};
use zero_portfolio::config::{CorrelationConfig, LedgerConfig, RiskConfig};
use zero_portfolio::{
    CancellationToken, CorrelationAnalyzer, DateRange, Direction, EngineConfig, EngineError,
    InstrumentSpec, Ledger, MultiAssetOrchestrator, OrchestratorPhase, RiskGovernor, RunContext,
    StrategyTrade, TradeProposal,
};

// ============================================================================
// Ledger + Governor
// ============================================================================

fn ledger() -> Ledger {
    Ledger::new(LedgerConfig::default(), at(2024, 3, 4, 0)).unwrap()
}

fn analyzer() -> CorrelationAnalyzer {
    CorrelationAnalyzer::new(CorrelationConfig::default()).unwrap()
}

#[test]
fn test_eurusd_one_lot_marks_to_10100() {
    let mut ledger = ledger();
    ledger
        .open_position("EURUSD", Direction::Long, 1.1000, 1.0, at(2024, 3, 4, 9))
        .unwrap();
    ledger.update_price("EURUSD", 1.1010).unwrap();

    assert!((ledger.unrealized_pnl() - 100.0).abs() < 1e-6);
    assert!((ledger.equity() - 10_100.0).abs() < 1e-6);
    assert!((ledger.used_margin() - 220.0).abs() < 1e-9);
}

#[test]
fn test_position_limit_rejects_then_accepts_after_close() {
    let mut ledger = ledger();
    let correlation = analyzer();
    let mut governor = RiskGovernor::new(RiskConfig {
        max_total_positions: 1,
        ..Default::default()
    })
    .unwrap();

    let first = TradeProposal::new("EURUSD", Direction::Long, 0.1, 1.1000).with_stop(1.0980);
    let t1 = at(2024, 3, 4, 9);
    assert!(governor.validate_order(&first, t1, &ledger, &correlation).is_allowed());
    let id = ledger.open_from_proposal(&first, t1).unwrap();

    let second = TradeProposal::new("GBPUSD", Direction::Short, 0.1, 1.2700).with_stop(1.2720);
    let t2 = at(2024, 3, 4, 10);
    let decision = governor.validate_order(&second, t2, &ledger, &correlation);
    assert_eq!(decision.reason_code(), Some("MAX_TOTAL_POSITIONS"));

    ledger.close_position(id, 1.1005, at(2024, 3, 4, 11), 0.0).unwrap();
    let decision = governor.validate_order(&second, at(2024, 3, 4, 12), &ledger, &correlation);
    assert!(decision.is_allowed());

    let stats = governor.stats();
    assert_eq!(stats.evaluated, 3);
    assert_eq!(stats.rejected, 1);
    assert_eq!(governor.violations().len(), 1);
}

#[test]
fn test_total_positions_reported_before_trade_risk() {
    let mut ledger = ledger();
    let correlation = analyzer();
    let mut governor = RiskGovernor::new(RiskConfig {
        max_total_positions: 1,
        ..Default::default()
    })
    .unwrap();
    ledger
        .open_position("EURUSD", Direction::Long, 1.1, 0.1, at(2024, 3, 4, 9))
        .unwrap();

    // 500 pip stop on one lot risks far more than 2 % of equity
    let risky = TradeProposal::new("GBPUSD", Direction::Long, 1.0, 1.2700).with_stop(1.2200);
    let decision = governor.validate_order(&risky, at(2024, 3, 4, 10), &ledger, &correlation);
    assert_eq!(decision.reason_code(), Some("MAX_TOTAL_POSITIONS"));
}

#[test]
fn test_correlation_matrix_recompute_is_identical() {
    let mut correlation = analyzer();
    for day in 1..=20u32 {
        let t = at(2024, 1, day, 23);
        let x = (day as f64 * 0.7).sin() / 100.0;
        correlation.add_return("EURUSD", t, x).unwrap();
        correlation.add_return("GBPUSD", t, x * 0.8 + 0.0001).unwrap();
        correlation.add_return("USDJPY", t, -x).unwrap();
    }

    let first = correlation.compute_matrix();
    let second = correlation.compute_matrix();
    assert_eq!(first, second);
    assert_eq!(correlation.history().count(), 1);
    assert!(first.get("EURUSD", "GBPUSD").unwrap() > 0.99);
    assert!(first.get("EURUSD", "USDJPY").unwrap() < -0.99);
}

// ============================================================================
// Orchestrator
// ============================================================================

fn quarter() -> DateRange {
    DateRange::new(date(2024, 1, 1), date(2024, 4, 1))
}

fn orchestrator(config: EngineConfig) -> MultiAssetOrchestrator {
    let mut orchestrator = MultiAssetOrchestrator::new(config).unwrap();
    for instrument in ["EURUSD", "GBPUSD", "AUDUSD"] {
        orchestrator.register_instrument(InstrumentSpec::new(instrument));
    }
    orchestrator
}

#[test]
fn test_orchestrated_run_balances_to_realized_trades() {
    let report = orchestrator(EngineConfig::default())
        .run(&SeededRunner::new(), quarter(), &RunContext::new())
        .unwrap();

    assert_eq!(report.phase, OrchestratorPhase::Done);
    assert!(report.failed.is_empty());
    assert!(report.trades_generated > 150);
    assert_eq!(
        report.trades_generated,
        report.trades_executed + report.trades_rejected + report.ledger_refusals.len()
    );
    assert_eq!(report.closed_trades.len(), report.trades_executed);

    let realized: f64 = report.closed_trades.iter().map(|t| t.realized_pnl).sum();
    assert!((report.final_balance - (10_000.0 + realized)).abs() < 1e-6);
    assert!((report.final_equity - report.final_balance).abs() < 1e-9);

    let metrics = report.metrics.as_ref().unwrap();
    assert_eq!(metrics.trades.total_trades, report.closed_trades.len());
    assert_eq!(metrics.attribution.len(), 3);

    let matrix = report.correlation.as_ref().unwrap();
    assert_eq!(matrix.len(), 3);
    assert!(report.diversification_score >= 0.0 && report.diversification_score <= 100.0);
}

#[test]
fn test_orchestrated_run_is_deterministic() {
    let a = orchestrator(EngineConfig::default())
        .run(&SeededRunner::new(), quarter(), &RunContext::new())
        .unwrap();
    let mut sequential = EngineConfig::default();
    sequential.orchestrator.parallel = false;
    let b = orchestrator(sequential)
        .run(&SeededRunner::new(), quarter(), &RunContext::new())
        .unwrap();

    assert_eq!(a.closed_trades, b.closed_trades);
    assert_eq!(a.equity_curve, b.equity_curve);
    assert_eq!(a.violations, b.violations);
}

#[test]
fn test_failed_instrument_does_not_abort_others() {
    let report = orchestrator(EngineConfig::default())
        .run(&SeededRunner::failing("GBPUSD"), quarter(), &RunContext::new())
        .unwrap();

    assert_eq!(report.phase, OrchestratorPhase::Done);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].instrument, "GBPUSD");
    assert!(report.closed_trades.iter().all(|t| t.instrument != "GBPUSD"));
    assert_eq!(report.instruments, vec!["EURUSD", "AUDUSD"]);
}

#[test]
fn test_cancellation_during_simulation_aborts() {
    let token = CancellationToken::new();
    let trigger = token.clone();
    let ctx = RunContext::new()
        .with_cancellation(token)
        .with_progress(move |update| {
            if update.phase == "SIMULATING" {
                trigger.cancel();
            }
        });

    let mut config = EngineConfig::default();
    config.orchestrator.parallel = false;
    let report = orchestrator(config).run(&SeededRunner::new(), quarter(), &ctx).unwrap();

    assert_eq!(report.phase, OrchestratorPhase::Aborted);
    assert!(report.metrics.is_none());
    assert!(report.closed_trades.is_empty());
}

#[test]
fn test_step_budget_stops_replay_with_partial_report() {
    // One step per instrument, then five replay instants
    let ctx = RunContext::new().with_step_budget(3 + 5);
    let report = orchestrator(EngineConfig::default())
        .run(&SeededRunner::new(), quarter(), &ctx)
        .unwrap();

    assert_eq!(report.phase, OrchestratorPhase::Aborted);
    assert_eq!(report.equity_curve.len(), 5);
    assert!(report.metrics.is_some());
}

#[test]
fn test_progress_reports_every_phase() {
    let phases = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&phases);
    let ctx = RunContext::new().with_progress(move |update| {
        sink.lock().unwrap().push((update.phase.clone(), update.percent_complete));
    });

    orchestrator(EngineConfig::default())
        .run(&SeededRunner::new(), quarter(), &ctx)
        .unwrap();

    let phases = phases.lock().unwrap();
    let names: Vec<&str> = phases.iter().map(|(p, _)| p.as_str()).collect();
    assert_eq!(names.first(), Some(&"LOADING"));
    assert!(names.iter().filter(|p| **p == "SIMULATING").count() >= 3);
    assert!(names.contains(&"ANALYZING"));
    assert_eq!(names.last(), Some(&"DONE"));
    assert!(phases.iter().all(|(_, pct)| (0.0..=100.0).contains(pct)));
}

#[test]
fn test_rejected_trades_are_dropped_not_deferred() {
    let trade = |instrument: &str, open_h: u32, close_h: u32| StrategyTrade {
        instrument: instrument.into(),
        direction: Direction::Long,
        size: 0.1,
        entry_price: 1.1,
        exit_price: 1.1,
        opened_at: at(2024, 1, 2, open_h),
        closed_at: at(2024, 1, 2, close_h),
        stop_loss: Some(1.099),
        take_profit: None,
        commission: 0.0,
    };
    let runner = ScriptedRunner::new(vec![
        trade("EURUSD", 9, 12),
        trade("GBPUSD", 10, 11),
        trade("AUDUSD", 13, 14),
    ]);
    let mut config = EngineConfig::default();
    config.risk.max_total_positions = 1;

    let report = orchestrator(config).run(&runner, quarter(), &RunContext::new()).unwrap();
    assert_eq!(report.trades_executed, 2);
    assert_eq!(report.trades_rejected, 1);
    assert_eq!(report.violations[0].instrument, "GBPUSD");
    let executed: Vec<&str> = report.closed_trades.iter().map(|t| t.instrument.as_str()).collect();
    assert_eq!(executed, vec!["EURUSD", "AUDUSD"]);
}

#[test]
fn test_empty_orchestrator_is_insufficient_data() {
    let orchestrator = MultiAssetOrchestrator::new(EngineConfig::default()).unwrap();
    let err = orchestrator
        .run(&SeededRunner::new(), quarter(), &RunContext::new())
        .unwrap_err();
    assert!(matches!(err, EngineError::InsufficientData { .. }));
}
