//! Property tests for the accounting and resampling invariants.

mod common;

use chrono::Duration;
use proptest::prelude::*;

use common::{at, candle};
use zero_portfolio::config::{LedgerConfig, MonteCarloConfig, RegimeConfig};
use zero_portfolio::{
    Direction, Ledger, MonteCarloSimulator, RegimeDetector, ResamplingMethod, RunContext,
};

const INSTRUMENTS: [(&str, f64); 3] = [("EURUSD", 1.10), ("GBPUSD", 1.27), ("AUDUSD", 0.66)];

#[derive(Debug, Clone)]
enum LedgerOp {
    Open { instrument: usize, long: bool, drift: f64, size: f64 },
    Mark { instrument: usize, drift: f64 },
    Close { pick: usize, commission: f64 },
}

fn ledger_op() -> impl Strategy<Value = LedgerOp> {
    prop_oneof![
        (0..3usize, any::<bool>(), -0.01..0.01f64, 0.01..2.0f64).prop_map(
            |(instrument, long, drift, size)| LedgerOp::Open { instrument, long, drift, size }
        ),
        (0..3usize, -0.02..0.02f64).prop_map(|(instrument, drift)| LedgerOp::Mark { instrument, drift }),
        (any::<usize>(), 0.0..5.0f64).prop_map(|(pick, commission)| LedgerOp::Close { pick, commission }),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_ledger_equity_identity(ops in prop::collection::vec(ledger_op(), 1..60)) {
        let start = at(2024, 1, 1, 0);
        let mut ledger = Ledger::new(LedgerConfig::default(), start).unwrap();

        for (step, op) in ops.iter().enumerate() {
            let instant = start + Duration::minutes(step as i64 + 1);
            match op {
                LedgerOp::Open { instrument, long, drift, size } => {
                    let (name, base) = INSTRUMENTS[*instrument];
                    let direction = if *long { Direction::Long } else { Direction::Short };
                    // Margin refusals are part of the model
                    let _ = ledger.open_position(name, direction, base * (1.0 + drift), *size, instant);
                }
                LedgerOp::Mark { instrument, drift } => {
                    let (name, base) = INSTRUMENTS[*instrument];
                    ledger.update_price(name, base * (1.0 + drift)).unwrap();
                }
                LedgerOp::Close { pick, commission } => {
                    let open: Vec<_> = ledger.open_positions().map(|p| (p.id, p.current_price)).collect();
                    if !open.is_empty() {
                        let (id, price) = open[pick % open.len()];
                        ledger.close_position(id, price, instant, *commission).unwrap();
                    }
                }
            }

            let unrealized: f64 = ledger.open_positions().map(|p| p.unrealized_pnl).sum();
            prop_assert!((ledger.equity() - (ledger.balance() + unrealized)).abs() < 1e-6);
            prop_assert!((ledger.unrealized_pnl() - unrealized).abs() < 1e-6);
            prop_assert!(ledger.used_margin() >= 0.0);

            let realized: f64 = ledger.closed_trades().iter().map(|t| t.realized_pnl).sum();
            prop_assert!((ledger.balance() - (ledger.initial_balance() + realized)).abs() < 1e-6);
        }
    }

    #[test]
    fn prop_regime_periods_partition_candles(closes in prop::collection::vec(50.0..150.0f64, 1..80)) {
        let start = at(2024, 1, 1, 0);
        let candles: Vec<_> = closes
            .iter()
            .enumerate()
            .map(|(i, close)| candle(start + Duration::hours(i as i64), *close))
            .collect();
        let detector = RegimeDetector::new(RegimeConfig { lookback: 5, ..Default::default() }).unwrap();

        let periods = detector.detect_periods(&candles).unwrap();
        prop_assert_eq!(periods.iter().map(|p| p.candles).sum::<usize>(), candles.len());
        for pair in periods.windows(2) {
            prop_assert_eq!(pair[0].end, pair[1].start);
            prop_assert_ne!(pair[0].regime, pair[1].regime);
        }
        for c in &candles {
            prop_assert_eq!(periods.iter().filter(|p| p.contains(c.timestamp)).count(), 1);
        }
    }

    #[test]
    fn prop_monte_carlo_independent_of_parallelism(
        pnls in prop::collection::vec(-200.0..200.0f64, 10..40),
        seed in any::<u64>(),
    ) {
        let simulator = |parallel: bool| {
            MonteCarloSimulator::new(MonteCarloConfig {
                trials: 60,
                seed,
                parallel,
                method: ResamplingMethod::BlockBootstrap,
                ..Default::default()
            })
            .unwrap()
        };

        let a = simulator(true).run(&pnls, &RunContext::new()).unwrap();
        let b = simulator(false).run(&pnls, &RunContext::new()).unwrap();
        prop_assert_eq!(a.trials_completed, 60);
        prop_assert_eq!(&a.final_equity, &b.final_equity);
        prop_assert_eq!(&a.worst_trials, &b.worst_trials);
        prop_assert_eq!(a.probability_of_ruin, b.probability_of_ruin);
    }
}
