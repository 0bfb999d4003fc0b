//! Shared fakes for the integration tests.

#![allow(dead_code)]

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};

use zero_portfolio::types::start_of_day;
use zero_portfolio::{
    Candle, DateRange, Direction, PriceDataSource, ProviderError, SimInstant, StrategyRequest,
    StrategyRunner, StrategyTrade, Timeframe,
};

// ============================================================================
// Time helpers
// ============================================================================

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn at(y: i32, m: u32, d: u32, h: u32) -> SimInstant {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
}

// ============================================================================
// Strategy runners
// ============================================================================

/// Returns a fixed trade list per instrument
pub struct ScriptedRunner {
    pub trades: BTreeMap<String, Vec<StrategyTrade>>,
    pub calls: AtomicU32,
}

impl ScriptedRunner {
    pub fn new(trades: Vec<StrategyTrade>) -> Self {
        let mut by_instrument: BTreeMap<String, Vec<StrategyTrade>> = BTreeMap::new();
        for trade in trades {
            by_instrument.entry(trade.instrument.clone()).or_default().push(trade);
        }
        Self {
            trades: by_instrument,
            calls: AtomicU32::new(0),
        }
    }
}

impl StrategyRunner for ScriptedRunner {
    fn name(&self) -> &str {
        "scripted"
    }

    fn run(&self, request: &StrategyRequest) -> Result<Vec<StrategyTrade>, ProviderError> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.trades
            .get(&request.instrument)
            .cloned()
            .ok_or_else(|| ProviderError::DataNotAvailable(request.instrument.clone()))
    }
}

/// Opens one small trade per weekday of the requested range. Direction and
/// outcome are drawn from the request seed, so a request always yields the
/// same trades.
pub struct SeededRunner {
    /// Instruments that fail instead of trading
    pub failing: Vec<String>,
}

impl SeededRunner {
    pub fn new() -> Self {
        Self { failing: Vec::new() }
    }

    pub fn failing(instrument: &str) -> Self {
        Self {
            failing: vec![instrument.to_string()],
        }
    }
}

impl StrategyRunner for SeededRunner {
    fn name(&self) -> &str {
        "seeded"
    }

    fn run(&self, request: &StrategyRequest) -> Result<Vec<StrategyTrade>, ProviderError> {
        if self.failing.contains(&request.instrument) {
            return Err(ProviderError::Failed(format!("{} feed broken", request.instrument)));
        }

        let base = match request.instrument.as_str() {
            "GBPUSD" => 1.25,
            "AUDUSD" => 0.66,
            _ => 1.10,
        };
        let pip = 0.0001;

        let mut rng = ChaCha8Rng::seed_from_u64(request.seed);
        let mut trades = Vec::new();
        let mut day = request.range.start;
        while day < request.range.end {
            let weekday = chrono::Datelike::weekday(&day).num_days_from_monday();
            if weekday < 5 {
                let opened = start_of_day(day) + Duration::hours(8 + rng.gen_range(0..4));
                let direction = if rng.gen_bool(0.5) { Direction::Long } else { Direction::Short };
                let entry = base * (1.0 + rng.gen_range(-0.01..0.01));
                let move_pips: f64 = rng.gen_range(-25.0..30.0);
                let exit = entry + direction.sign() * move_pips * pip;
                let stop = entry - direction.sign() * 20.0 * pip;
                trades.push(StrategyTrade {
                    instrument: request.instrument.clone(),
                    direction,
                    size: 0.1,
                    entry_price: entry,
                    exit_price: exit,
                    opened_at: opened,
                    closed_at: opened + Duration::hours(rng.gen_range(1..6)),
                    stop_loss: Some(stop),
                    take_profit: None,
                    commission: 0.7,
                });
            }
            day += Duration::days(1);
        }
        Ok(trades)
    }
}

// ============================================================================
// Price data
// ============================================================================

/// Serves candles from memory
pub struct VecDataSource {
    pub candles: BTreeMap<String, Vec<Candle>>,
}

impl PriceDataSource for VecDataSource {
    fn name(&self) -> &str {
        "memory"
    }

    fn candles(
        &self,
        instrument: &str,
        _timeframe: Timeframe,
        range: &DateRange,
    ) -> Result<Vec<Candle>, ProviderError> {
        let candles = self
            .candles
            .get(instrument)
            .ok_or_else(|| ProviderError::DataNotAvailable(instrument.to_string()))?;
        Ok(candles
            .iter()
            .filter(|c| range.contains_instant(c.timestamp))
            .cloned()
            .collect())
    }
}

/// Hourly candle with a narrow high/low band around `close`
pub fn candle(timestamp: SimInstant, close: f64) -> Candle {
    Candle {
        timestamp,
        open: close,
        high: close * 1.0005,
        low: close * 0.9995,
        close,
        volume: 1_000.0,
    }
}
