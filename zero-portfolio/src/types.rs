//! Shared value types for the portfolio engine.

use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

// ============================================================================
// Time
// ============================================================================

/// A point on the simulated time axis.
pub type SimInstant = DateTime<Utc>;

/// Midnight UTC at the start of a date
pub fn start_of_day(date: NaiveDate) -> SimInstant {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::default()))
}

/// Last whole second of a date (23:59:59 UTC)
pub fn end_of_day(date: NaiveDate) -> SimInstant {
    start_of_day(date) + Duration::days(1) - Duration::seconds(1)
}

/// Half-open calendar date range `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    /// First date included
    pub start: NaiveDate,
    /// First date excluded
    pub end: NaiveDate,
}

impl DateRange {
    /// Create a new range
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// Check if a date is inside the range
    pub fn contains(&self, date: NaiveDate) -> bool {
        date >= self.start && date < self.end
    }

    /// Check if an instant's calendar date is inside the range
    pub fn contains_instant(&self, instant: SimInstant) -> bool {
        self.contains(instant.date_naive())
    }

    /// Number of days covered
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Whether the range covers no days
    pub fn is_empty(&self) -> bool {
        self.end <= self.start
    }

    /// First instant inside the range
    pub fn start_instant(&self) -> SimInstant {
        start_of_day(self.start)
    }

    /// First instant after the range
    pub fn end_instant(&self) -> SimInstant {
        start_of_day(self.end)
    }
}

impl std::fmt::Display for DateRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

// ============================================================================
// Market Data
// ============================================================================

/// Timeframe for OHLC data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// 1-minute candles
    M1,
    /// 5-minute candles
    M5,
    /// 15-minute candles
    M15,
    /// 1-hour candles
    H1,
    /// 4-hour candles
    H4,
    /// Daily candles
    Daily,
}

impl Timeframe {
    /// Parse from string (e.g., "D", "H4", "1H", "Daily")
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "1M" | "M1" => Some(Self::M1),
            "5M" | "M5" => Some(Self::M5),
            "15M" | "M15" => Some(Self::M15),
            "1H" | "H1" | "60M" => Some(Self::H1),
            "4H" | "H4" | "240M" => Some(Self::H4),
            "D" | "DAILY" | "1D" => Some(Self::Daily),
            _ => None,
        }
    }

    /// Duration of one candle
    pub fn duration(&self) -> Duration {
        match self {
            Self::M1 => Duration::minutes(1),
            Self::M5 => Duration::minutes(5),
            Self::M15 => Duration::minutes(15),
            Self::H1 => Duration::hours(1),
            Self::H4 => Duration::hours(4),
            Self::Daily => Duration::days(1),
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::M1 => write!(f, "1M"),
            Self::M5 => write!(f, "5M"),
            Self::M15 => write!(f, "15M"),
            Self::H1 => write!(f, "1H"),
            Self::H4 => write!(f, "4H"),
            Self::Daily => write!(f, "D"),
        }
    }
}

/// OHLC candle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Candle open time
    pub timestamp: SimInstant,
    /// Open price
    pub open: f64,
    /// High price
    pub high: f64,
    /// Low price
    pub low: f64,
    /// Close price
    pub close: f64,
    /// Volume
    #[serde(default)]
    pub volume: f64,
}

impl Candle {
    /// High-low range
    pub fn range(&self) -> f64 {
        self.high - self.low
    }
}

// ============================================================================
// Trading
// ============================================================================

/// Position direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
}

impl Direction {
    /// +1 for long, -1 for short
    pub fn sign(&self) -> f64 {
        match self {
            Self::Long => 1.0,
            Self::Short => -1.0,
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Long => write!(f, "LONG"),
            Self::Short => write!(f, "SHORT"),
        }
    }
}

/// A request to open a position, consumed once by the risk governor.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeProposal {
    /// Instrument to trade
    pub instrument: String,
    /// Direction
    pub direction: Direction,
    /// Size in lots
    pub size: f64,
    /// Intended entry price
    pub price: f64,
    /// Optional protective stop
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Optional profit target
    #[serde(default)]
    pub take_profit: Option<f64>,
}

impl TradeProposal {
    /// Create a proposal without stop or target
    pub fn new(instrument: impl Into<String>, direction: Direction, size: f64, price: f64) -> Self {
        Self {
            instrument: instrument.into(),
            direction,
            size,
            price,
            stop_loss: None,
            take_profit: None,
        }
    }

    /// Attach a stop loss
    pub fn with_stop(mut self, stop_loss: f64) -> Self {
        self.stop_loss = Some(stop_loss);
        self
    }

    /// Attach a take profit
    pub fn with_target(mut self, take_profit: f64) -> Self {
        self.take_profit = Some(take_profit);
        self
    }

    /// Price distance to the stop, if one is set
    pub fn stop_distance(&self) -> Option<f64> {
        self.stop_loss.map(|stop| (self.price - stop).abs())
    }
}

/// A complete trade produced by an isolated per-instrument strategy run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyTrade {
    /// Instrument traded
    pub instrument: String,
    /// Direction
    pub direction: Direction,
    /// Size in lots
    pub size: f64,
    /// Entry price
    pub entry_price: f64,
    /// Exit price
    pub exit_price: f64,
    /// Entry instant
    pub opened_at: SimInstant,
    /// Exit instant
    pub closed_at: SimInstant,
    /// Protective stop used by the strategy
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Profit target used by the strategy
    #[serde(default)]
    pub take_profit: Option<f64>,
    /// Round-trip commission
    #[serde(default)]
    pub commission: f64,
}

impl StrategyTrade {
    /// Build the proposal this trade represents at its entry
    pub fn to_proposal(&self) -> TradeProposal {
        TradeProposal {
            instrument: self.instrument.clone(),
            direction: self.direction,
            size: self.size,
            price: self.entry_price,
            stop_loss: self.stop_loss,
            take_profit: self.take_profit,
        }
    }

    /// Gross P&L in price units times size (contract size not applied)
    pub fn price_pnl(&self) -> f64 {
        (self.exit_price - self.entry_price) * self.direction.sign() * self.size
    }
}

// ============================================================================
// Tests
// ============================================================================
