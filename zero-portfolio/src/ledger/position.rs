//! Open positions and realized trades.

use serde::{Deserialize, Serialize};

use crate::types::{Direction, SimInstant};

/// Ledger-assigned position identifier, increasing in open order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PositionId(pub u64);

impl std::fmt::Display for PositionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A position currently held by the ledger
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenPosition {
    /// Position ID
    pub id: PositionId,
    /// Instrument
    pub instrument: String,
    /// Direction
    pub direction: Direction,
    /// Entry price
    pub entry_price: f64,
    /// Last marked price
    pub current_price: f64,
    /// Size in lots
    pub size: f64,
    /// Units per lot
    pub contract_size: f64,
    /// Entry instant
    pub opened_at: SimInstant,
    /// Unrealized P&L at the current price
    pub unrealized_pnl: f64,
    /// Margin held for this position
    pub margin: f64,
    /// Protective stop
    #[serde(default)]
    pub stop_loss: Option<f64>,
    /// Profit target
    #[serde(default)]
    pub take_profit: Option<f64>,
}

impl OpenPosition {
    /// P&L of this position if it were valued at `price`
    pub fn pnl_at(&self, price: f64) -> f64 {
        (price - self.entry_price) * self.direction.sign() * self.size * self.contract_size
    }

    /// Re-mark the position and recompute unrealized P&L
    pub fn mark(&mut self, price: f64) {
        self.current_price = price;
        self.unrealized_pnl = self.pnl_at(price);
    }

    /// Notional value at the current price
    pub fn notional(&self) -> f64 {
        self.current_price * self.size * self.contract_size
    }
}

/// An immutable realized trade
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedTrade {
    /// Position this trade came from
    pub position_id: PositionId,
    /// Instrument
    pub instrument: String,
    /// Direction
    pub direction: Direction,
    /// Entry price
    pub entry_price: f64,
    /// Exit price
    pub exit_price: f64,
    /// Size in lots
    pub size: f64,
    /// Entry instant
    pub opened_at: SimInstant,
    /// Exit instant
    pub closed_at: SimInstant,
    /// P&L before commission
    pub gross_pnl: f64,
    /// Commission charged on close
    pub commission: f64,
    /// Net P&L credited to the balance
    pub realized_pnl: f64,
}

impl ClosedTrade {
    /// Whether the trade made money after commission
    pub fn is_winner(&self) -> bool {
        self.realized_pnl > 0.0
    }

    /// Holding time in hours
    pub fn holding_hours(&self) -> f64 {
        (self.closed_at - self.opened_at).num_seconds() as f64 / 3600.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn position(direction: Direction) -> OpenPosition {
        OpenPosition {
            id: PositionId(1),
            instrument: "EURUSD".into(),
            direction,
            entry_price: 1.1000,
            current_price: 1.1000,
            size: 1.0,
            contract_size: 100_000.0,
            opened_at: Utc::now(),
            unrealized_pnl: 0.0,
            margin: 220.0,
            stop_loss: None,
            take_profit: None,
        }
    }

    #[test]
    fn test_mark_long_and_short() {
        let mut long = position(Direction::Long);
        long.mark(1.1010);
        assert!((long.unrealized_pnl - 100.0).abs() < 1e-6);

        let mut short = position(Direction::Short);
        short.mark(1.1010);
        assert!((short.unrealized_pnl + 100.0).abs() < 1e-6);
        assert!((short.notional() - 110_100.0).abs() < 1e-6);
    }

    #[test]
    fn test_holding_hours() {
        let t0 = Utc::now();
        let trade = ClosedTrade {
            position_id: PositionId(3),
            instrument: "GBPUSD".into(),
            direction: Direction::Long,
            entry_price: 1.25,
            exit_price: 1.26,
            size: 0.5,
            opened_at: t0,
            closed_at: t0 + Duration::minutes(90),
            gross_pnl: 500.0,
            commission: 7.0,
            realized_pnl: 493.0,
        };
        assert!((trade.holding_hours() - 1.5).abs() < 1e-12);
        assert!(trade.is_winner());
    }
}
