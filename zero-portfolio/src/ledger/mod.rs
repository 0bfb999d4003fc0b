//! Centralized position ledger.
//!
//! Source of truth for balance, equity, margin, open positions and realized
//! trades across every instrument of a run. The ledger only reports
//! margin-call and stop-out conditions; acting on them is the risk
//! governor's job.

mod journal;
mod position;

pub use journal::{Journal, JournalEntry, JournalKind};
pub use position::{ClosedTrade, OpenPosition, PositionId};

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

use crate::config::LedgerConfig;
use crate::error::{Result, TemporalViolation};
use crate::types::{Direction, SimInstant, TradeProposal};
use zero_common::Validate;

/// Ledger refusals
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LedgerError {
    #[error("insufficient margin: required {required:.2}, free {free:.2}")]
    InsufficientMargin { required: f64, free: f64 },

    #[error("unknown position {0}")]
    UnknownPosition(PositionId),

    #[error("invalid order: {0}")]
    InvalidOrder(String),
}

/// Point-in-time account state; the sequence of snapshots is the equity curve
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSnapshot {
    /// Snapshot instant
    pub instant: SimInstant,
    /// Balance
    pub balance: f64,
    /// Equity
    pub equity: f64,
    /// Used margin
    pub used_margin: f64,
    /// Free margin
    pub free_margin: f64,
    /// Margin level (%), infinite when no margin is used
    pub margin_level: f64,
    /// Open positions
    pub open_positions: usize,
}

/// Position ledger
#[derive(Debug, Clone)]
pub struct Ledger {
    config: LedgerConfig,
    balance: f64,
    positions: BTreeMap<PositionId, OpenPosition>,
    closed: Vec<ClosedTrade>,
    snapshots: Vec<LedgerSnapshot>,
    marks: BTreeMap<String, f64>,
    journal: Journal,
    next_id: u64,
    last_instant: SimInstant,
}

impl Ledger {
    /// Create a ledger funded with the configured initial balance at `start`
    pub fn new(config: LedgerConfig, start: SimInstant) -> Result<Self> {
        config.validate()?;

        let balance = config.initial_balance;
        let mut journal = Journal::new();
        journal.append(start, JournalKind::Deposit { amount: balance }, balance, balance);

        Ok(Self {
            config,
            balance,
            positions: BTreeMap::new(),
            closed: Vec::new(),
            snapshots: Vec::new(),
            marks: BTreeMap::new(),
            journal,
            next_id: 1,
            last_instant: start,
        })
    }

    // ========================================================================
    // Mutations
    // ========================================================================

    /// Open a position at `price`.
    ///
    /// Fails with [`LedgerError::InsufficientMargin`] when the margin the
    /// position needs exceeds the current free margin.
    pub fn open_position(
        &mut self,
        instrument: &str,
        direction: Direction,
        price: f64,
        size: f64,
        instant: SimInstant,
    ) -> Result<PositionId> {
        self.open_with_levels(instrument, direction, price, size, instant, None, None)
    }

    /// Open the position a proposal describes, keeping its stop and target
    pub fn open_from_proposal(
        &mut self,
        proposal: &TradeProposal,
        instant: SimInstant,
    ) -> Result<PositionId> {
        self.open_with_levels(
            &proposal.instrument,
            proposal.direction,
            proposal.price,
            proposal.size,
            instant,
            proposal.stop_loss,
            proposal.take_profit,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn open_with_levels(
        &mut self,
        instrument: &str,
        direction: Direction,
        price: f64,
        size: f64,
        instant: SimInstant,
        stop_loss: Option<f64>,
        take_profit: Option<f64>,
    ) -> Result<PositionId> {
        check_price(price)?;
        if !(size.is_finite() && size > 0.0) {
            return Err(LedgerError::InvalidOrder(format!("size must be positive, got {}", size)).into());
        }

        let required = self.required_margin(instrument, price, size);
        let free = self.free_margin();
        if required > free {
            return Err(LedgerError::InsufficientMargin { required, free }.into());
        }

        let id = PositionId(self.next_id);
        self.next_id += 1;

        let position = OpenPosition {
            id,
            instrument: instrument.to_string(),
            direction,
            entry_price: price,
            current_price: price,
            size,
            contract_size: self.contract_size_for(instrument),
            opened_at: instant,
            unrealized_pnl: 0.0,
            margin: required,
            stop_loss,
            take_profit,
        };
        self.positions.insert(id, position);
        self.marks.entry(instrument.to_string()).or_insert(price);
        self.last_instant = self.last_instant.max(instant);

        let (balance, equity) = (self.balance, self.equity());
        self.journal.append(
            instant,
            JournalKind::Open {
                position_id: id,
                instrument: instrument.to_string(),
                direction,
                price,
                size,
                margin: required,
            },
            balance,
            equity,
        );

        tracing::debug!(
            position = %id,
            instrument = %instrument,
            direction = %direction,
            price,
            size,
            margin = required,
            "Position opened"
        );
        Ok(id)
    }

    /// Re-mark every open position of `instrument` at `price`.
    ///
    /// Returns the number of positions updated.
    pub fn update_price(&mut self, instrument: &str, price: f64) -> Result<usize> {
        check_price(price)?;
        self.marks.insert(instrument.to_string(), price);

        let mut updated = 0;
        for position in self.positions.values_mut().filter(|p| p.instrument == instrument) {
            position.mark(price);
            updated += 1;
        }

        if updated > 0 {
            let (balance, equity) = (self.balance, self.equity());
            self.journal.append(
                self.last_instant,
                JournalKind::PriceUpdate {
                    instrument: instrument.to_string(),
                    price,
                    positions: updated,
                },
                balance,
                equity,
            );
        }
        Ok(updated)
    }

    /// Close a position at `price`, realizing its P&L net of commission.
    pub fn close_position(
        &mut self,
        id: PositionId,
        price: f64,
        instant: SimInstant,
        commission: f64,
    ) -> Result<ClosedTrade> {
        check_price(price)?;
        match self.positions.get(&id) {
            None => return Err(LedgerError::UnknownPosition(id).into()),
            Some(position) if instant < position.opened_at => {
                return Err(TemporalViolation::CloseBeforeOpen {
                    instrument: position.instrument.clone(),
                    opened_at: position.opened_at,
                    closed_at: instant,
                }
                .into());
            }
            Some(_) => {}
        }
        let Some(position) = self.positions.remove(&id) else {
            return Err(LedgerError::UnknownPosition(id).into());
        };

        let gross_pnl = position.pnl_at(price);
        let realized_pnl = gross_pnl - commission;
        self.balance += realized_pnl;
        self.last_instant = self.last_instant.max(instant);

        let trade = ClosedTrade {
            position_id: id,
            instrument: position.instrument,
            direction: position.direction,
            entry_price: position.entry_price,
            exit_price: price,
            size: position.size,
            opened_at: position.opened_at,
            closed_at: instant,
            gross_pnl,
            commission,
            realized_pnl,
        };

        let (balance, equity) = (self.balance, self.equity());
        self.journal.append(
            instant,
            JournalKind::Close {
                position_id: id,
                instrument: trade.instrument.clone(),
                price,
                realized_pnl,
                commission,
            },
            balance,
            equity,
        );

        tracing::debug!(
            position = %id,
            instrument = %trade.instrument,
            exit = price,
            realized_pnl,
            balance,
            "Position closed"
        );

        self.closed.push(trade.clone());
        Ok(trade)
    }

    /// Append a snapshot of the current account state
    pub fn record_snapshot(&mut self, instant: SimInstant) -> LedgerSnapshot {
        let snapshot = LedgerSnapshot {
            instant,
            balance: self.balance,
            equity: self.equity(),
            used_margin: self.used_margin(),
            free_margin: self.free_margin(),
            margin_level: self.margin_level(),
            open_positions: self.positions.len(),
        };
        self.last_instant = self.last_instant.max(instant);
        self.journal.append(
            instant,
            JournalKind::Snapshot {
                open_positions: snapshot.open_positions,
            },
            snapshot.balance,
            snapshot.equity,
        );
        self.snapshots.push(snapshot.clone());
        snapshot
    }

    // ========================================================================
    // Derived state
    // ========================================================================

    /// Starting balance
    pub fn initial_balance(&self) -> f64 {
        self.config.initial_balance
    }

    /// Realized balance
    pub fn balance(&self) -> f64 {
        self.balance
    }

    /// Sum of unrealized P&L over open positions
    pub fn unrealized_pnl(&self) -> f64 {
        self.positions.values().map(|p| p.unrealized_pnl).sum()
    }

    /// Balance plus unrealized P&L
    pub fn equity(&self) -> f64 {
        self.balance + self.unrealized_pnl()
    }

    /// Sum of position margins
    pub fn used_margin(&self) -> f64 {
        self.positions.values().map(|p| p.margin).sum()
    }

    /// Equity not tied up as margin
    pub fn free_margin(&self) -> f64 {
        self.equity() - self.used_margin()
    }

    /// Equity / used margin x 100, infinite when no margin is used
    pub fn margin_level(&self) -> f64 {
        let used = self.used_margin();
        if used <= 0.0 {
            f64::INFINITY
        } else {
            self.equity() / used * 100.0
        }
    }

    /// Margin level at or below the margin-call level
    pub fn is_margin_call(&self) -> bool {
        !self.positions.is_empty() && self.margin_level() <= self.config.margin_call_level
    }

    /// Margin level at or below the stop-out level
    pub fn is_stop_out(&self) -> bool {
        !self.positions.is_empty() && self.margin_level() <= self.config.stop_out_level
    }

    /// Units per lot for an instrument
    pub fn contract_size_for(&self, instrument: &str) -> f64 {
        self.config.contract_size_for(instrument)
    }

    /// Notional value of `size` lots at `price`
    pub fn notional(&self, instrument: &str, price: f64, size: f64) -> f64 {
        price * size * self.contract_size_for(instrument)
    }

    /// Margin a new position would need
    pub fn required_margin(&self, instrument: &str, price: f64, size: f64) -> f64 {
        self.notional(instrument, price, size) / self.config.leverage
    }

    /// Notional of every open position at current marks
    pub fn total_notional(&self) -> f64 {
        self.positions.values().map(OpenPosition::notional).sum()
    }

    /// Sum of net realized P&L
    pub fn realized_pnl(&self) -> f64 {
        self.closed.iter().map(|t| t.realized_pnl).sum()
    }

    /// Last known price of an instrument
    pub fn mark_price(&self, instrument: &str) -> Option<f64> {
        self.marks.get(instrument).copied()
    }

    /// Open position by id
    pub fn position(&self, id: PositionId) -> Option<&OpenPosition> {
        self.positions.get(&id)
    }

    /// Open positions in open order
    pub fn open_positions(&self) -> impl Iterator<Item = &OpenPosition> {
        self.positions.values()
    }

    /// Open positions of one instrument
    pub fn positions_for<'a>(&'a self, instrument: &'a str) -> impl Iterator<Item = &'a OpenPosition> {
        self.positions.values().filter(move |p| p.instrument == instrument)
    }

    /// Number of open positions
    pub fn open_count(&self) -> usize {
        self.positions.len()
    }

    /// Number of open positions on one instrument
    pub fn open_count_for(&self, instrument: &str) -> usize {
        self.positions_for(instrument).count()
    }

    /// Realized trades in close order
    pub fn closed_trades(&self) -> &[ClosedTrade] {
        &self.closed
    }

    /// Recorded snapshots
    pub fn snapshots(&self) -> &[LedgerSnapshot] {
        &self.snapshots
    }

    /// Equity curve as (instant, equity) pairs
    pub fn equity_curve(&self) -> Vec<(SimInstant, f64)> {
        self.snapshots.iter().map(|s| (s.instant, s.equity)).collect()
    }

    /// Transaction journal
    pub fn journal(&self) -> &Journal {
        &self.journal
    }
}

fn check_price(price: f64) -> Result<()> {
    if price.is_finite() && price > 0.0 {
        Ok(())
    } else {
        Err(LedgerError::InvalidOrder(format!("price must be positive, got {}", price)).into())
    }
}

// ============================================================================
// Tests
// ============================================================================
