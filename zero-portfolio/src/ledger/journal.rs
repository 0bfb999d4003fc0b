//! Append-only transaction journal.
//!
//! Every ledger mutation appends one entry carrying the balance and equity
//! right after the mutation. Entries are never edited or removed.

use serde::{Deserialize, Serialize};

use super::position::PositionId;
use crate::types::{Direction, SimInstant};

/// What happened
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum JournalKind {
    /// Initial funding
    Deposit { amount: f64 },
    /// Position opened
    Open {
        position_id: PositionId,
        instrument: String,
        direction: Direction,
        price: f64,
        size: f64,
        margin: f64,
    },
    /// Positions of an instrument re-marked
    PriceUpdate {
        instrument: String,
        price: f64,
        positions: usize,
    },
    /// Position closed and realized
    Close {
        position_id: PositionId,
        instrument: String,
        price: f64,
        realized_pnl: f64,
        commission: f64,
    },
    /// Snapshot appended to the equity curve
    Snapshot { open_positions: usize },
}

/// One journal record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JournalEntry {
    /// Sequence number, starting at 0
    pub seq: u64,
    /// Simulated instant of the mutation
    pub instant: SimInstant,
    /// Mutation
    pub kind: JournalKind,
    /// Balance after the mutation
    pub balance_after: f64,
    /// Equity after the mutation
    pub equity_after: f64,
}

/// Journal of ledger mutations
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Journal {
    entries: Vec<JournalEntry>,
}

impl Journal {
    /// Create an empty journal
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a record and return its sequence number
    pub fn append(
        &mut self,
        instant: SimInstant,
        kind: JournalKind,
        balance_after: f64,
        equity_after: f64,
    ) -> u64 {
        let seq = self.entries.len() as u64;
        tracing::trace!(seq, instant = %instant, ?kind, balance_after, equity_after, "Journal append");
        self.entries.push(JournalEntry {
            seq,
            instant,
            kind,
            balance_after,
            equity_after,
        });
        seq
    }

    /// All records in append order
    pub fn entries(&self) -> &[JournalEntry] {
        &self.entries
    }

    /// Most recent record
    pub fn last(&self) -> Option<&JournalEntry> {
        self.entries.last()
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the journal is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Records touching one position
    pub fn for_position(&self, id: PositionId) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter().filter(move |e| match &e.kind {
            JournalKind::Open { position_id, .. } | JournalKind::Close { position_id, .. } => {
                *position_id == id
            }
            _ => false,
        })
    }
}
