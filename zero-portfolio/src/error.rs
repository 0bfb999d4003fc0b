//! Error taxonomy for the portfolio engine.
//!
//! Risk rejections are not errors: they are `RiskDecision::Rejected` values
//! recorded by the governor. Everything here aborts the current operation.

use thiserror::Error;

use crate::ledger::LedgerError;
use crate::types::SimInstant;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Violations of the simulated time contract. These indicate a caller bug.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TemporalViolation {
    #[error("clock rewind from {current} to {target}")]
    Rewind {
        current: SimInstant,
        target: SimInstant,
    },

    #[error("target {target} is past the clock end {end}")]
    BeyondEnd { end: SimInstant, target: SimInstant },

    #[error("trade on {instrument} closes at {closed_at} before it opens at {opened_at}")]
    CloseBeforeOpen {
        instrument: String,
        opened_at: SimInstant,
        closed_at: SimInstant,
    },

    #[error("series is not strictly increasing at index {index} ({previous} then {next})")]
    UnorderedSeries {
        index: usize,
        previous: SimInstant,
        next: SimInstant,
    },
}

/// Engine error type.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Invalid thresholds or periods, raised at construction
    #[error("Configuration error in {field}: {reason}")]
    Configuration { field: String, reason: String },

    /// Not enough input to start a computation
    #[error("Insufficient data for {context}: need {required}, got {actual}")]
    InsufficientData {
        context: String,
        required: usize,
        actual: usize,
    },

    /// Run input that no computation can accept (non-finite values, empty ranges)
    #[error("Invalid input for {context}: {reason}")]
    InvalidInput { context: String, reason: String },

    /// Simulated time contract broken
    #[error("Temporal violation: {0}")]
    Temporal(#[from] TemporalViolation),

    /// Operation not allowed in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A delegated strategy run failed
    #[error("Strategy failed for {instrument}: {reason}")]
    Strategy { instrument: String, reason: String },

    /// Ledger refused a mutation
    #[error("Ledger error: {0}")]
    Ledger(#[from] LedgerError),

    /// Configuration file loading failed
    #[error(transparent)]
    Config(#[from] zero_common::Error),
}

impl EngineError {
    /// Shorthand for a configuration error
    pub fn config(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Shorthand for an insufficient-data error
    pub fn insufficient(context: impl Into<String>, required: usize, actual: usize) -> Self {
        Self::InsufficientData {
            context: context.into(),
            required,
            actual,
        }
    }

    /// Shorthand for an invalid-input error
    pub fn invalid_input(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidInput {
            context: context.into(),
            reason: reason.into(),
        }
    }

    /// Check if this is a temporal violation
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::Temporal(_))
    }

    /// Check if this is a configuration error
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration { .. })
    }
}

impl From<zero_common::ValidationError> for EngineError {
    fn from(err: zero_common::ValidationError) -> Self {
        let field = err.field().unwrap_or("config").to_string();
        Self::Configuration {
            field,
            reason: err.to_string(),
        }
    }
}
