//! Risk governor and its rule vocabulary.

mod governor;
mod rules;

pub use governor::RiskGovernor;
pub use rules::{
    MarginStatus, RiskDecision, RiskRule, RiskStats, RiskViolation, RiskWarning,
    CORRELATION_SCORE_WEIGHT,
};
