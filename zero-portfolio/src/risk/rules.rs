//! Risk rules, decisions and warnings.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{Direction, SimInstant};

/// Pre-trade rules, in evaluation precedence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskRule {
    MaxTotalPositions,
    MaxInstrumentPositions,
    MaxDailyDrawdown,
    MaxTradeRisk,
    MaxExposure,
}

impl RiskRule {
    /// All rules in precedence order
    pub const ALL: [RiskRule; 5] = [
        Self::MaxTotalPositions,
        Self::MaxInstrumentPositions,
        Self::MaxDailyDrawdown,
        Self::MaxTradeRisk,
        Self::MaxExposure,
    ];

    /// Stable reason code
    pub fn code(&self) -> &'static str {
        match self {
            Self::MaxTotalPositions => "MAX_TOTAL_POSITIONS",
            Self::MaxInstrumentPositions => "MAX_INSTRUMENT_POSITIONS",
            Self::MaxDailyDrawdown => "MAX_DAILY_DRAWDOWN",
            Self::MaxTradeRisk => "MAX_TRADE_RISK",
            Self::MaxExposure => "MAX_EXPOSURE",
        }
    }

    /// Human-readable rule name
    pub fn name(&self) -> &'static str {
        match self {
            Self::MaxTotalPositions => "max total positions",
            Self::MaxInstrumentPositions => "max positions per instrument",
            Self::MaxDailyDrawdown => "max daily drawdown",
            Self::MaxTradeRisk => "max risk per trade",
            Self::MaxExposure => "max exposure",
        }
    }

    /// Weight of this rule's utilisation in the risk score
    pub fn score_weight(&self) -> f64 {
        match self {
            Self::MaxTotalPositions => 0.15,
            Self::MaxInstrumentPositions => 0.10,
            Self::MaxDailyDrawdown => 0.20,
            Self::MaxTradeRisk => 0.25,
            Self::MaxExposure => 0.20,
        }
    }
}

impl std::fmt::Display for RiskRule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// Weight of the correlation component in the risk score
pub const CORRELATION_SCORE_WEIGHT: f64 = 0.10;

/// A rejected proposal, always recorded by the governor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskViolation {
    /// Rule that fired
    pub rule: RiskRule,
    /// Instrument of the proposal
    pub instrument: String,
    /// Direction of the proposal
    pub direction: Direction,
    /// Size of the proposal
    pub size: f64,
    /// Decision instant
    pub instant: SimInstant,
    /// Observed value
    pub value: f64,
    /// Configured limit
    pub limit: f64,
    /// Explanation
    pub reason: String,
}

impl RiskViolation {
    /// Reason code of the rule that fired
    pub fn code(&self) -> &'static str {
        self.rule.code()
    }
}

/// Non-blocking observations attached to an allowed proposal
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RiskWarning {
    /// An open instrument moves with the proposed one
    CorrelatedExposure { with: String, correlation: f64 },
    /// No stop loss, so the per-trade risk rule could not be evaluated
    MissingStopLoss,
    /// A limit is close to being reached
    ApproachingLimit { rule: RiskRule, utilisation: f64 },
    /// The account is in margin-call territory
    MarginCall { margin_level: f64 },
}

/// Outcome of a pre-trade check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RiskDecision {
    /// Proposal may be executed
    Allowed {
        /// Weighted limit utilisation, 0-100
        score: f64,
        /// Non-blocking warnings
        warnings: Vec<RiskWarning>,
    },
    /// Proposal is dropped
    Rejected { violation: RiskViolation },
}

impl RiskDecision {
    /// Whether the proposal was allowed
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed { .. })
    }

    /// Reason code of a rejection
    pub fn reason_code(&self) -> Option<&'static str> {
        match self {
            Self::Allowed { .. } => None,
            Self::Rejected { violation } => Some(violation.code()),
        }
    }
}

/// Account margin condition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarginStatus {
    Healthy,
    MarginCall,
    StopOut,
}

/// Running governor statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskStats {
    /// Proposals evaluated
    pub evaluated: usize,
    /// Proposals allowed
    pub allowed: usize,
    /// Proposals rejected
    pub rejected: usize,
    /// Rejections by reason code
    pub rejections_by_code: BTreeMap<String, usize>,
    /// Warnings raised
    pub warnings: usize,
    /// Stop-out events observed
    pub stop_outs: usize,
}

impl RiskStats {
    /// Share of evaluated proposals that were rejected (%)
    pub fn rejection_rate(&self) -> f64 {
        if self.evaluated == 0 {
            0.0
        } else {
            self.rejected as f64 / self.evaluated as f64 * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_weights_sum_to_one() {
        let total: f64 = RiskRule::ALL.iter().map(|r| r.score_weight()).sum::<f64>()
            + CORRELATION_SCORE_WEIGHT;
        assert!((total - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_rule_codes() {
        assert_eq!(RiskRule::MaxTotalPositions.code(), "MAX_TOTAL_POSITIONS");
        assert_eq!(RiskRule::MaxExposure.to_string(), "MAX_EXPOSURE");
        assert_eq!(
            serde_json::to_string(&RiskRule::MaxTradeRisk).unwrap(),
            "\"MAX_TRADE_RISK\""
        );
    }

    #[test]
    fn test_rejection_rate() {
        let stats = RiskStats {
            evaluated: 4,
            rejected: 1,
            ..Default::default()
        };
        assert!((stats.rejection_rate() - 25.0).abs() < 1e-12);
    }
}
