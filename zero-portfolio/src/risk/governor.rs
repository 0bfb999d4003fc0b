//! Pre-trade risk governor.
//!
//! The only path from a [`TradeProposal`] to an open position. Rules are
//! evaluated in fixed precedence and the first failing rule rejects the
//! proposal. Rejections are values, never errors.

use chrono::NaiveDate;

use super::rules::{
    MarginStatus, RiskDecision, RiskRule, RiskStats, RiskViolation, RiskWarning,
    CORRELATION_SCORE_WEIGHT,
};
use crate::config::RiskConfig;
use crate::correlation::CorrelationAnalyzer;
use crate::error::Result;
use crate::ledger::Ledger;
use crate::types::{SimInstant, TradeProposal};
use zero_common::Validate;

/// Utilisation of one rule for a proposal
#[derive(Debug, Clone, Copy)]
struct RuleCheck {
    rule: RiskRule,
    value: f64,
    limit: f64,
    breached: bool,
}

impl RuleCheck {
    fn utilisation(&self) -> f64 {
        if self.limit <= 0.0 {
            return 1.0;
        }
        (self.value / self.limit).clamp(0.0, 1.0)
    }
}

/// Risk governor
#[derive(Debug, Clone)]
pub struct RiskGovernor {
    config: RiskConfig,
    current_day: Option<NaiveDate>,
    day_start_equity: f64,
    violations: Vec<RiskViolation>,
    stats: RiskStats,
}

impl RiskGovernor {
    /// Create a governor
    pub fn new(config: RiskConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            current_day: None,
            day_start_equity: 0.0,
            violations: Vec::new(),
            stats: RiskStats::default(),
        })
    }

    /// Configuration in use
    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    /// Track equity; the first observation of a calendar day sets the
    /// start-of-day equity.
    pub fn observe_equity(&mut self, instant: SimInstant, equity: f64) {
        let date = instant.date_naive();
        if self.current_day != Some(date) {
            tracing::debug!(date = %date, equity, "New trading day");
            self.current_day = Some(date);
            self.day_start_equity = equity;
        }
    }

    /// Start-of-day equity of the current day
    pub fn day_start_equity(&self) -> f64 {
        self.day_start_equity
    }

    /// Intraday drawdown vs. start-of-day equity (%), never negative
    pub fn daily_drawdown_pct(&self, equity: f64) -> f64 {
        if self.day_start_equity <= 0.0 {
            return 0.0;
        }
        ((self.day_start_equity - equity) / self.day_start_equity * 100.0).max(0.0)
    }

    /// Evaluate a proposal at `instant` against ledger and correlation state.
    pub fn validate_order(
        &mut self,
        proposal: &TradeProposal,
        instant: SimInstant,
        ledger: &Ledger,
        correlation: &CorrelationAnalyzer,
    ) -> RiskDecision {
        let equity = ledger.equity();
        self.observe_equity(instant, equity);
        self.stats.evaluated += 1;

        let checks = self.evaluate_rules(proposal, ledger, equity);
        if let Some(failed) = checks.iter().find(|c| c.breached) {
            return self.reject(proposal, instant, failed);
        }

        let mut warnings = Vec::new();

        if proposal.stop_loss.is_none() {
            warnings.push(RiskWarning::MissingStopLoss);
        }

        let others: Vec<String> = {
            let mut open: Vec<String> = ledger
                .open_positions()
                .map(|p| p.instrument.clone())
                .filter(|i| *i != proposal.instrument)
                .collect();
            open.sort();
            open.dedup();
            open
        };
        let max_correlation = correlation.max_correlation_with(&proposal.instrument, &others, instant);
        let correlation_abs = max_correlation.as_ref().map_or(0.0, |(_, r)| r.abs());
        if let Some((with, r)) = &max_correlation {
            if r.abs() >= self.config.correlation_warning_threshold {
                warnings.push(RiskWarning::CorrelatedExposure {
                    with: with.clone(),
                    correlation: *r,
                });
            }
        }

        for check in &checks {
            let utilisation = check.utilisation();
            if utilisation >= self.config.approaching_limit_ratio {
                warnings.push(RiskWarning::ApproachingLimit {
                    rule: check.rule,
                    utilisation,
                });
            }
        }

        if ledger.is_margin_call() {
            warnings.push(RiskWarning::MarginCall {
                margin_level: ledger.margin_level(),
            });
        }

        let score = checks
            .iter()
            .map(|c| c.rule.score_weight() * c.utilisation())
            .sum::<f64>()
            + CORRELATION_SCORE_WEIGHT * correlation_abs.clamp(0.0, 1.0);
        let score = (score * 100.0).clamp(0.0, 100.0);

        self.stats.allowed += 1;
        self.stats.warnings += warnings.len();

        tracing::debug!(
            instrument = %proposal.instrument,
            score,
            warnings = warnings.len(),
            "Proposal allowed"
        );
        RiskDecision::Allowed { score, warnings }
    }

    /// Margin condition of the ledger
    pub fn margin_status(&mut self, ledger: &Ledger) -> MarginStatus {
        if ledger.is_stop_out() {
            self.stats.stop_outs += 1;
            tracing::warn!(
                margin_level = ledger.margin_level(),
                open_positions = ledger.open_count(),
                "Stop-out level reached"
            );
            MarginStatus::StopOut
        } else if ledger.is_margin_call() {
            MarginStatus::MarginCall
        } else {
            MarginStatus::Healthy
        }
    }

    /// Every rejection so far, in decision order
    pub fn violations(&self) -> &[RiskViolation] {
        &self.violations
    }

    /// Running statistics
    pub fn stats(&self) -> &RiskStats {
        &self.stats
    }

    // ========================================================================
    // Rules
    // ========================================================================

    fn evaluate_rules(&self, proposal: &TradeProposal, ledger: &Ledger, equity: f64) -> Vec<RuleCheck> {
        let config = &self.config;
        let mut checks = Vec::with_capacity(RiskRule::ALL.len());

        // Position counts include the proposed position
        let total = ledger.open_count();
        checks.push(RuleCheck {
            rule: RiskRule::MaxTotalPositions,
            value: (total + 1) as f64,
            limit: config.max_total_positions as f64,
            breached: total >= config.max_total_positions,
        });

        let per_instrument = ledger.open_count_for(&proposal.instrument);
        checks.push(RuleCheck {
            rule: RiskRule::MaxInstrumentPositions,
            value: (per_instrument + 1) as f64,
            limit: config.max_positions_per_instrument as f64,
            breached: per_instrument >= config.max_positions_per_instrument,
        });

        let drawdown = self.daily_drawdown_pct(equity);
        checks.push(RuleCheck {
            rule: RiskRule::MaxDailyDrawdown,
            value: drawdown,
            limit: config.max_daily_drawdown_pct,
            breached: drawdown >= config.max_daily_drawdown_pct,
        });

        let trade_risk = proposal.stop_distance().map(|distance| {
            let amount = distance * proposal.size * ledger.contract_size_for(&proposal.instrument);
            if equity > 0.0 {
                amount / equity * 100.0
            } else {
                f64::INFINITY
            }
        });
        checks.push(RuleCheck {
            rule: RiskRule::MaxTradeRisk,
            value: trade_risk.unwrap_or(0.0),
            limit: config.max_risk_per_trade_pct,
            breached: trade_risk.is_some_and(|risk| risk > config.max_risk_per_trade_pct),
        });

        let notional = ledger.total_notional()
            + ledger.notional(&proposal.instrument, proposal.price, proposal.size);
        let exposure = if equity > 0.0 {
            notional / equity
        } else {
            f64::INFINITY
        };
        checks.push(RuleCheck {
            rule: RiskRule::MaxExposure,
            value: exposure,
            limit: config.max_exposure_ratio,
            breached: exposure > config.max_exposure_ratio,
        });

        checks
    }

    fn reject(&mut self, proposal: &TradeProposal, instant: SimInstant, check: &RuleCheck) -> RiskDecision {
        let reason = format!(
            "{} exceeded: {:.4} vs limit {:.4}",
            check.rule.name(),
            check.value,
            check.limit
        );

        tracing::warn!(
            rule = check.rule.name(),
            code = check.rule.code(),
            instrument = %proposal.instrument,
            instant = %instant,
            reason = %reason,
            "Proposal rejected"
        );

        let violation = RiskViolation {
            rule: check.rule,
            instrument: proposal.instrument.clone(),
            direction: proposal.direction,
            size: proposal.size,
            instant,
            value: check.value,
            limit: check.limit,
            reason,
        };

        self.stats.rejected += 1;
        *self
            .stats
            .rejections_by_code
            .entry(check.rule.code().to_string())
            .or_insert(0) += 1;
        self.violations.push(violation.clone());

        RiskDecision::Rejected { violation }
    }
}

// ============================================================================
// Tests
// ============================================================================
