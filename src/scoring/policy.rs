//! Decision policy: maps an aggregate score and its factors to a decision

use crate::error::ConfigError;
use crate::types::risk::{Decision, RiskFactor, RiskLevel, RiskLevelThresholds};
use serde::{Deserialize, Serialize};

/// Tunable thresholds turning scores into decisions.
///
/// The defaults are illustrative starting points and are expected to be
/// calibrated per deployment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecisionPolicy {
    /// Scores strictly below this approve
    pub approve_below: f64,
    /// Scores strictly above this decline
    pub decline_above: f64,
    /// A single factor at or above this score...
    pub severity_score: f64,
    /// ...with at least this weight forces at least REVIEW
    pub severity_weight: f64,
    pub risk_levels: RiskLevelThresholds,
}

impl Default for DecisionPolicy {
    fn default() -> Self {
        Self {
            approve_below: 30.0,
            decline_above: 70.0,
            severity_score: 90.0,
            severity_weight: 0.3,
            risk_levels: RiskLevelThresholds::default(),
        }
    }
}

/// Outcome of applying the policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PolicyOutcome {
    pub decision: Decision,
    pub risk_level: RiskLevel,
    /// True when a severe factor raised the decision above the score-based one
    pub severity_override: bool,
}

impl DecisionPolicy {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);

        if !in_range(self.approve_below)
            || !in_range(self.decline_above)
            || self.approve_below > self.decline_above
        {
            return Err(ConfigError::DecisionThresholds {
                approve_below: self.approve_below,
                decline_above: self.decline_above,
            });
        }

        let levels = &self.risk_levels;
        if !in_range(levels.medium)
            || !in_range(levels.high)
            || !in_range(levels.critical)
            || levels.medium > levels.high
            || levels.high > levels.critical
        {
            return Err(ConfigError::RiskLevels);
        }

        if !in_range(self.severity_score) || !(0.0..=1.0).contains(&self.severity_weight) {
            return Err(ConfigError::SeverityOverride);
        }

        Ok(())
    }

    /// Decision from the aggregate score alone
    pub fn decision_for_score(&self, score: f64) -> Decision {
        if score > self.decline_above {
            Decision::Decline
        } else if score < self.approve_below {
            Decision::Approve
        } else {
            Decision::Review
        }
    }

    /// Whether any single factor is severe enough to force a review
    pub fn has_severe_factor(&self, factors: &[RiskFactor]) -> bool {
        factors
            .iter()
            .any(|f| f.score >= self.severity_score && f.weight >= self.severity_weight)
    }

    /// Apply the policy to an aggregate score and the factors behind it
    pub fn decide(&self, score: f64, factors: &[RiskFactor]) -> PolicyOutcome {
        let base = self.decision_for_score(score);
        let severe = self.has_severe_factor(factors);

        let decision = if severe {
            base.max(Decision::Review)
        } else {
            base
        };

        PolicyOutcome {
            decision,
            risk_level: RiskLevel::from_score(score, &self.risk_levels),
            severity_override: decision != base,
        }
    }
}
