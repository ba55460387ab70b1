//! Risk factors, decisions and the scored assessment returned to callers

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Neutral score used when a dimension has nothing to say
pub const NEUTRAL_SCORE: f64 = 50.0;

/// Risk dimension scored by one evaluator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskFactorType {
    Amount,
    Velocity,
    Device,
    TimePattern,
    Geography,
    Behavioral,
    /// Informational factor describing malformed input
    InputValidation,
}

impl RiskFactorType {
    /// Dimensions that carry a learnable weight
    pub const SCORED: [RiskFactorType; 6] = [
        RiskFactorType::Amount,
        RiskFactorType::Velocity,
        RiskFactorType::Device,
        RiskFactorType::TimePattern,
        RiskFactorType::Geography,
        RiskFactorType::Behavioral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskFactorType::Amount => "amount",
            RiskFactorType::Velocity => "velocity",
            RiskFactorType::Device => "device",
            RiskFactorType::TimePattern => "time_pattern",
            RiskFactorType::Geography => "geography",
            RiskFactorType::Behavioral => "behavioral",
            RiskFactorType::InputValidation => "input_validation",
        }
    }

    /// Inverse of `as_str`, case-insensitive
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::SCORED
            .into_iter()
            .chain([RiskFactorType::InputValidation])
            .find(|kind| kind.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for RiskFactorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One scored, weighted dimension of an assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskFactor {
    #[serde(rename = "type")]
    pub kind: RiskFactorType,
    /// Severity (0 - 100)
    pub score: f64,
    /// Relative importance (0 - 1); the engine normalizes across factors
    pub weight: f64,
    pub description: String,
}

impl RiskFactor {
    /// Build a factor, clamping score and weight into range.
    ///
    /// Non-finite scores become neutral and non-finite weights become zero.
    pub fn new(kind: RiskFactorType, score: f64, weight: f64, description: impl Into<String>) -> Self {
        let score = if score.is_finite() {
            score.clamp(0.0, 100.0)
        } else {
            NEUTRAL_SCORE
        };
        let weight = if weight.is_finite() {
            weight.clamp(0.0, 1.0)
        } else {
            0.0
        };

        Self {
            kind,
            score,
            weight,
            description: description.into(),
        }
    }

    /// Zero-weight informational factor that does not move the aggregate
    pub fn informational(kind: RiskFactorType, description: impl Into<String>) -> Self {
        Self::new(kind, NEUTRAL_SCORE, 0.0, description)
    }

    /// Weighted contribution to the aggregate numerator
    pub fn contribution(&self) -> f64 {
        self.score * self.weight
    }

    pub fn is_weighted(&self) -> bool {
        self.weight > 0.0
    }

    /// Whether the raw factor values lie in their documented ranges
    pub fn in_range(&self) -> bool {
        self.score.is_finite()
            && self.weight.is_finite()
            && (0.0..=100.0).contains(&self.score)
            && (0.0..=1.0).contains(&self.weight)
    }
}

/// Risk level classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    /// Determine risk level from score and thresholds
    pub fn from_score(score: f64, thresholds: &RiskLevelThresholds) -> Self {
        if score >= thresholds.critical {
            RiskLevel::Critical
        } else if score >= thresholds.high {
            RiskLevel::High
        } else if score >= thresholds.medium {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Configurable risk level thresholds on the 0 - 100 scale
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLevelThresholds {
    pub medium: f64,
    pub high: f64,
    pub critical: f64,
}

impl Default for RiskLevelThresholds {
    fn default() -> Self {
        Self {
            medium: 30.0,
            high: 60.0,
            critical: 85.0,
        }
    }
}

/// Categorical outcome of an assessment, ordered by severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    Approve,
    Review,
    Decline,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Approve => "approve",
            Decision::Review => "review",
            Decision::Decline => "decline",
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Assessment produced for one transaction. Never persisted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScore {
    /// Unique id of this assessment
    pub assessment_id: Uuid,

    pub transaction_id: String,

    /// Aggregated severity (0 - 100)
    pub overall_score: f64,

    pub risk_level: RiskLevel,

    pub decision: Decision,

    /// Evidential strength of the assessment (0 - 1), independent of risk
    pub confidence: f64,

    /// Factors ordered by weighted contribution, highest first
    pub factors: Vec<RiskFactor>,

    pub recommendations: Vec<String>,

    /// Set when a single extreme factor raised the decision above the aggregate
    #[serde(default)]
    pub severity_override: bool,

    pub evaluated_at: DateTime<Utc>,
}

impl RiskScore {
    /// Look up the factor for one dimension
    pub fn factor(&self, kind: RiskFactorType) -> Option<&RiskFactor> {
        self.factors.iter().find(|f| f.kind == kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_risk_level_from_score() {
        let thresholds = RiskLevelThresholds::default();

        assert_eq!(RiskLevel::from_score(10.0, &thresholds), RiskLevel::Low);
        assert_eq!(RiskLevel::from_score(45.0, &thresholds), RiskLevel::Medium);
        assert_eq!(RiskLevel::from_score(75.0, &thresholds), RiskLevel::High);
        assert_eq!(RiskLevel::from_score(95.0, &thresholds), RiskLevel::Critical);
    }

    #[test]
    fn test_factor_clamping() {
        let factor = RiskFactor::new(RiskFactorType::Amount, 150.0, -0.2, "x");
        assert_eq!(factor.score, 100.0);
        assert_eq!(factor.weight, 0.0);

        let factor = RiskFactor::new(RiskFactorType::Device, f64::NAN, f64::INFINITY, "x");
        assert_eq!(factor.score, NEUTRAL_SCORE);
        assert_eq!(factor.weight, 0.0);
    }

    #[test]
    fn test_decision_ordering() {
        assert!(Decision::Approve < Decision::Review);
        assert!(Decision::Review < Decision::Decline);
        assert_eq!(Decision::Approve.max(Decision::Review), Decision::Review);
    }

    #[test]
    fn test_factor_serialization() {
        let factor = RiskFactor::new(RiskFactorType::TimePattern, 40.0, 0.1, "unusual hour");
        let json = serde_json::to_string(&factor).unwrap();

        assert!(json.contains("\"type\":\"TIME_PATTERN\""));
        let back: RiskFactor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, factor);
    }
}
