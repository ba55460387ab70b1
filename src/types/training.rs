//! Labeled outcomes fed back into the model updater

use crate::types::risk::RiskFactor;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Ground-truth outcome of a past transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Outcome {
    Fraud,
    Legitimate,
}

impl Outcome {
    /// Regression target for the outcome
    pub fn target(&self) -> f64 {
        match self {
            Outcome::Fraud => 1.0,
            Outcome::Legitimate => 0.0,
        }
    }
}

impl FromStr for Outcome {
    type Err = ();

    fn from_str(label: &str) -> Result<Self, Self::Err> {
        match label.trim().to_ascii_lowercase().as_str() {
            "fraud" => Ok(Outcome::Fraud),
            "legitimate" => Ok(Outcome::Legitimate),
            _ => Err(()),
        }
    }
}

/// One labeled example.
///
/// The outcome is kept as the raw label so a batch with an unknown label can
/// be rejected as a whole rather than failing at deserialization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingExample {
    pub transaction_id: String,
    /// Factors as scored at decision time
    pub features: Vec<RiskFactor>,
    pub actual_outcome: String,
    /// Labeler confidence (0 - 1)
    pub confidence: f64,
}

impl TrainingExample {
    pub fn new(
        transaction_id: impl Into<String>,
        features: Vec<RiskFactor>,
        outcome: Outcome,
        confidence: f64,
    ) -> Self {
        let actual_outcome = match outcome {
            Outcome::Fraud => "fraud",
            Outcome::Legitimate => "legitimate",
        };
        Self {
            transaction_id: transaction_id.into(),
            features,
            actual_outcome: actual_outcome.to_string(),
            confidence,
        }
    }

    pub fn outcome(&self) -> Option<Outcome> {
        self.actual_outcome.parse().ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_parsing() {
        assert_eq!("fraud".parse::<Outcome>(), Ok(Outcome::Fraud));
        assert_eq!(" Legitimate ".parse::<Outcome>(), Ok(Outcome::Legitimate));
        assert!("chargeback".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_example_round_trip_label() {
        let example = TrainingExample::new("tx_1", vec![], Outcome::Fraud, 0.9);
        assert_eq!(example.actual_outcome, "fraud");
        assert_eq!(example.outcome(), Some(Outcome::Fraud));
    }
}
