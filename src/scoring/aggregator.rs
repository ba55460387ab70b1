//! Score aggregation and confidence estimation across risk factors

use crate::types::risk::{RiskFactor, NEUTRAL_SCORE};

/// Confidence ceiling when no weighted factor is present
const NO_EVIDENCE_CONFIDENCE: f64 = 0.3;

/// Inputs to the confidence estimate
#[derive(Debug, Clone, Copy)]
pub struct ConfidenceInputs<'a> {
    pub factors: &'a [RiskFactor],
    /// Sum of the weights the evaluators were offered
    pub offered_weight: f64,
    /// Fraction of optional context supplied (0 - 1)
    pub completeness: f64,
    /// Whether historical data was available for the identity
    pub history_available: bool,
}

/// Aggregates factor scores into a single risk score.
///
/// Weights are normalized over the factors present, so they need not sum to 1.
#[derive(Debug, Clone, Default)]
pub struct ScoreAggregator;

impl ScoreAggregator {
    pub fn new() -> Self {
        Self
    }

    /// Weighted mean of factor scores, clamped to [0, 100].
    ///
    /// Returns the neutral score when no factor carries weight.
    pub fn aggregate(&self, factors: &[RiskFactor]) -> f64 {
        let mut weighted_sum = 0.0;
        let mut total_weight = 0.0;

        for factor in factors {
            weighted_sum += factor.contribution();
            total_weight += factor.weight;
        }

        if total_weight > 0.0 {
            (weighted_sum / total_weight).clamp(0.0, 100.0)
        } else {
            NEUTRAL_SCORE
        }
    }

    /// Agreement among weighted factor scores (1 = identical, 0 = maximally spread).
    ///
    /// Fewer than two weighted factors cannot agree or disagree and score 0.5.
    pub fn agreement(factors: &[RiskFactor]) -> f64 {
        let scores: Vec<f64> = factors
            .iter()
            .filter(|f| f.is_weighted())
            .map(|f| f.score / 100.0)
            .collect();

        if scores.len() < 2 {
            return 0.5;
        }

        let mean = scores.iter().sum::<f64>() / scores.len() as f64;
        let variance = scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / scores.len() as f64;

        // std dev of values in [0, 1] is at most 0.5
        (1.0 - 2.0 * variance.sqrt()).clamp(0.0, 1.0)
    }

    /// Evidential strength of an assessment, in [0, 1].
    ///
    /// Grows with the share of offered weight the evaluators could use, with
    /// agreement between factors, and with how complete the context was.
    pub fn confidence(&self, inputs: ConfidenceInputs<'_>) -> f64 {
        let present_weight: f64 = inputs.factors.iter().map(|f| f.weight).sum();
        let completeness = inputs.completeness.clamp(0.0, 1.0);

        if present_weight <= 0.0 {
            return (0.1 + 0.2 * completeness).min(NO_EVIDENCE_CONFIDENCE);
        }

        let coverage = if inputs.offered_weight > 0.0 {
            (present_weight / inputs.offered_weight).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let agreement = Self::agreement(inputs.factors);
        let history = if inputs.history_available { 1.0 } else { 0.0 };
        let evidence = 0.7 * completeness + 0.3 * history;

        (0.1 + 0.35 * coverage + 0.25 * agreement + 0.3 * evidence).clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::risk::RiskFactorType;

    fn factor(kind: RiskFactorType, score: f64, weight: f64) -> RiskFactor {
        RiskFactor::new(kind, score, weight, "test")
    }

    #[test]
    fn test_weighted_aggregation() {
        let aggregator = ScoreAggregator::new();
        let factors = vec![
            factor(RiskFactorType::Amount, 80.0, 0.25),
            factor(RiskFactorType::Velocity, 80.0, 0.25),
            factor(RiskFactorType::Device, 70.0, 0.2),
            factor(RiskFactorType::TimePattern, 60.0, 0.15),
            factor(RiskFactorType::Geography, 50.0, 0.15),
        ];

        // (80*.25 + 80*.25 + 70*.2 + 60*.15 + 50*.15) / 1.0 = 70.5
        assert!((aggregator.aggregate(&factors) - 70.5).abs() < 0.01);
    }

    #[test]
    fn test_weights_are_normalized() {
        let aggregator = ScoreAggregator::new();
        let factors = vec![
            factor(RiskFactorType::Amount, 80.0, 0.1),
            factor(RiskFactorType::Device, 60.0, 0.1),
        ];
        assert!((aggregator.aggregate(&factors) - 70.0).abs() < 0.01);
    }

    #[test]
    fn test_zero_weight_factors_ignored() {
        let aggregator = ScoreAggregator::new();
        let factors = vec![
            factor(RiskFactorType::Amount, 20.0, 0.3),
            RiskFactor::informational(RiskFactorType::Velocity, "unavailable"),
        ];
        assert!((aggregator.aggregate(&factors) - 20.0).abs() < 0.01);
    }

    #[test]
    fn test_empty_factors() {
        let aggregator = ScoreAggregator::new();
        assert_eq!(aggregator.aggregate(&[]), 50.0);

        let confidence = aggregator.confidence(ConfidenceInputs {
            factors: &[],
            offered_weight: 1.0,
            completeness: 1.0,
            history_available: true,
        });
        assert!(confidence <= 0.3);
    }

    #[test]
    fn test_agreement() {
        let close = vec![
            factor(RiskFactorType::Amount, 80.0, 0.2),
            factor(RiskFactorType::Device, 82.0, 0.2),
            factor(RiskFactorType::Velocity, 79.0, 0.2),
        ];
        assert!(ScoreAggregator::agreement(&close) > 0.9);

        let split = vec![
            factor(RiskFactorType::Amount, 0.0, 0.2),
            factor(RiskFactorType::Device, 100.0, 0.2),
        ];
        assert!(ScoreAggregator::agreement(&split) < 0.01);
    }

    #[test]
    fn test_confidence_grows_with_completeness() {
        let aggregator = ScoreAggregator::new();
        let factors = vec![
            factor(RiskFactorType::Amount, 20.0, 0.25),
            factor(RiskFactorType::Device, 25.0, 0.2),
        ];
        let sparse = aggregator.confidence(ConfidenceInputs {
            factors: &factors,
            offered_weight: 1.0,
            completeness: 0.0,
            history_available: false,
        });
        let rich = aggregator.confidence(ConfidenceInputs {
            factors: &factors,
            offered_weight: 1.0,
            completeness: 1.0,
            history_available: true,
        });

        assert!(rich > sparse);
        assert!((0.0..=1.0).contains(&sparse));
        assert!((0.0..=1.0).contains(&rich));
    }
}
