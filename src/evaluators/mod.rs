//! Risk factor evaluators, one per risk dimension
//!
//! Every evaluator is a pure function of the transaction context and the
//! collaborator data the engine prefetched. Evaluators may return an error;
//! the engine replaces a failed evaluator with a zero-weight informational
//! factor, so errors never reach the caller.

pub mod amount;
pub mod behavioral;
pub mod device;
pub mod geography;
pub mod time_pattern;
pub mod velocity;

use crate::config::EngineConfig;
use crate::history::UserHistory;
use crate::types::device::{DeviceFingerprint, DeviceObservation};
use crate::types::risk::{RiskFactor, RiskFactorType, NEUTRAL_SCORE};
use crate::types::transaction::TransactionContext;
use crate::types::velocity::VelocityCheck;
use anyhow::Result;
use chrono::{DateTime, Utc};

pub use amount::AmountEvaluator;
pub use behavioral::BehavioralEvaluator;
pub use device::DeviceEvaluator;
pub use geography::GeographyEvaluator;
pub use time_pattern::TimePatternEvaluator;
pub use velocity::VelocityEvaluator;

/// Share of its weight a dimension keeps when it has no data to judge by
pub const NO_DATA_WEIGHT_SCALE: f64 = 0.1;

/// Collaborator data gathered once per assessment
#[derive(Debug, Clone, Copy)]
pub struct EvaluationInputs<'a> {
    pub now: DateTime<Utc>,
    pub history: Option<&'a UserHistory>,
    /// None when the velocity query could not be made
    pub velocity: Option<&'a [VelocityCheck]>,
    pub device: Option<&'a DeviceFingerprint>,
    pub device_observation: Option<&'a DeviceObservation>,
}

impl<'a> EvaluationInputs<'a> {
    /// Inputs with no collaborator data at all
    pub fn empty(now: DateTime<Utc>) -> Self {
        Self {
            now,
            history: None,
            velocity: None,
            device: None,
            device_observation: None,
        }
    }
}

/// Scores one risk dimension
pub trait RiskEvaluator: Send + Sync {
    fn factor_type(&self) -> RiskFactorType;

    /// Score the dimension. `weight` is the current learned weight; an
    /// evaluator may lower it when its evidence is thin but never raise it.
    fn evaluate(
        &self,
        ctx: &TransactionContext,
        inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor>;
}

/// Neutral factor for a dimension that has nothing to judge by
pub fn no_data(kind: RiskFactorType, weight: f64, description: impl Into<String>) -> RiskFactor {
    RiskFactor::new(kind, NEUTRAL_SCORE, weight * NO_DATA_WEIGHT_SCALE, description)
}

/// The standard evaluator set, in reporting order
pub fn default_evaluators(config: &EngineConfig) -> Vec<Box<dyn RiskEvaluator>> {
    vec![
        Box::new(AmountEvaluator::new(config.amount.clone())),
        Box::new(VelocityEvaluator::new()),
        Box::new(DeviceEvaluator::new(config.device.clone())),
        Box::new(TimePatternEvaluator::new()),
        Box::new(GeographyEvaluator::new(config.geography.clone())),
        Box::new(BehavioralEvaluator::new()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_set_covers_scored_dimensions() {
        let evaluators = default_evaluators(&EngineConfig::default());
        let kinds: Vec<RiskFactorType> = evaluators.iter().map(|e| e.factor_type()).collect();
        assert_eq!(kinds, RiskFactorType::SCORED.to_vec());
    }

    #[test]
    fn test_no_data_factor_is_neutral_and_light() {
        let factor = no_data(RiskFactorType::TimePattern, 0.2, "no history");
        assert_eq!(factor.score, NEUTRAL_SCORE);
        assert!((factor.weight - 0.02).abs() < 1e-12);
    }
}
