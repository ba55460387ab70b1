//! VELOCITY: recent transaction rate for the transaction's identifiers

use super::{EvaluationInputs, RiskEvaluator};
use crate::types::risk::{RiskFactor, RiskFactorType};
use crate::types::transaction::TransactionContext;
use crate::types::velocity::VelocityCheck;
use anyhow::{bail, Result};

/// Floor for a breached window; breaches always land in elevated territory
const EXCEEDED_FLOOR: f64 = 40.0;
/// Ceiling for windows still under their thresholds
const UNDER_THRESHOLD_CEILING: f64 = 30.0;

#[derive(Debug, Clone, Default)]
pub struct VelocityEvaluator;

impl VelocityEvaluator {
    pub fn new() -> Self {
        Self
    }
}

/// Largest usage ratio (aggregate / threshold) across a check's dimensions
fn usage(check: &VelocityCheck) -> f64 {
    let t = &check.thresholds;
    let mut ratio: f64 = 0.0;
    if t.max_count > 0 {
        ratio = ratio.max(check.transaction_count as f64 / t.max_count as f64);
    }
    if t.max_amount > 0 {
        ratio = ratio.max(check.total_amount as f64 / t.max_amount as f64);
    }
    if t.max_unique_devices > 0 {
        ratio = ratio.max(check.unique_devices as f64 / t.max_unique_devices as f64);
    }
    ratio
}

impl RiskEvaluator for VelocityEvaluator {
    fn factor_type(&self) -> RiskFactorType {
        RiskFactorType::Velocity
    }

    fn evaluate(
        &self,
        _ctx: &TransactionContext,
        inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor> {
        let checks = match inputs.velocity {
            Some(checks) if !checks.is_empty() => checks,
            _ => bail!("no velocity data for transaction identifiers"),
        };

        // Tightest breached window explains the most
        let breached = checks
            .iter()
            .filter(|c| c.exceeded)
            .min_by_key(|c| c.window_secs);

        if let Some(check) = breached {
            let score = EXCEEDED_FLOOR + (100.0 - EXCEEDED_FLOOR) * check.risk_score / 100.0;
            return Ok(RiskFactor::new(
                RiskFactorType::Velocity,
                score,
                weight,
                format!(
                    "{} transactions totalling {} in the last {} for {}",
                    check.transaction_count, check.total_amount, check.window, check.dominant_key
                ),
            ));
        }

        let busiest = checks
            .iter()
            .map(|c| (usage(c), c))
            .max_by(|a, b| a.0.total_cmp(&b.0));
        let (ratio, check) = match busiest {
            Some(found) => found,
            None => bail!("no velocity data for transaction identifiers"),
        };

        Ok(RiskFactor::new(
            RiskFactorType::Velocity,
            UNDER_THRESHOLD_CEILING * ratio.clamp(0.0, 1.0),
            weight,
            format!(
                "Velocity within limits ({} transactions in the last {})",
                check.transaction_count, check.window
            ),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::velocity::{VelocityKey, VelocityThresholds};
    use chrono::Utc;

    fn check(window: &str, secs: u64, count: u64, risk: f64, exceeded: bool) -> VelocityCheck {
        VelocityCheck {
            user_id: Some("user_1".into()),
            customer_id: None,
            payment_method_id: None,
            dominant_key: VelocityKey::User("user_1".into()),
            window: window.into(),
            window_secs: secs,
            transaction_count: count,
            total_amount: 0,
            unique_devices: 0,
            unique_locations: 0,
            risk_score: risk,
            exceeded,
            thresholds: VelocityThresholds {
                max_count: 5,
                max_amount: 0,
                max_unique_devices: 0,
            },
        }
    }

    fn evaluate(checks: &[VelocityCheck]) -> Result<RiskFactor> {
        let ctx = TransactionContext::new("tx", "user_1", 1_000, "USD", "pm");
        let mut inputs = EvaluationInputs::empty(Utc::now());
        inputs.velocity = Some(checks);
        VelocityEvaluator::new().evaluate(&ctx, &inputs, 0.25)
    }

    #[test]
    fn test_quiet_identity_scores_low() {
        let factor = evaluate(&[check("1h", 3_600, 1, 0.0, false)]).unwrap();
        assert!((factor.score - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_breach_is_elevated() {
        let checks = [check("1h", 3_600, 6, 10.0, true), check("24h", 86_400, 6, 0.0, false)];
        let factor = evaluate(&checks).unwrap();
        assert!((factor.score - 46.0).abs() < 1e-9);
        assert!(factor.description.contains("1h"));
    }

    #[test]
    fn test_tightest_breach_sets_score() {
        let checks = [
            check("1h", 3_600, 6, 10.0, true),
            check("24h", 86_400, 60, 90.0, true),
            check("7d", 604_800, 60, 50.0, true),
        ];
        let factor = evaluate(&checks).unwrap();
        // 40 + 0.6 * 10, not the 24h window's 90
        assert!((factor.score - 46.0).abs() < 1e-9);
        assert!(factor.description.contains("in the last 1h"));
    }

    #[test]
    fn test_severe_breach_reaches_ceiling() {
        let factor = evaluate(&[check("1h", 3_600, 20, 100.0, true)]).unwrap();
        assert_eq!(factor.score, 100.0);
    }

    #[test]
    fn test_missing_checks_is_an_error() {
        assert!(evaluate(&[]).is_err());

        let ctx = TransactionContext::new("tx", "user_1", 1_000, "USD", "pm");
        let inputs = EvaluationInputs::empty(Utc::now());
        assert!(VelocityEvaluator::new().evaluate(&ctx, &inputs, 0.25).is_err());
    }
}
