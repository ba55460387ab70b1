//! AMOUNT: size of the transaction relative to a configured baseline

use super::{EvaluationInputs, RiskEvaluator};
use crate::config::AmountConfig;
use crate::types::risk::{RiskFactor, RiskFactorType, NEUTRAL_SCORE};
use crate::types::transaction::TransactionContext;
use anyhow::Result;

pub struct AmountEvaluator {
    config: AmountConfig,
}

impl AmountEvaluator {
    pub fn new(config: AmountConfig) -> Self {
        Self { config }
    }

    /// Score for an amount: `curve_scale` points per doubling of (1 + amount/baseline).
    /// Monotonically non-decreasing in `amount`.
    pub fn score(&self, amount: i64, currency: &str) -> f64 {
        let baseline = self.config.baseline_for(currency) as f64;
        let ratio = amount.max(0) as f64 / baseline;
        (self.config.curve_scale * (1.0 + ratio).log2()).clamp(0.0, 100.0)
    }
}

impl RiskEvaluator for AmountEvaluator {
    fn factor_type(&self) -> RiskFactorType {
        RiskFactorType::Amount
    }

    fn evaluate(
        &self,
        ctx: &TransactionContext,
        _inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor> {
        if ctx.amount <= 0 {
            return Ok(RiskFactor::new(
                RiskFactorType::Amount,
                NEUTRAL_SCORE,
                weight,
                format!("Invalid amount {}", ctx.amount),
            ));
        }

        let baseline = self.config.baseline_for(&ctx.currency);
        let score = self.score(ctx.amount, &ctx.currency);

        Ok(RiskFactor::new(
            RiskFactorType::Amount,
            score,
            weight,
            format!(
                "Amount {} {} is {:.1}x the baseline",
                ctx.amount,
                ctx.currency.trim().to_ascii_uppercase(),
                ctx.amount as f64 / baseline as f64
            ),
        ))
    }
}
