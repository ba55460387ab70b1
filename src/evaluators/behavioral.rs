//! BEHAVIORAL: departure from the user's established spending habits

use super::{no_data, EvaluationInputs, RiskEvaluator};
use crate::types::risk::{RiskFactor, RiskFactorType};
use crate::types::transaction::TransactionContext;
use anyhow::Result;
use chrono::Duration;

/// Past transactions needed before habits are established
const MIN_HISTORY: u64 = 3;
const BASE_SCORE: f64 = 5.0;
const NEW_PAYMENT_METHOD: f64 = 25.0;
const CURRENCY_CHANGE: f64 = 15.0;
const NEW_ACCOUNT: f64 = 20.0;
/// Amount z-score beyond which the amount is out of character
const AMOUNT_Z_LIMIT: f64 = 2.0;
const MAX_AMOUNT_PENALTY: f64 = 40.0;

#[derive(Debug, Clone, Default)]
pub struct BehavioralEvaluator;

impl BehavioralEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl RiskEvaluator for BehavioralEvaluator {
    fn factor_type(&self) -> RiskFactorType {
        RiskFactorType::Behavioral
    }

    fn evaluate(
        &self,
        ctx: &TransactionContext,
        inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor> {
        let history = match inputs.history {
            Some(history) if history.transaction_count >= MIN_HISTORY => history,
            _ => {
                return Ok(no_data(
                    RiskFactorType::Behavioral,
                    weight,
                    "No established spending pattern",
                ))
            }
        };

        let mut score = BASE_SCORE;
        let mut reasons = Vec::new();

        let payment_method = ctx.payment_method_id.trim();
        if !history.known_payment_methods.is_empty()
            && !history.known_payment_methods.contains(payment_method)
        {
            score += NEW_PAYMENT_METHOD;
            reasons.push("new payment method".to_string());
        }

        if let Some(usual) = &history.usual_currency {
            if !usual.eq_ignore_ascii_case(ctx.currency.trim()) {
                score += CURRENCY_CHANGE;
                reasons.push(format!("currency {} differs from usual {usual}", ctx.currency.trim()));
            }
        }

        if let Some(mean) = history.average_amount.filter(|m| *m > 0.0) {
            // Floor the spread so a perfectly regular spender is not flagged for cents
            let spread = history.amount_std_dev.unwrap_or(0.0).max(mean * 0.1).max(1.0);
            let z = (ctx.amount as f64 - mean) / spread;
            if z > AMOUNT_Z_LIMIT {
                score += ((z - AMOUNT_Z_LIMIT) * 10.0 + 10.0).min(MAX_AMOUNT_PENALTY);
                reasons.push(format!("amount {z:.1} deviations above average"));
            }
        }

        if let Some(first_seen) = history.first_seen {
            if inputs.now - first_seen < Duration::hours(24) {
                score += NEW_ACCOUNT;
                reasons.push("account active for less than a day".to_string());
            }
        }

        let description = if reasons.is_empty() {
            format!("Consistent with {} past transactions", history.transaction_count)
        } else {
            reasons.join("; ")
        };

        Ok(RiskFactor::new(RiskFactorType::Behavioral, score, weight, description))
    }
}
