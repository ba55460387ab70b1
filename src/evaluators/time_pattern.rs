//! TIME_PATTERN: transaction hour against the user's usual hours

use super::{no_data, EvaluationInputs, RiskEvaluator};
use crate::types::risk::{RiskFactor, RiskFactorType};
use crate::types::transaction::TransactionContext;
use anyhow::Result;
use chrono::Timelike;

/// Past transactions needed before hour-of-day habits mean anything
const MIN_SAMPLES: u64 = 5;
/// Share of activity within +-1 hour at which the hour counts as usual
const USUAL_MASS: f64 = 0.25;
const USUAL_SCORE: f64 = 5.0;
const UNUSUAL_SCORE: f64 = 80.0;

#[derive(Debug, Clone, Default)]
pub struct TimePatternEvaluator;

impl TimePatternEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl RiskEvaluator for TimePatternEvaluator {
    fn factor_type(&self) -> RiskFactorType {
        RiskFactorType::TimePattern
    }

    fn evaluate(
        &self,
        ctx: &TransactionContext,
        inputs: &EvaluationInputs<'_>,
        weight: f64,
    ) -> Result<RiskFactor> {
        let history = match inputs.history {
            Some(history) if history.hour_total() >= MIN_SAMPLES => history,
            _ => {
                return Ok(no_data(
                    RiskFactorType::TimePattern,
                    weight,
                    "Not enough history to judge time of day",
                ))
            }
        };

        let hour = ctx.timestamp.hour() as usize;
        // Circular neighbourhood, so 23:00 and 00:00 are adjacent
        let nearby: u64 = [23, 0, 1]
            .iter()
            .map(|offset| u64::from(history.hour_histogram[(hour + offset) % 24]))
            .sum();
        let mass = nearby as f64 / history.hour_total() as f64;

        let score = if mass >= USUAL_MASS {
            USUAL_SCORE
        } else {
            USUAL_SCORE + (UNUSUAL_SCORE - USUAL_SCORE) * (1.0 - mass / USUAL_MASS)
        };

        Ok(RiskFactor::new(
            RiskFactorType::TimePattern,
            score,
            weight,
            format!(
                "{:.0}% of past activity within an hour of {:02}:00 UTC",
                mass * 100.0,
                hour
            ),
        ))
    }
}
