//! Online recalibration of factor weights from labeled outcomes
//!
//! A batch is validated in full before anything changes. The weight-adjustment
//! step sits behind [`WeightAdjuster`] so a different model can replace it
//! without touching the scoring contract.

use super::weights::{WeightStore, WeightTable};
use crate::config::ModelConfig;
use crate::error::ModelUpdateError;
use crate::types::risk::{RiskFactor, RiskFactorType};
use crate::types::training::{Outcome, TrainingExample};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

/// A validated training example
#[derive(Debug, Clone, Copy)]
pub struct LabeledExample<'a> {
    pub features: &'a [RiskFactor],
    pub outcome: Outcome,
    pub confidence: f64,
}

/// Proposes weight changes for a validated batch
pub trait WeightAdjuster: Send + Sync {
    fn name(&self) -> &'static str;

    /// Raw per-dimension deltas; the updater caps and bounds them
    fn propose(&self, current: &WeightTable, batch: &[LabeledExample<'_>]) -> BTreeMap<RiskFactorType, f64>;
}

/// Gradient step on squared error of the weighted-mean prediction
#[derive(Debug, Clone)]
pub struct GradientAdjuster {
    learning_rate: f64,
}

impl GradientAdjuster {
    pub fn new(learning_rate: f64) -> Self {
        Self { learning_rate }
    }
}

impl WeightAdjuster for GradientAdjuster {
    fn name(&self) -> &'static str {
        "gradient"
    }

    fn propose(&self, current: &WeightTable, batch: &[LabeledExample<'_>]) -> BTreeMap<RiskFactorType, f64> {
        let mut deltas: BTreeMap<RiskFactorType, f64> = BTreeMap::new();
        if batch.is_empty() {
            return deltas;
        }

        for example in batch {
            // Score each dimension once; duplicates keep the last seen
            let scores: BTreeMap<RiskFactorType, f64> = example
                .features
                .iter()
                .filter(|f| RiskFactorType::SCORED.contains(&f.kind))
                .map(|f| (f.kind, f.score / 100.0))
                .collect();

            let total: f64 = scores.keys().map(|&kind| current.weight(kind)).sum();
            if total <= 0.0 {
                continue;
            }

            let prediction = scores
                .iter()
                .map(|(&kind, &score)| current.weight(kind) * score)
                .sum::<f64>()
                / total;
            let error = prediction - example.outcome.target();

            for (&kind, &score) in &scores {
                // d(prediction)/d(w_k) for a normalized weighted mean
                let gradient = error * (score - prediction) / total;
                *deltas.entry(kind).or_insert(0.0) -= self.learning_rate * example.confidence * gradient;
            }
        }

        let n = batch.len() as f64;
        for delta in deltas.values_mut() {
            *delta /= n;
        }
        deltas
    }
}

/// Outcome of an accepted batch
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateSummary {
    /// Version of the weight table now in effect
    pub version: u64,
    /// Capped change applied to each dimension
    pub applied_deltas: BTreeMap<RiskFactorType, f64>,
    pub examples: usize,
}

/// Applies labeled outcomes to the shared weight table.
///
/// Updates are serialized; concurrent scorers see either the old or the new
/// table, never a mix.
pub struct ModelUpdater {
    weights: Arc<WeightStore>,
    adjuster: Box<dyn WeightAdjuster>,
    max_step: f64,
    min_weight: f64,
    max_weight: f64,
    persist_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl ModelUpdater {
    pub fn new(weights: Arc<WeightStore>, config: &ModelConfig) -> Self {
        Self {
            weights,
            adjuster: Box::new(GradientAdjuster::new(config.learning_rate)),
            max_step: config.max_step.abs(),
            min_weight: config.min_weight,
            max_weight: config.max_weight,
            persist_path: None,
            write_lock: Mutex::new(()),
        }
    }

    /// Replace the weight-adjustment model
    pub fn with_adjuster(mut self, adjuster: Box<dyn WeightAdjuster>) -> Self {
        self.adjuster = adjuster;
        self
    }

    /// Save every accepted table to `path` before it takes effect
    pub fn with_persistence(mut self, path: impl Into<PathBuf>) -> Self {
        self.persist_path = Some(path.into());
        self
    }

    pub fn weights(&self) -> &Arc<WeightStore> {
        &self.weights
    }

    /// Validate `examples` and, if every one is well formed, adjust the weights.
    ///
    /// On error nothing changes.
    pub fn update_fraud_model(&self, examples: &[TrainingExample]) -> Result<UpdateSummary, ModelUpdateError> {
        let batch = match validate_batch(examples) {
            Ok(batch) => batch,
            Err(e) => {
                warn!(error = %e, examples = examples.len(), "Rejected training batch");
                return Err(e);
            }
        };

        let _guard = self.write_lock.lock();
        let current = self.weights.snapshot();

        let applied_deltas: BTreeMap<RiskFactorType, f64> = self
            .adjuster
            .propose(&current, &batch)
            .into_iter()
            .filter(|(_, delta)| delta.is_finite())
            .map(|(kind, delta)| (kind, delta.clamp(-self.max_step, self.max_step)))
            .collect();

        let next = current.with_adjustments(&applied_deltas, self.min_weight, self.max_weight);
        if let Some(path) = &self.persist_path {
            next.save_to_path(path)?;
        }

        let version = next.version();
        self.weights.replace(next);

        info!(
            adjuster = self.adjuster.name(),
            version = version,
            examples = batch.len(),
            deltas = ?applied_deltas,
            "Weight table updated"
        );

        Ok(UpdateSummary {
            version,
            applied_deltas,
            examples: batch.len(),
        })
    }
}

fn validate_batch(examples: &[TrainingExample]) -> Result<Vec<LabeledExample<'_>>, ModelUpdateError> {
    if examples.is_empty() {
        return Err(ModelUpdateError::EmptyBatch);
    }

    examples
        .iter()
        .enumerate()
        .map(|(index, example)| {
            if !(0.0..=1.0).contains(&example.confidence) {
                return Err(ModelUpdateError::ConfidenceOutOfRange {
                    index,
                    confidence: example.confidence,
                });
            }
            let outcome = example
                .outcome()
                .ok_or_else(|| ModelUpdateError::UnrecognizedOutcome {
                    index,
                    label: example.actual_outcome.clone(),
                })?;
            let transaction_id = example.transaction_id.trim();
            if transaction_id.is_empty() {
                return Err(ModelUpdateError::MissingTransactionId { index });
            }
            if example.features.is_empty() {
                return Err(ModelUpdateError::MissingFeatures {
                    index,
                    transaction_id: transaction_id.to_string(),
                });
            }
            if let Some(bad) = example.features.iter().find(|f| !f.in_range()) {
                return Err(ModelUpdateError::InvalidFeature {
                    index,
                    transaction_id: transaction_id.to_string(),
                    reason: format!("{} score {} weight {}", bad.kind, bad.score, bad.weight),
                });
            }

            Ok(LabeledExample {
                features: &example.features,
                outcome,
                confidence: example.confidence,
            })
        })
        .collect()
}
