//! Risk scoring engine: runs every evaluator and folds the factors into a decision

use super::aggregator::{ConfidenceInputs, ScoreAggregator};
use super::policy::DecisionPolicy;
use crate::config::EngineConfig;
use crate::error::{ConfigError, ValidationError, VelocityCheckError};
use crate::evaluators::{default_evaluators, EvaluationInputs, RiskEvaluator};
use crate::fingerprint::DeviceFingerprintGenerator;
use crate::history::{bounded_lookup, HistoryStore, Lookup};
use crate::metrics::EngineMetrics;
use crate::model::{ModelUpdater, WeightStore, WeightTable};
use crate::types::device::{DeviceAttributes, DeviceFingerprint, DeviceObservation};
use crate::types::risk::{Decision, RiskFactor, RiskFactorType, RiskScore};
use crate::types::transaction::TransactionContext;
use crate::types::velocity::VelocityCheck;
use crate::velocity::VelocityTracker;
use chrono::Utc;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Confidence ceiling for assessments of critically malformed input
const CRITICAL_INPUT_CONFIDENCE: f64 = 0.45;
/// Confidence multiplier for non-critical input problems
const INVALID_INPUT_PENALTY: f64 = 0.8;
/// Confidence ceiling for any malformed input
const INVALID_INPUT_CONFIDENCE: f64 = 0.49;
/// Factor score at which a recommendation is attached
const RECOMMENDATION_SCORE: f64 = 60.0;

/// Scores transactions.
///
/// Shared state (velocity counters, weights, metrics) sits behind `Arc`, so one
/// engine serves any number of concurrent `analyze_transaction` calls.
pub struct RiskScoringEngine {
    policy: DecisionPolicy,
    aggregator: ScoreAggregator,
    evaluators: Vec<Box<dyn RiskEvaluator>>,
    velocity: Arc<VelocityTracker>,
    fingerprints: DeviceFingerprintGenerator,
    weights: Arc<WeightStore>,
    history: Arc<dyn HistoryStore>,
    lookup_timeout: Duration,
    metrics: Arc<EngineMetrics>,
}

impl RiskScoringEngine {
    /// Build an engine from validated configuration
    pub fn new(config: &EngineConfig, history: Arc<dyn HistoryStore>) -> Result<Self, ConfigError> {
        config.validate()?;

        Ok(Self {
            policy: config.scoring.clone(),
            aggregator: ScoreAggregator::new(),
            evaluators: default_evaluators(config),
            velocity: Arc::new(VelocityTracker::new(&config.velocity)),
            fingerprints: DeviceFingerprintGenerator::new(config.device.clone()),
            weights: Arc::new(WeightStore::new(WeightTable::from_config(&config.model))),
            history,
            lookup_timeout: config.lookup.timeout(),
            metrics: Arc::new(EngineMetrics::new()),
        })
    }

    /// Share an existing weight store (e.g. one loaded from disk)
    pub fn with_weights(mut self, weights: Arc<WeightStore>) -> Self {
        self.weights = weights;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<EngineMetrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Replace the evaluator set
    pub fn with_evaluators(mut self, evaluators: Vec<Box<dyn RiskEvaluator>>) -> Self {
        self.evaluators = evaluators;
        self
    }

    pub fn velocity(&self) -> &Arc<VelocityTracker> {
        &self.velocity
    }

    pub fn weights(&self) -> &Arc<WeightStore> {
        &self.weights
    }

    pub fn metrics(&self) -> &Arc<EngineMetrics> {
        &self.metrics
    }

    /// Updater that publishes into this engine's weight store
    pub fn model_updater(&self, config: &EngineConfig) -> ModelUpdater {
        let updater = ModelUpdater::new(self.weights.clone(), &config.model);
        match &config.model.weights_path {
            Some(path) => updater.with_persistence(path),
            None => updater,
        }
    }

    /// Fingerprint a device. Never fails.
    pub fn generate_device_fingerprint(
        &self,
        attributes: &DeviceAttributes,
        observation: Option<&DeviceObservation>,
    ) -> DeviceFingerprint {
        self.fingerprints.generate_device_fingerprint(attributes, observation)
    }

    pub fn check_velocity(
        &self,
        user_id: &str,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<Vec<VelocityCheck>, VelocityCheckError> {
        self.velocity.check_velocity(user_id, customer_id, payment_method_id)
    }

    /// Count a transaction toward velocity once the caller has acted on its score
    pub fn record_transaction(&self, ctx: &TransactionContext) {
        let device_id = self.device_id(ctx);
        self.velocity.record_transaction(ctx, device_id.as_deref());
    }

    /// Score a transaction.
    ///
    /// Never fails: malformed input, slow collaborators and failing evaluators
    /// all degrade to a complete, more conservative assessment. Reads state
    /// only, so repeating the call yields the same decision.
    pub async fn analyze_transaction(&self, ctx: &TransactionContext) -> RiskScore {
        let started = Instant::now();
        let now = Utc::now();

        let issues = ctx.validate();
        for issue in &issues {
            warn!(transaction_id = %ctx.transaction_id, issue = %issue, "Malformed transaction context");
        }
        let critical = issues.iter().any(ValidationError::is_critical);
        if !issues.is_empty() {
            self.metrics.record_invalid_input();
        }

        let attributes = device_attributes(ctx);
        let device_id = self.device_id(ctx);

        let user_lookup = async {
            if ctx.user_id.trim().is_empty() && ctx.customer().is_none() {
                return Lookup::Missing;
            }
            bounded_lookup(
                "user_history",
                self.lookup_timeout,
                self.history.user_history(ctx.user_id.trim(), ctx.customer()),
            )
            .await
        };
        let device_lookup = async {
            match &device_id {
                Some(id) => {
                    bounded_lookup("device_observation", self.lookup_timeout, self.history.device_observation(id))
                        .await
                }
                None => Lookup::Missing,
            }
        };
        let (history, observation) = tokio::join!(user_lookup, device_lookup);

        for degraded in [history.is_degraded(), observation.is_degraded()] {
            if degraded {
                self.metrics.record_degraded_lookup();
            }
        }

        let device = match (&attributes, &device_id) {
            (Some(attributes), Some(id)) => {
                let mut fingerprint = self.fingerprints.generate_at(attributes, observation.found(), now);
                fingerprint.id = id.clone();
                Some(fingerprint)
            }
            _ => None,
        };

        let velocity = match self.velocity.check_velocity_at(
            &ctx.user_id,
            ctx.customer().unwrap_or_default(),
            &ctx.payment_method_id,
            now,
        ) {
            Ok(checks) => Some(checks),
            Err(e) => {
                debug!(transaction_id = %ctx.transaction_id, error = %e, "Velocity check skipped");
                None
            }
        };

        let inputs = EvaluationInputs {
            now,
            history: history.found(),
            velocity: velocity.as_deref(),
            device: device.as_ref(),
            device_observation: observation.found(),
        };

        let weights = self.weights.snapshot();
        let mut offered_weight = 0.0;
        let mut factors = Vec::with_capacity(self.evaluators.len() + 1);

        for evaluator in &self.evaluators {
            let kind = evaluator.factor_type();
            let weight = weights.weight(kind);
            offered_weight += weight;

            let result = catch_unwind(AssertUnwindSafe(|| evaluator.evaluate(ctx, &inputs, weight)));
            let failure = match result {
                Ok(Ok(factor)) => {
                    // Evaluators may shed weight but never add it
                    factors.push(RiskFactor::new(
                        kind,
                        factor.score,
                        factor.weight.min(weight),
                        factor.description,
                    ));
                    continue;
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => "evaluator panicked".to_string(),
            };

            warn!(
                transaction_id = %ctx.transaction_id,
                factor = %kind,
                error = %failure,
                "Risk evaluator failed, factor excluded"
            );
            self.metrics.record_evaluator_failure();
            factors.push(RiskFactor::informational(kind, format!("Unavailable: {failure}")));
        }

        if !issues.is_empty() {
            let described: Vec<String> = issues.iter().map(ToString::to_string).collect();
            factors.push(RiskFactor::informational(
                RiskFactorType::InputValidation,
                described.join("; "),
            ));
        }

        let overall_score = self.aggregator.aggregate(&factors);
        let outcome = self.policy.decide(overall_score, &factors);

        let mut confidence = self.aggregator.confidence(ConfidenceInputs {
            factors: &factors,
            offered_weight,
            completeness: ctx.completeness(),
            history_available: history.found().is_some(),
        });

        let decision = if critical {
            confidence = confidence.min(CRITICAL_INPUT_CONFIDENCE);
            Decision::Review
        } else if !issues.is_empty() {
            // Malformed input is never approved outright
            confidence = (confidence * INVALID_INPUT_PENALTY).min(INVALID_INPUT_CONFIDENCE);
            outcome.decision.max(Decision::Review)
        } else {
            outcome.decision
        };
        let severity_override = outcome.severity_override && !critical;

        if severity_override {
            info!(
                transaction_id = %ctx.transaction_id,
                overall_score = overall_score,
                decision = %decision,
                "Severe factor raised decision above aggregate"
            );
        }

        factors.sort_by(|a, b| {
            b.contribution()
                .total_cmp(&a.contribution())
                .then(a.kind.cmp(&b.kind))
        });
        let recommendations = recommendations(
            decision,
            &factors,
            severity_override,
            !issues.is_empty(),
            &self.policy,
        );

        let score = RiskScore {
            assessment_id: Uuid::new_v4(),
            transaction_id: ctx.transaction_id.clone(),
            overall_score,
            risk_level: outcome.risk_level,
            decision,
            confidence: confidence.clamp(0.0, 1.0),
            factors,
            recommendations,
            severity_override,
            evaluated_at: now,
        };

        let elapsed = started.elapsed();
        self.metrics.record_assessment(elapsed, &score);
        debug!(
            transaction_id = %score.transaction_id,
            overall_score = score.overall_score,
            decision = %score.decision,
            confidence = score.confidence,
            weights_version = weights.version(),
            processing_time_us = elapsed.as_micros() as u64,
            "Transaction scored"
        );

        score
    }

    /// Identifier the device is known by: the supplied fingerprint, else one derived from attributes
    pub fn device_id(&self, ctx: &TransactionContext) -> Option<String> {
        let supplied = ctx
            .device_fingerprint
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty());
        match supplied {
            Some(id) => Some(id.to_string()),
            None => device_attributes(ctx).map(|attributes| self.fingerprints.fingerprint_id(&attributes)),
        }
    }
}

/// Raw device attributes, falling back to the transport user agent
fn device_attributes(ctx: &TransactionContext) -> Option<DeviceAttributes> {
    let mut attributes = ctx.device_attributes.clone().unwrap_or_default();
    if attributes.get("user_agent").is_none() && !ctx.user_agent.trim().is_empty() {
        attributes.insert("user_agent", &ctx.user_agent);
    }

    let has_supplied_id = ctx
        .device_fingerprint
        .as_deref()
        .is_some_and(|id| !id.trim().is_empty());
    if attributes.is_empty() && !has_supplied_id {
        None
    } else {
        Some(attributes)
    }
}

fn recommendations(
    decision: Decision,
    factors: &[RiskFactor],
    severity_override: bool,
    malformed: bool,
    policy: &DecisionPolicy,
) -> Vec<String> {
    let mut out = vec![match decision {
        Decision::Approve => "Approve transaction".to_string(),
        Decision::Review => "Route to manual review".to_string(),
        Decision::Decline => "Decline transaction".to_string(),
    }];

    if malformed {
        out.push("Correct malformed transaction data and resubmit".to_string());
    }

    if severity_override {
        if let Some(severe) = factors
            .iter()
            .find(|f| f.score >= policy.severity_score && f.weight >= policy.severity_weight)
        {
            out.push(format!("Severe {} signal overrides aggregate score", severe.kind));
        }
    }

    for factor in factors.iter().filter(|f| f.is_weighted() && f.score >= RECOMMENDATION_SCORE) {
        let advice = match factor.kind {
            RiskFactorType::Amount => "Confirm the amount with the cardholder",
            RiskFactorType::Velocity => "Throttle further attempts from this identity",
            RiskFactorType::Device => "Require step-up authentication on this device",
            RiskFactorType::TimePattern => "Verify activity outside the user's usual hours",
            RiskFactorType::Geography => "Verify billing address and client location",
            RiskFactorType::Behavioral => "Confirm account ownership before fulfilment",
            RiskFactorType::InputValidation => continue,
        };
        out.push(advice.to_string());
    }

    out
}
