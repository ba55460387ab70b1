//! End-to-end scoring scenarios

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use payment_risk_engine::{
    history::{HistoryStore, InMemoryHistoryStore, UserHistory},
    model::WeightStore,
    types::device::RiskIndicator,
    Decision, DeviceAttributes, DeviceObservation, EmptyHistoryStore, EngineConfig, ModelUpdateError,
    Outcome, RiskFactorType, RiskScoringEngine, TrainingExample, TransactionContext,
};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn engine() -> RiskScoringEngine {
    RiskScoringEngine::new(&EngineConfig::default(), Arc::new(EmptyHistoryStore)).unwrap()
}

fn minimal(tx: &str, user: &str, amount: i64) -> TransactionContext {
    TransactionContext::new(tx, user, amount, "USD", "pm_1")
}

/// Store that never answers in time
struct SlowStore;

#[async_trait]
impl HistoryStore for SlowStore {
    async fn user_history(&self, _user_id: &str, _customer_id: Option<&str>) -> Result<Option<UserHistory>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(Some(UserHistory::default()))
    }

    async fn device_observation(&self, _fingerprint_id: &str) -> Result<Option<DeviceObservation>> {
        tokio::time::sleep(Duration::from_secs(5)).await;
        Ok(None)
    }
}

#[tokio::test]
async fn test_minimal_context_scores_completely() {
    let score = engine().analyze_transaction(&minimal("tx_1", "user_1", 2_000)).await;

    assert!((0.0..=100.0).contains(&score.overall_score));
    assert!(score.confidence > 0.1 && score.confidence <= 1.0);
    assert_eq!(score.factors.len(), RiskFactorType::SCORED.len());
    assert!(score.factors.iter().all(|f| f.in_range()));
    assert!(!score.recommendations.is_empty());
    assert!(!score.severity_override);
}

#[tokio::test]
async fn test_large_amount_scores_higher_than_small() {
    let engine = engine();
    let small = engine.analyze_transaction(&minimal("tx_1", "user_1", 2_000)).await;
    let large = engine.analyze_transaction(&minimal("tx_2", "user_1", 500_000)).await;

    let amount = |s: &payment_risk_engine::RiskScore| s.factor(RiskFactorType::Amount).map(|f| f.score).unwrap();
    assert!(amount(&large) > amount(&small));
    assert!(large.overall_score > small.overall_score);
}

#[tokio::test]
async fn test_invalid_input_yields_low_confidence_review() {
    let engine = engine();
    let mut ctx = minimal("", "user_1", 0);
    ctx.ip_address = "999.1.1.1".into();

    let score = engine.analyze_transaction(&ctx).await;

    assert_eq!(score.decision, Decision::Review);
    assert!(score.confidence < 0.5);
    let validation = score.factor(RiskFactorType::InputValidation).unwrap();
    assert_eq!(validation.weight, 0.0);
    assert!(validation.description.contains("amount"));
    assert_eq!(engine.metrics().invalid_inputs.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_non_critical_issue_lowers_confidence() {
    let engine = engine();
    let clean = minimal("tx_1", "user_1", 2_000).with_client("198.51.100.1", "Mozilla/5.0");
    let mut broken = clean.clone();
    broken.currency = "DOLLARS".into();

    let clean_score = engine.analyze_transaction(&clean).await;
    let broken_score = engine.analyze_transaction(&broken).await;

    assert!(broken_score.confidence < clean_score.confidence);
    assert!(broken_score.confidence < 0.5);
    assert_eq!(clean_score.decision, Decision::Approve);
    assert_eq!(broken_score.decision, Decision::Review);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_analyze_and_record_loses_no_updates() {
    let engine = Arc::new(engine());

    let handles: Vec<_> = (0..5)
        .map(|i| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let ctx = minimal(&format!("tx_{i}"), "user_c", 1_500);
                let score = engine.analyze_transaction(&ctx).await;
                engine.record_transaction(&ctx);
                score
            })
        })
        .collect();

    for handle in handles {
        handle.await.unwrap();
    }

    let checks = engine.check_velocity("user_c", "", "").unwrap();
    assert_eq!(checks[0].transaction_count, 5);
    assert_eq!(checks[0].total_amount, 7_500);
}

#[tokio::test]
async fn test_burst_trips_velocity() {
    let engine = engine();
    for i in 0..8 {
        engine.record_transaction(&minimal(&format!("tx_{i}"), "user_b", 1_000));
    }

    let score = engine.analyze_transaction(&minimal("tx_next", "user_b", 1_000)).await;
    let velocity = score.factor(RiskFactorType::Velocity).unwrap();
    assert!(velocity.score >= 40.0);
    assert!(velocity.description.contains("1h"));
}

#[tokio::test]
async fn test_rejected_batch_leaves_weights_and_scores_unchanged() {
    let config = EngineConfig::default();
    let engine = engine();
    let ctx = minimal("tx_1", "user_1", 40_000);
    let before = engine.analyze_transaction(&ctx).await;
    let weights_before = engine.weights().snapshot();

    let updater = engine.model_updater(&config);
    let batch = vec![
        TrainingExample::new("tx_a", before.factors.clone(), Outcome::Fraud, 0.9),
        TrainingExample::new("tx_b", before.factors.clone(), Outcome::Legitimate, 1.5),
    ];
    let result = updater.update_fraud_model(&batch);

    assert!(matches!(result, Err(ModelUpdateError::ConfidenceOutOfRange { index: 1, .. })));
    assert_eq!(*engine.weights().snapshot(), *weights_before);

    let after = engine.analyze_transaction(&ctx).await;
    assert_eq!(after.overall_score, before.overall_score);
}

#[tokio::test]
async fn test_accepted_batch_is_visible_to_scoring() {
    let config = EngineConfig::default();
    let engine = engine();
    let ctx = minimal("tx_1", "user_1", 400_000);
    let before = engine.analyze_transaction(&ctx).await;

    let batch = vec![TrainingExample::new("tx_1", before.factors.clone(), Outcome::Fraud, 1.0)];
    let summary = engine.model_updater(&config).update_fraud_model(&batch).unwrap();

    assert_eq!(summary.version, 1);
    assert_eq!(engine.weights().snapshot().version(), 1);
    let after = engine.analyze_transaction(&ctx).await;
    assert!(after.overall_score > before.overall_score);
}

#[tokio::test]
async fn test_slow_history_degrades_instead_of_blocking() {
    let engine = RiskScoringEngine::new(&EngineConfig::default(), Arc::new(SlowStore)).unwrap();
    let started = Instant::now();

    let score = engine.analyze_transaction(&minimal("tx_1", "user_1", 2_000)).await;

    assert!(started.elapsed() < Duration::from_secs(2));
    assert!((0.0..=1.0).contains(&score.confidence));
    assert_eq!(engine.metrics().degraded_lookups.load(Ordering::Relaxed), 1);
}

#[tokio::test]
async fn test_single_severe_factor_forces_review() {
    let mut config = EngineConfig::default();
    config.model.weights.insert("amount".into(), 0.6);
    config.model.weights.insert("velocity".into(), 0.6);
    config.model.weights.insert("device".into(), 0.35);

    let store = Arc::new(InMemoryHistoryStore::new());
    let now = Utc::now();
    store.insert_device(
        "fp_bad",
        DeviceObservation {
            first_seen: now - ChronoDuration::days(3),
            last_seen: now,
            seen_count: 4,
            distinct_users: 1,
            flagged: true,
        },
    );
    let engine = RiskScoringEngine::new(&config, store).unwrap();

    let attributes = DeviceAttributes::new()
        .with("user_agent", "Mozilla/5.0 HeadlessChrome/124.0")
        .with("webdriver", "true");
    let ctx = minimal("tx_1", "user_1", 1_000)
        .with_device_fingerprint("fp_bad")
        .with_device_attributes(attributes);

    let score = engine.analyze_transaction(&ctx).await;

    assert!(score.overall_score < 30.0, "aggregate was {}", score.overall_score);
    assert_eq!(score.decision, Decision::Review);
    assert!(score.severity_override);
    assert_eq!(score.factors[0].kind, RiskFactorType::Device);
    assert_eq!(score.factors[0].score, 100.0);
}

#[tokio::test]
async fn test_known_device_with_history_is_approved_confidently() {
    let store = Arc::new(InMemoryHistoryStore::new());
    let engine = RiskScoringEngine::new(&EngineConfig::default(), store.clone()).unwrap();

    let attributes = DeviceAttributes::new()
        .with("user_agent", "Mozilla/5.0 (Macintosh) AppleWebKit/605.1.15 Version/17.0 Safari/605.1.15")
        .with("language", "en-US")
        .with("timezone", "Europe/Berlin")
        .with("platform", "MacIntel")
        .with("screen_resolution", "1440x900")
        .with("color_depth", "24")
        .with("hardware_concurrency", "8")
        .with("canvas_hash", "9a1f")
        .with("webgl_vendor", "Apple Inc.")
        .with("plugins", "pdf");
    let device_id = engine.generate_device_fingerprint(&attributes, None).id;

    let mut history = UserHistory::default();
    for days in 1..=12 {
        history.observe(Utc::now() - ChronoDuration::days(days * 5), 2_500, None, "pm_1");
    }
    history.usual_currency = Some("USD".into());
    store.insert_user("user_k", history);
    store.insert_device(
        device_id.clone(),
        DeviceObservation {
            first_seen: Utc::now() - ChronoDuration::days(200),
            last_seen: Utc::now() - ChronoDuration::days(5),
            seen_count: 30,
            distinct_users: 1,
            flagged: false,
        },
    );

    let ctx = minimal("tx_k", "user_k", 2_400)
        .with_customer("cus_k")
        .with_client("203.0.113.9", attributes.get("user_agent").unwrap_or_default())
        .with_device_attributes(attributes);

    let score = engine.analyze_transaction(&ctx).await;

    assert_eq!(score.decision, Decision::Approve);
    assert!(score.confidence > 0.6, "confidence was {}", score.confidence);

    let fingerprint = engine.generate_device_fingerprint(ctx.device_attributes.as_ref().unwrap(), None);
    assert!(fingerprint.has_indicator(RiskIndicator::FirstObservation));
}

#[tokio::test]
async fn test_missing_velocity_identifiers_is_misuse() {
    let engine = engine();
    assert!(engine.check_velocity("", " ", "").is_err());

    // Scoring the same context still succeeds and drops the factor
    let mut ctx = minimal("tx_1", "", 2_000);
    ctx.payment_method_id = String::new();
    let score = engine.analyze_transaction(&ctx).await;
    assert_eq!(score.factor(RiskFactorType::Velocity).unwrap().weight, 0.0);
}

#[tokio::test]
async fn test_future_dated_record_does_not_hide_live_burst() {
    let engine = engine();
    let ahead = minimal("tx_ahead", "user_f", 1_000).with_timestamp(Utc::now() + ChronoDuration::hours(3));
    engine.record_transaction(&ahead);
    for i in 0..10 {
        engine.record_transaction(&minimal(&format!("tx_{i}"), "user_f", 1_000));
    }

    let score = engine.analyze_transaction(&minimal("tx_next", "user_f", 1_000)).await;
    let velocity = score.factor(RiskFactorType::Velocity).unwrap();
    assert!(velocity.score >= 40.0, "velocity was {}", velocity.score);
    assert!(velocity.description.contains("1h"));
}

#[test]
fn test_weight_store_is_shared() {
    let store = Arc::new(WeightStore::from_config(&EngineConfig::default().model));
    let engine = engine().with_weights(store.clone());
    assert!(Arc::ptr_eq(engine.weights(), &store));
}
