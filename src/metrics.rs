//! In-process metrics for the risk engine.

use crate::scoring::aggregator::ScoreAggregator;
use crate::types::risk::{Decision, RiskScore};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

/// Latency samples kept for percentiles
const LATENCY_SAMPLES: usize = 4_096;
/// Fixed-point scale for summed agreement values
const AGREEMENT_SCALE: f64 = 1_000_000.0;
const DECISIONS: [Decision; 3] = [Decision::Approve, Decision::Review, Decision::Decline];

/// Metrics collector for scoring activity.
///
/// Every recording path is a handful of relaxed atomic updates, so concurrent
/// scorers never queue behind one another here.
pub struct EngineMetrics {
    /// Total transactions scored
    pub transactions_scored: AtomicU64,
    /// Evaluators that failed or panicked and were replaced by a neutral factor
    pub evaluator_failures: AtomicU64,
    /// History lookups that timed out or failed
    pub degraded_lookups: AtomicU64,
    /// Assessments raised to REVIEW by a single severe factor
    pub severity_overrides: AtomicU64,
    /// Assessments with malformed input
    pub invalid_inputs: AtomicU64,
    /// Indexed like `DECISIONS`
    decisions: [AtomicU64; 3],
    /// Ring of recent processing times (in microseconds)
    processing_times: Box<[AtomicU64]>,
    processing_cursor: AtomicU64,
    /// Overall score distribution in buckets of 10
    score_buckets: [AtomicU64; 10],
    /// Factor agreement, summed in millionths
    agreement_sum: AtomicU64,
    start_time: Instant,
}

impl EngineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_scored: AtomicU64::new(0),
            evaluator_failures: AtomicU64::new(0),
            degraded_lookups: AtomicU64::new(0),
            severity_overrides: AtomicU64::new(0),
            invalid_inputs: AtomicU64::new(0),
            decisions: std::array::from_fn(|_| AtomicU64::new(0)),
            processing_times: (0..LATENCY_SAMPLES).map(|_| AtomicU64::new(0)).collect(),
            processing_cursor: AtomicU64::new(0),
            score_buckets: std::array::from_fn(|_| AtomicU64::new(0)),
            agreement_sum: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    /// Record a completed assessment
    pub fn record_assessment(&self, processing_time: Duration, score: &RiskScore) {
        if score.severity_override {
            self.severity_overrides.fetch_add(1, Ordering::Relaxed);
        }

        let slot = self.processing_cursor.fetch_add(1, Ordering::Relaxed) as usize % LATENCY_SAMPLES;
        self.processing_times[slot].store(processing_time.as_micros() as u64, Ordering::Relaxed);

        let bucket = ((score.overall_score / 10.0) as usize).min(9);
        self.score_buckets[bucket].fetch_add(1, Ordering::Relaxed);

        self.decisions[decision_index(score.decision)].fetch_add(1, Ordering::Relaxed);

        let agreement = ScoreAggregator::agreement(&score.factors).clamp(0.0, 1.0);
        self.agreement_sum
            .fetch_add((agreement * AGREEMENT_SCALE).round() as u64, Ordering::Relaxed);

        self.transactions_scored.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_evaluator_failure(&self) {
        self.evaluator_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_degraded_lookup(&self) {
        self.degraded_lookups.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_invalid_input(&self) {
        self.invalid_inputs.fetch_add(1, Ordering::Relaxed);
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let filled = (self.processing_cursor.load(Ordering::Relaxed) as usize).min(LATENCY_SAMPLES);
        let mut sorted: Vec<u64> = self.processing_times[..filled]
            .iter()
            .map(|t| t.load(Ordering::Relaxed))
            .collect();
        if sorted.is_empty() {
            return ProcessingStats::default();
        }
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: sorted[(count as f64 * 0.95) as usize],
            p99_us: sorted[(count as f64 * 0.99) as usize],
            max_us: sorted[count - 1],
        }
    }

    /// Average agreement between factors across assessments
    pub fn get_avg_agreement(&self) -> f64 {
        let count = self.transactions_scored.load(Ordering::Relaxed);
        if count == 0 {
            return 0.0;
        }
        self.agreement_sum.load(Ordering::Relaxed) as f64 / AGREEMENT_SCALE / count as f64
    }

    /// Get current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_scored.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        std::array::from_fn(|i| self.score_buckets[i].load(Ordering::Relaxed))
    }

    pub fn get_decisions(&self) -> HashMap<Decision, u64> {
        DECISIONS
            .iter()
            .zip(&self.decisions)
            .map(|(&decision, count)| (decision, count.load(Ordering::Relaxed)))
            .filter(|&(_, count)| count > 0)
            .collect()
    }

    /// Log summary statistics
    pub fn print_summary(&self) {
        let tx_count = self.transactions_scored.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let agreement = self.get_avg_agreement();
        let decisions = self.get_decisions();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║                RISK ENGINE - METRICS SUMMARY                 ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Scored:    {:>8}  │  Throughput: {:>6.1} tx/s ║",
            tx_count, throughput
        );
        info!(
            "║ Evaluator Failures: {:>6}  Degraded Lookups: {:>6}          ║",
            self.evaluator_failures.load(Ordering::Relaxed),
            self.degraded_lookups.load(Ordering::Relaxed)
        );
        info!(
            "║ Invalid Inputs:     {:>6}  Severity Overrides: {:>6}        ║",
            self.invalid_inputs.load(Ordering::Relaxed),
            self.severity_overrides.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!(
            "║ Factor Agreement: {:>5.1}% (higher = factors agree more)      ║",
            agreement * 100.0
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Decisions:                                                   ║");
        for decision in DECISIONS {
            let count = decisions.get(&decision).copied().unwrap_or(0);
            let pct = if tx_count > 0 {
                (count as f64 / tx_count as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)                                ║", decision, count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Risk Score Distribution:                                     ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!("║   {:>3}-{:<3}: {:>6} ({:>5.1}%) {}", i * 10, (i + 1) * 10, count, pct, bar);
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn decision_index(decision: Decision) -> usize {
    match decision {
        Decision::Approve => 0,
        Decision::Review => 1,
        Decision::Decline => 2,
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Periodically logs a metrics summary
pub struct MetricsReporter {
    metrics: Arc<EngineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<EngineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs,
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs.max(1)));
        // First tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::risk::{RiskFactor, RiskFactorType, RiskLevel};
    use chrono::Utc;
    use uuid::Uuid;

    fn score(overall: f64, decision: Decision, factors: Vec<RiskFactor>) -> RiskScore {
        RiskScore {
            assessment_id: Uuid::new_v4(),
            transaction_id: "tx".into(),
            overall_score: overall,
            risk_level: RiskLevel::Low,
            decision,
            confidence: 0.8,
            factors,
            recommendations: vec![],
            severity_override: false,
            evaluated_at: Utc::now(),
        }
    }

    #[test]
    fn test_metrics_recording() {
        let metrics = EngineMetrics::new();

        metrics.record_assessment(Duration::from_micros(100), &score(12.0, Decision::Approve, vec![]));
        metrics.record_assessment(Duration::from_micros(200), &score(100.0, Decision::Decline, vec![]));
        metrics.record_evaluator_failure();

        assert_eq!(metrics.transactions_scored.load(Ordering::Relaxed), 2);
        assert_eq!(metrics.evaluator_failures.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_decisions().get(&Decision::Decline), Some(&1));

        let dist = metrics.get_score_distribution();
        assert_eq!(dist[1], 1);
        assert_eq!(dist[9], 1);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 2);
        assert_eq!(stats.max_us, 200);
    }

    #[test]
    fn test_factor_agreement() {
        let metrics = EngineMetrics::new();
        let factors = vec![
            RiskFactor::new(RiskFactorType::Amount, 80.0, 0.25, "a"),
            RiskFactor::new(RiskFactorType::Velocity, 82.0, 0.25, "b"),
            RiskFactor::new(RiskFactorType::Device, 79.0, 0.2, "c"),
        ];
        metrics.record_assessment(Duration::from_micros(50), &score(80.0, Decision::Decline, factors));

        assert!(metrics.get_avg_agreement() > 0.95);
    }

    #[test]
    fn test_concurrent_recording_is_exact() {
        let metrics = Arc::new(EngineMetrics::new());

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let metrics = Arc::clone(&metrics);
                std::thread::spawn(move || {
                    let decision = if t % 2 == 0 { Decision::Approve } else { Decision::Review };
                    for i in 0..1_000 {
                        metrics.record_assessment(Duration::from_micros(i), &score(45.0, decision, vec![]));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(metrics.transactions_scored.load(Ordering::Relaxed), 8_000);
        assert_eq!(metrics.get_decisions().get(&Decision::Approve), Some(&4_000));
        assert_eq!(metrics.get_decisions().get(&Decision::Review), Some(&4_000));
        assert_eq!(metrics.get_score_distribution()[4], 8_000);
        // Latency ring keeps only the most recent samples
        assert_eq!(metrics.get_processing_stats().count, LATENCY_SAMPLES as u64);
    }
}
