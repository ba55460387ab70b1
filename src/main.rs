//! Risk Replay - Main Entry Point
//!
//! Scores a JSONL stream of transaction contexts, writing one RiskScore per
//! line to stdout, then optionally applies a file of labeled outcomes to the
//! factor weights.
//!
//! Usage: risk-replay [transactions.jsonl|-] [feedback.jsonl]

use anyhow::{Context, Result};
use payment_risk_engine::{
    config::EngineConfig,
    history::InMemoryHistoryStore,
    logging::init_logging,
    metrics::{EngineMetrics, MetricsReporter},
    model::{WeightStore, WeightTable},
    RiskScoringEngine, TrainingExample, TransactionContext,
};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = EngineConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting risk replay");
    info!(
        "Decision thresholds: approve<{:.0}, decline>{:.0}, severity override at {:.0} (weight>={:.2})",
        config.scoring.approve_below,
        config.scoring.decline_above,
        config.scoring.severity_score,
        config.scoring.severity_weight
    );

    let args: Vec<String> = std::env::args().collect();
    let input = args.get(1).map(String::as_str).filter(|a| *a != "-");
    let feedback = args.get(2).map(String::as_str);

    let metrics = Arc::new(EngineMetrics::new());
    let weights = Arc::new(match config.model.weights_path.as_deref() {
        Some(path) if Path::new(path).exists() => WeightStore::new(WeightTable::load_from_path(path)?),
        _ => WeightStore::from_config(&config.model),
    });
    info!(version = weights.snapshot().version(), "Weight table ready");

    // Replayed transactions feed the history the engine reads back
    let history = Arc::new(InMemoryHistoryStore::new());
    let engine = Arc::new(
        RiskScoringEngine::new(&config, history.clone())?
            .with_weights(weights)
            .with_metrics(metrics.clone()),
    );

    let num_workers = config.pipeline.workers.max(1);
    info!("Scoring with {} parallel workers", num_workers);

    let semaphore = Arc::new(Semaphore::new(num_workers));
    let processed_count = Arc::new(AtomicU64::new(0));

    let metrics_clone = metrics.clone();
    let interval = config.pipeline.metrics_interval_secs;
    let reporter = tokio::spawn(async move {
        MetricsReporter::new(metrics_clone, interval).start().await;
    });

    let reader: Box<dyn AsyncRead + Unpin + Send> = match input {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("Failed to open {path}"))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let mut lines = BufReader::new(reader).lines();
    let mut handles = Vec::new();
    let mut line_no = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }

        let ctx: TransactionContext = match serde_json::from_str(&line) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(line = line_no, error = %e, "Failed to deserialize transaction context");
                continue;
            }
        };

        // Acquire permit (limits concurrent tasks)
        let permit = semaphore.clone().acquire_owned().await?;

        let engine = engine.clone();
        let history = history.clone();
        let metrics = metrics.clone();
        let processed_count = processed_count.clone();

        handles.push(tokio::spawn(async move {
            let score = engine.analyze_transaction(&ctx).await;

            engine.record_transaction(&ctx);
            history.record_transaction(&ctx, engine.device_id(&ctx).as_deref());

            match serde_json::to_string(&score) {
                Ok(json) => println!("{json}"),
                Err(e) => error!(transaction_id = %ctx.transaction_id, error = %e, "Failed to serialize risk score"),
            }

            debug!(
                transaction_id = %ctx.transaction_id,
                decision = %score.decision,
                overall_score = score.overall_score,
                "Transaction replayed"
            );

            let count = processed_count.fetch_add(1, Ordering::Relaxed) + 1;
            if count % 100 == 0 {
                let processing_stats = metrics.get_processing_stats();
                info!(
                    processed = count,
                    throughput = format!("{:.1} tx/s", metrics.get_throughput()),
                    avg_latency_us = processing_stats.mean_us,
                    "Processing milestone"
                );
            }

            drop(permit);
        }));
    }

    for result in futures::future::join_all(handles).await {
        if let Err(e) = result {
            error!(error = %e, "Scoring task failed");
        }
    }

    if let Some(path) = feedback {
        apply_feedback(&engine, &config, path)?;
    }

    reporter.abort();
    info!("Replay finished");
    metrics.print_summary();

    Ok(())
}

/// Apply a JSONL file of labeled outcomes as one training batch
fn apply_feedback(engine: &RiskScoringEngine, config: &EngineConfig, path: &str) -> Result<()> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("Failed to read feedback file {path}"))?;

    let examples = raw
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(i, line)| {
            serde_json::from_str::<TrainingExample>(line)
                .with_context(|| format!("Invalid training example on line {}", i + 1))
        })
        .collect::<Result<Vec<_>>>()?;

    info!(examples = examples.len(), "Applying feedback batch");
    match engine.model_updater(config).update_fraud_model(&examples) {
        Ok(summary) => info!(
            version = summary.version,
            examples = summary.examples,
            deltas = ?summary.applied_deltas,
            "Factor weights recalibrated"
        ),
        Err(e) => error!(error = %e, "Feedback batch rejected, weights unchanged"),
    }
    Ok(())
}
