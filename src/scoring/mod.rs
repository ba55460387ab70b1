//! Aggregation, decision policy and the scoring engine

pub mod aggregator;
pub mod engine;
pub mod policy;

pub use aggregator::ScoreAggregator;
pub use engine::RiskScoringEngine;
pub use policy::{DecisionPolicy, PolicyOutcome};
