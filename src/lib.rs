//! Payment Risk Engine Library
//!
//! Real-time fraud-risk scoring for payment transactions: per-dimension risk
//! factors, sliding-window velocity, device fingerprinting and online weight
//! recalibration from labeled outcomes.

pub mod config;
pub mod error;
pub mod evaluators;
pub mod fingerprint;
pub mod history;
pub mod logging;
pub mod metrics;
pub mod model;
pub mod scoring;
pub mod types;
pub mod velocity;

pub use config::EngineConfig;
pub use error::{ConfigError, ModelUpdateError, ValidationError, VelocityCheckError};
pub use fingerprint::DeviceFingerprintGenerator;
pub use history::{EmptyHistoryStore, HistoryStore, InMemoryHistoryStore, UserHistory};
pub use model::{ModelUpdater, UpdateSummary, WeightStore, WeightTable};
pub use scoring::{DecisionPolicy, RiskScoringEngine};
pub use types::{
    device::{DeviceAttributes, DeviceFingerprint, DeviceObservation},
    risk::{Decision, RiskFactor, RiskFactorType, RiskLevel, RiskScore},
    training::{Outcome, TrainingExample},
    transaction::{BillingAddress, TransactionContext},
    velocity::{VelocityCheck, VelocityKey, VelocityWindow},
};
pub use velocity::VelocityTracker;
