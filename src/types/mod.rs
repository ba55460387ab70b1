//! Type definitions for the risk engine

pub mod device;
pub mod risk;
pub mod training;
pub mod transaction;
pub mod velocity;

pub use device::{DeviceAttributes, DeviceFingerprint, DeviceObservation, RiskIndicator};
pub use risk::{Decision, RiskFactor, RiskFactorType, RiskLevel, RiskLevelThresholds, RiskScore};
pub use training::{Outcome, TrainingExample};
pub use transaction::{BillingAddress, TransactionContext};
pub use velocity::{VelocityCheck, VelocityKey, VelocityThresholds, VelocityWindow};
