//! Error taxonomy for the risk engine

use thiserror::Error;

/// A malformed field on an incoming transaction context.
///
/// These never escape `analyze_transaction`; they lower the confidence of the
/// resulting score instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("transaction id is empty")]
    EmptyTransactionId,

    #[error("user id is empty")]
    EmptyUserId,

    #[error("amount must be positive, got {0}")]
    NonPositiveAmount(i64),

    #[error("currency is not an ISO-4217 code: {0:?}")]
    InvalidCurrency(String),

    #[error("ip address could not be parsed: {0:?}")]
    InvalidIpAddress(String),

    #[error("payment method id is empty")]
    EmptyPaymentMethod,
}

impl ValidationError {
    /// Critical issues force a low-confidence REVIEW regardless of the aggregate.
    pub fn is_critical(&self) -> bool {
        matches!(
            self,
            ValidationError::EmptyTransactionId | ValidationError::NonPositiveAmount(_)
        )
    }
}

/// A collaborator lookup that did not answer within its budget.
#[derive(Debug, Clone, Error)]
#[error("{collaborator} lookup timed out after {timeout_ms}ms")]
pub struct LookupTimeoutError {
    pub collaborator: &'static str,
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VelocityCheckError {
    #[error("velocity check requires at least one of user id, customer id or payment method id")]
    MissingIdentifiers,
}

#[derive(Debug, Error)]
pub enum ModelUpdateError {
    #[error("training batch is empty")]
    EmptyBatch,

    #[error("example {index} has confidence {confidence} outside [0, 1]")]
    ConfidenceOutOfRange { index: usize, confidence: f64 },

    #[error("example {index} has unrecognized outcome label {label:?}")]
    UnrecognizedOutcome { index: usize, label: String },

    #[error("example {index} has no transaction id")]
    MissingTransactionId { index: usize },

    #[error("example {index} ({transaction_id}) has no features")]
    MissingFeatures { index: usize, transaction_id: String },

    #[error("example {index} ({transaction_id}) has an out-of-range feature: {reason}")]
    InvalidFeature {
        index: usize,
        transaction_id: String,
        reason: String,
    },

    #[error("failed to persist weight table: {0}")]
    Persist(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("decision thresholds must satisfy 0 <= approve_below <= decline_above <= 100 (got {approve_below}, {decline_above})")]
    DecisionThresholds { approve_below: f64, decline_above: f64 },

    #[error("risk level thresholds must be ascending within [0, 100]")]
    RiskLevels,

    #[error("severity override must have score in [0, 100] and weight in [0, 1]")]
    SeverityOverride,

    #[error("at least one velocity window must be configured")]
    NoVelocityWindows,

    #[error("velocity window {0:?} must have a positive duration and bucket count")]
    VelocityWindow(String),

    #[error("velocity shard count must be a power of two >= 2, got {0}")]
    ShardCount(usize),

    #[error("weight bounds must satisfy 0 <= min_weight <= max_weight <= 1")]
    WeightBounds,

    #[error("amount baseline must be positive")]
    AmountBaseline,

    #[error("lookup timeout must be non-zero")]
    LookupTimeout,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_critical_validation_errors() {
        assert!(ValidationError::EmptyTransactionId.is_critical());
        assert!(ValidationError::NonPositiveAmount(0).is_critical());
        assert!(!ValidationError::EmptyUserId.is_critical());
        assert!(!ValidationError::InvalidIpAddress("x".into()).is_critical());
    }

    #[test]
    fn test_error_messages() {
        let err = LookupTimeoutError {
            collaborator: "user_history",
            timeout_ms: 50,
        };
        assert_eq!(err.to_string(), "user_history lookup timed out after 50ms");

        let err = ModelUpdateError::ConfidenceOutOfRange {
            index: 2,
            confidence: 1.5,
        };
        assert!(err.to_string().contains("1.5"));
    }
}
