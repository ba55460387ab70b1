//! Transaction context supplied by the payment flow for scoring

use crate::error::ValidationError;
use crate::types::device::DeviceAttributes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::net::IpAddr;

/// Billing address attached to the payment method
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BillingAddress {
    #[serde(default)]
    pub line1: Option<String>,

    #[serde(default)]
    pub city: Option<String>,

    #[serde(default)]
    pub postal_code: Option<String>,

    /// ISO-3166 alpha-2 country code
    pub country: String,
}

/// Immutable input to a single risk assessment.
///
/// Malformed instances are still accepted; `validate` reports what is wrong
/// and the engine degrades the assessment instead of failing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionContext {
    /// Unique transaction identifier
    pub transaction_id: String,

    /// Platform user initiating the payment
    pub user_id: String,

    /// Payment-processor customer, when one exists
    #[serde(default)]
    pub customer_id: Option<String>,

    /// Amount in minor units (cents)
    pub amount: i64,

    /// ISO-4217 currency code
    pub currency: String,

    /// Payment method identifier
    pub payment_method_id: String,

    /// Time the transaction was initiated
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,

    /// Client IP address as reported by the edge
    #[serde(default)]
    pub ip_address: String,

    /// Client user agent string
    #[serde(default)]
    pub user_agent: String,

    /// Previously issued device fingerprint id
    #[serde(default)]
    pub device_fingerprint: Option<String>,

    /// Raw device attributes collected by the client SDK
    #[serde(default)]
    pub device_attributes: Option<DeviceAttributes>,

    #[serde(default)]
    pub billing_address: Option<BillingAddress>,
}

impl TransactionContext {
    /// Create a context with the required fields only
    pub fn new(
        transaction_id: impl Into<String>,
        user_id: impl Into<String>,
        amount: i64,
        currency: impl Into<String>,
        payment_method_id: impl Into<String>,
    ) -> Self {
        Self {
            transaction_id: transaction_id.into(),
            user_id: user_id.into(),
            customer_id: None,
            amount,
            currency: currency.into(),
            payment_method_id: payment_method_id.into(),
            timestamp: Utc::now(),
            ip_address: String::new(),
            user_agent: String::new(),
            device_fingerprint: None,
            device_attributes: None,
            billing_address: None,
        }
    }

    pub fn with_customer(mut self, customer_id: impl Into<String>) -> Self {
        self.customer_id = Some(customer_id.into());
        self
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn with_client(mut self, ip_address: impl Into<String>, user_agent: impl Into<String>) -> Self {
        self.ip_address = ip_address.into();
        self.user_agent = user_agent.into();
        self
    }

    pub fn with_device_fingerprint(mut self, fingerprint: impl Into<String>) -> Self {
        self.device_fingerprint = Some(fingerprint.into());
        self
    }

    pub fn with_device_attributes(mut self, attributes: DeviceAttributes) -> Self {
        self.device_attributes = Some(attributes);
        self
    }

    pub fn with_billing_address(mut self, address: BillingAddress) -> Self {
        self.billing_address = Some(address);
        self
    }

    /// Parsed client IP, if the reported address is well formed
    pub fn ip(&self) -> Option<IpAddr> {
        self.ip_address.trim().parse().ok()
    }

    /// Customer id with empty strings treated as absent
    pub fn customer(&self) -> Option<&str> {
        self.customer_id
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
    }

    /// Billing country, upper-cased, if an address was supplied
    pub fn billing_country(&self) -> Option<String> {
        self.billing_address
            .as_ref()
            .map(|a| a.country.trim().to_ascii_uppercase())
            .filter(|c| !c.is_empty())
    }

    /// Whether any device signal accompanies the transaction
    pub fn has_device_data(&self) -> bool {
        self.device_fingerprint
            .as_deref()
            .is_some_and(|f| !f.trim().is_empty())
            || self
                .device_attributes
                .as_ref()
                .is_some_and(|a| !a.is_empty())
    }

    /// Fraction of the optional context that was supplied (0.0 - 1.0)
    pub fn completeness(&self) -> f64 {
        let present = [
            self.has_device_data(),
            self.billing_address.is_some(),
            self.customer().is_some(),
            self.ip().is_some(),
            !self.user_agent.trim().is_empty(),
        ];
        present.iter().filter(|&&p| p).count() as f64 / present.len() as f64
    }

    /// Report every malformed field
    pub fn validate(&self) -> Vec<ValidationError> {
        let mut issues = Vec::new();

        if self.transaction_id.trim().is_empty() {
            issues.push(ValidationError::EmptyTransactionId);
        }
        if self.user_id.trim().is_empty() {
            issues.push(ValidationError::EmptyUserId);
        }
        if self.amount <= 0 {
            issues.push(ValidationError::NonPositiveAmount(self.amount));
        }
        let currency = self.currency.trim();
        if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_alphabetic()) {
            issues.push(ValidationError::InvalidCurrency(self.currency.clone()));
        }
        if !self.ip_address.trim().is_empty() && self.ip().is_none() {
            issues.push(ValidationError::InvalidIpAddress(self.ip_address.clone()));
        }
        if self.payment_method_id.trim().is_empty() {
            issues.push(ValidationError::EmptyPaymentMethod);
        }

        issues
    }
}
