//! Read-only historical store the evaluators consult
//!
//! Lookups are bounded by a timeout. A timeout or store failure is treated as
//! "no data available" and never fails an assessment.

use crate::error::LookupTimeoutError;
use crate::types::device::DeviceObservation;
use crate::types::transaction::TransactionContext;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Timelike, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::time::Duration;
use tracing::warn;

/// Historical activity profile of a user (or customer)
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UserHistory {
    pub first_seen: Option<DateTime<Utc>>,
    pub transaction_count: u64,
    /// Mean amount in minor units
    pub average_amount: Option<f64>,
    pub amount_std_dev: Option<f64>,
    /// Past transactions per UTC hour of day
    pub hour_histogram: [u32; 24],
    /// Billing countries seen before (ISO-3166 alpha-2, upper case)
    pub known_countries: BTreeSet<String>,
    pub known_payment_methods: BTreeSet<String>,
    pub usual_currency: Option<String>,
}

impl UserHistory {
    /// Add one past transaction to the profile
    pub fn observe(&mut self, at: DateTime<Utc>, amount: i64, country: Option<&str>, payment_method: &str) {
        let n = self.transaction_count as f64;
        let amount = amount as f64;
        let mean = self.average_amount.unwrap_or(0.0);
        let new_mean = mean + (amount - mean) / (n + 1.0);
        // Running population variance (Welford)
        let variance = self.amount_std_dev.unwrap_or(0.0).powi(2);
        let new_variance = (n * variance + (amount - mean) * (amount - new_mean)) / (n + 1.0);

        self.average_amount = Some(new_mean);
        self.amount_std_dev = Some(new_variance.max(0.0).sqrt());
        self.transaction_count += 1;
        self.hour_histogram[at.hour() as usize] += 1;
        self.first_seen = Some(self.first_seen.map_or(at, |f| f.min(at)));
        if let Some(country) = country {
            self.known_countries.insert(country.trim().to_ascii_uppercase());
        }
        if !payment_method.trim().is_empty() {
            self.known_payment_methods.insert(payment_method.trim().to_string());
        }
    }

    pub fn hour_total(&self) -> u64 {
        self.hour_histogram.iter().map(|&c| u64::from(c)).sum()
    }
}

/// Historical transaction/device store, keyed by user/customer/device
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Activity profile for a user, optionally narrowed by processor customer
    async fn user_history(&self, user_id: &str, customer_id: Option<&str>) -> Result<Option<UserHistory>>;

    /// Prior observations of a device fingerprint
    async fn device_observation(&self, fingerprint_id: &str) -> Result<Option<DeviceObservation>>;
}

/// Result of a bounded collaborator lookup
#[derive(Debug, Clone, PartialEq)]
pub enum Lookup<T> {
    Found(T),
    Missing,
    TimedOut,
    Failed,
}

impl<T> Lookup<T> {
    pub fn found(&self) -> Option<&T> {
        match self {
            Lookup::Found(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self, Lookup::TimedOut | Lookup::Failed)
    }
}

/// Await a store call within `timeout`, mapping every failure mode to a `Lookup`
pub async fn bounded_lookup<T, F>(collaborator: &'static str, timeout: Duration, call: F) -> Lookup<T>
where
    F: Future<Output = Result<Option<T>>>,
{
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(Some(value))) => Lookup::Found(value),
        Ok(Ok(None)) => Lookup::Missing,
        Ok(Err(e)) => {
            warn!(collaborator = collaborator, error = %e, "History lookup failed, treating as no data");
            Lookup::Failed
        }
        Err(_) => {
            let err = LookupTimeoutError {
                collaborator,
                timeout_ms: timeout.as_millis() as u64,
            };
            warn!(error = %err, "History lookup timed out, treating as no data");
            Lookup::TimedOut
        }
    }
}

/// Store with no data; every lookup is `Missing`
#[derive(Debug, Clone, Default)]
pub struct EmptyHistoryStore;

#[async_trait]
impl HistoryStore for EmptyHistoryStore {
    async fn user_history(&self, _user_id: &str, _customer_id: Option<&str>) -> Result<Option<UserHistory>> {
        Ok(None)
    }

    async fn device_observation(&self, _fingerprint_id: &str) -> Result<Option<DeviceObservation>> {
        Ok(None)
    }
}

/// In-process store, useful for tests and replay tooling
#[derive(Debug, Default)]
pub struct InMemoryHistoryStore {
    users: RwLock<HashMap<String, UserHistory>>,
    devices: RwLock<HashMap<String, DeviceObservation>>,
    device_users: RwLock<HashMap<String, BTreeSet<String>>>,
}

impl InMemoryHistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_user(&self, user_id: impl Into<String>, history: UserHistory) {
        self.users.write().insert(user_id.into(), history);
    }

    pub fn insert_device(&self, fingerprint_id: impl Into<String>, observation: DeviceObservation) {
        self.devices.write().insert(fingerprint_id.into(), observation);
    }

    /// Fold a scored transaction into the user and device profiles
    pub fn record_transaction(&self, ctx: &TransactionContext, device_id: Option<&str>) {
        let at = ctx.timestamp;
        let user_id = ctx.user_id.trim();

        if !user_id.is_empty() {
            let country = ctx.billing_country();
            let mut users = self.users.write();
            let history = users.entry(user_id.to_string()).or_default();
            history.observe(at, ctx.amount, country.as_deref(), &ctx.payment_method_id);
            if history.usual_currency.is_none() {
                history.usual_currency = Some(ctx.currency.trim().to_ascii_uppercase());
            }
        }

        let device_id = match device_id {
            Some(id) if !id.trim().is_empty() => id.trim(),
            _ => return,
        };
        let distinct_users = {
            let mut device_users = self.device_users.write();
            let users = device_users.entry(device_id.to_string()).or_default();
            if !user_id.is_empty() {
                users.insert(user_id.to_string());
            }
            users.len() as u32
        };

        self.devices
            .write()
            .entry(device_id.to_string())
            .and_modify(|o| {
                o.first_seen = o.first_seen.min(at);
                o.last_seen = o.last_seen.max(at);
                o.seen_count += 1;
                o.distinct_users = o.distinct_users.max(distinct_users);
            })
            .or_insert(DeviceObservation {
                first_seen: at,
                last_seen: at,
                seen_count: 1,
                distinct_users,
                flagged: false,
            });
    }
}

#[async_trait]
impl HistoryStore for InMemoryHistoryStore {
    async fn user_history(&self, user_id: &str, customer_id: Option<&str>) -> Result<Option<UserHistory>> {
        let users = self.users.read();
        Ok(users
            .get(user_id)
            .or_else(|| customer_id.and_then(|c| users.get(c)))
            .cloned())
    }

    async fn device_observation(&self, fingerprint_id: &str) -> Result<Option<DeviceObservation>> {
        Ok(self.devices.read().get(fingerprint_id).cloned())
    }
}
