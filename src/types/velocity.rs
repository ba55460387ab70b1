//! Velocity windows, thresholds and per-window query results

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier a rolling aggregate is kept for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum VelocityKey {
    User(String),
    Customer(String),
    PaymentMethod(String),
}

impl VelocityKey {
    /// Keys for the non-empty identifiers, in user/customer/payment-method order
    pub fn from_identifiers(user_id: &str, customer_id: &str, payment_method_id: &str) -> Vec<VelocityKey> {
        let mut keys = Vec::with_capacity(3);
        if !user_id.trim().is_empty() {
            keys.push(VelocityKey::User(user_id.trim().to_string()));
        }
        if !customer_id.trim().is_empty() {
            keys.push(VelocityKey::Customer(customer_id.trim().to_string()));
        }
        if !payment_method_id.trim().is_empty() {
            keys.push(VelocityKey::PaymentMethod(payment_method_id.trim().to_string()));
        }
        keys
    }
}

impl fmt::Display for VelocityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VelocityKey::User(id) => write!(f, "user:{id}"),
            VelocityKey::Customer(id) => write!(f, "customer:{id}"),
            VelocityKey::PaymentMethod(id) => write!(f, "payment_method:{id}"),
        }
    }
}

/// Limits for one window. A zero limit disables that dimension.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityThresholds {
    pub max_count: u64,
    /// Minor units
    pub max_amount: i64,
    pub max_unique_devices: u64,
}

/// A configured rolling window
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VelocityWindow {
    /// Display label, e.g. "1h"
    pub label: String,
    pub duration_secs: u64,
    /// Ring slots the window is divided into; sets the expiry granularity
    pub buckets: u32,
    pub thresholds: VelocityThresholds,
}

impl VelocityWindow {
    pub fn new(label: &str, duration_secs: u64, buckets: u32, thresholds: VelocityThresholds) -> Self {
        Self {
            label: label.to_string(),
            duration_secs,
            buckets,
            thresholds,
        }
    }

    /// Width of one ring slot in seconds (at least one)
    pub fn bucket_width_secs(&self) -> i64 {
        let buckets = u64::from(self.buckets.max(1));
        (self.duration_secs / buckets).max(1) as i64
    }

    pub fn default_windows() -> Vec<VelocityWindow> {
        vec![
            VelocityWindow::new(
                "1h",
                3_600,
                60,
                VelocityThresholds {
                    max_count: 5,
                    max_amount: 200_000,
                    max_unique_devices: 2,
                },
            ),
            VelocityWindow::new(
                "24h",
                86_400,
                96,
                VelocityThresholds {
                    max_count: 20,
                    max_amount: 1_000_000,
                    max_unique_devices: 4,
                },
            ),
            VelocityWindow::new(
                "7d",
                604_800,
                168,
                VelocityThresholds {
                    max_count: 60,
                    max_amount: 5_000_000,
                    max_unique_devices: 8,
                },
            ),
        ]
    }
}

/// Aggregates for one window of one velocity query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VelocityCheck {
    pub user_id: Option<String>,
    pub customer_id: Option<String>,
    pub payment_method_id: Option<String>,
    /// Key whose aggregates are reported (the riskiest of those queried)
    pub dominant_key: VelocityKey,
    pub window: String,
    pub window_secs: u64,
    pub transaction_count: u64,
    /// Minor units
    pub total_amount: i64,
    pub unique_devices: u64,
    pub unique_locations: u64,
    /// 0 at threshold, approaching 100 near 3x threshold
    pub risk_score: f64,
    pub exceeded: bool,
    pub thresholds: VelocityThresholds,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_skip_empty_identifiers() {
        let keys = VelocityKey::from_identifiers("user_1", " ", "pm_9");
        assert_eq!(
            keys,
            vec![
                VelocityKey::User("user_1".into()),
                VelocityKey::PaymentMethod("pm_9".into())
            ]
        );
        assert!(VelocityKey::from_identifiers("", "", "").is_empty());
    }

    #[test]
    fn test_bucket_width() {
        let windows = VelocityWindow::default_windows();
        assert_eq!(windows[0].bucket_width_secs(), 60);
        assert_eq!(windows[1].bucket_width_secs(), 900);
        assert_eq!(windows[2].bucket_width_secs(), 3_600);

        let degenerate = VelocityWindow::new("tiny", 10, 100, windows[0].thresholds.clone());
        assert_eq!(degenerate.bucket_width_secs(), 1);
    }
}
