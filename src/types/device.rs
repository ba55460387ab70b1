//! Device attributes and the fingerprint derived from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Attribute fields a complete client SDK report contains
pub const EXPECTED_ATTRIBUTES: [&str; 10] = [
    "user_agent",
    "language",
    "timezone",
    "platform",
    "screen_resolution",
    "color_depth",
    "hardware_concurrency",
    "canvas_hash",
    "webgl_vendor",
    "plugins",
];

/// Raw client/device attributes keyed by field name.
///
/// Keys are canonicalized (trimmed, lower-cased) on insertion and kept in a
/// sorted map, so the order attributes arrive in never matters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BTreeMap<String, String>", into = "BTreeMap<String, String>")]
pub struct DeviceAttributes {
    fields: BTreeMap<String, String>,
}

impl DeviceAttributes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert an attribute. Empty values are dropped.
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl AsRef<str>) {
        let key = key.as_ref().trim().to_ascii_lowercase();
        let value = value.as_ref().trim();
        if key.is_empty() || value.is_empty() {
            return;
        }
        self.fields.insert(key, value.to_string());
    }

    pub fn with(mut self, key: impl AsRef<str>, value: impl AsRef<str>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    /// Canonical (sorted) iteration order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Fraction of `EXPECTED_ATTRIBUTES` present (0.0 - 1.0)
    pub fn completeness(&self) -> f64 {
        let present = EXPECTED_ATTRIBUTES
            .iter()
            .filter(|field| self.fields.contains_key(**field))
            .count();
        present as f64 / EXPECTED_ATTRIBUTES.len() as f64
    }
}

impl<K: AsRef<str>, V: AsRef<str>> FromIterator<(K, V)> for DeviceAttributes {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut attributes = DeviceAttributes::new();
        for (k, v) in iter {
            attributes.insert(k, v);
        }
        attributes
    }
}

impl From<BTreeMap<String, String>> for DeviceAttributes {
    fn from(map: BTreeMap<String, String>) -> Self {
        map.into_iter().collect()
    }
}

impl From<DeviceAttributes> for BTreeMap<String, String> {
    fn from(attributes: DeviceAttributes) -> Self {
        attributes.fields
    }
}

/// Heuristic flags raised while fingerprinting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskIndicator {
    /// Fewer than half of the expected attributes were reported
    IncompleteAttributes,
    /// User agent matches a headless browser or automation tool
    AutomationSignature,
    MissingUserAgent,
    /// Screen dimensions no real display reports
    ImplausibleScreen,
    /// Device has never been observed before
    FirstObservation,
    /// Device was flagged by a previous investigation
    PreviouslyFlagged,
    /// Device is shared across an unusual number of users
    SharedDevice,
}

/// Caller-supplied observation history for a device id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceObservation {
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Number of prior transactions seen from this device
    pub seen_count: u64,
    /// Distinct users seen on this device
    #[serde(default)]
    pub distinct_users: u32,
    #[serde(default)]
    pub flagged: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserInfo {
    pub user_agent: Option<String>,
    pub family: Option<String>,
    pub platform: Option<String>,
    pub language: Option<String>,
    pub timezone: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenInfo {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub color_depth: Option<u32>,
}

/// Stable device identity plus trust assessment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceFingerprint {
    /// Hex-encoded SHA-256 over the canonical attribute set
    pub id: String,
    /// Trust in the device (0 - 1)
    pub trust_score: f64,
    pub browser: BrowserInfo,
    pub screen: ScreenInfo,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    pub risk_indicators: Vec<RiskIndicator>,
}

impl DeviceFingerprint {
    pub fn has_indicator(&self, indicator: RiskIndicator) -> bool {
        self.risk_indicators.contains(&indicator)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_attribute_canonicalization() {
        let a: DeviceAttributes = [(" User_Agent ", "Mozilla/5.0 "), ("Language", "en-US")]
            .into_iter()
            .collect();
        let b: DeviceAttributes = [("language", "en-US"), ("user_agent", "Mozilla/5.0")]
            .into_iter()
            .collect();

        assert_eq!(a, b);
        assert_eq!(a.get("user_agent"), Some("Mozilla/5.0"));
    }

    #[test]
    fn test_empty_values_dropped() {
        let attrs = DeviceAttributes::new().with("timezone", "  ").with("", "x");
        assert!(attrs.is_empty());
    }

    #[test]
    fn test_completeness() {
        let attrs = DeviceAttributes::new()
            .with("user_agent", "ua")
            .with("language", "en")
            .with("custom_field", "ignored");
        assert!((attrs.completeness() - 0.2).abs() < 1e-9);
    }

    #[test]
    fn test_attributes_json_as_map() {
        let attrs: DeviceAttributes =
            serde_json::from_str(r#"{"Platform":"MacIntel","timezone":"UTC"}"#).unwrap();
        assert_eq!(attrs.get("platform"), Some("MacIntel"));

        let json = serde_json::to_string(&attrs).unwrap();
        assert_eq!(json, r#"{"platform":"MacIntel","timezone":"UTC"}"#);
    }
}
