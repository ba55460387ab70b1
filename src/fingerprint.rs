//! Deterministic device fingerprinting and trust scoring

use crate::config::DeviceConfig;
use crate::types::device::{
    BrowserInfo, DeviceAttributes, DeviceFingerprint, DeviceObservation, RiskIndicator, ScreenInfo,
};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Domain separator so fingerprint digests never collide with other SHA-256 uses
const FINGERPRINT_DOMAIN: &[u8] = b"payment-risk-engine/device-fingerprint/v1";

/// Trust ceiling for devices reporting half or fewer of the expected attributes
const INCOMPLETE_TRUST_CAP: f64 = 0.75;

/// Trust ceiling for devices flagged by a previous investigation
const FLAGGED_TRUST_CAP: f64 = 0.2;

/// Largest plausible screen edge in pixels
const MAX_SCREEN_EDGE: u32 = 16_384;

/// Derives stable device ids and trust scores from raw client attributes
#[derive(Debug, Clone)]
pub struct DeviceFingerprintGenerator {
    config: DeviceConfig,
}

impl DeviceFingerprintGenerator {
    pub fn new(config: DeviceConfig) -> Self {
        Self { config }
    }

    /// Hex SHA-256 over the canonical attribute set.
    ///
    /// Each key and value is length-prefixed, so distinct attribute sets can
    /// never serialize to the same byte stream.
    pub fn fingerprint_id(&self, attributes: &DeviceAttributes) -> String {
        let mut hasher = Sha256::new();
        hasher.update(FINGERPRINT_DOMAIN);

        for (key, value) in attributes.iter() {
            hasher.update((key.len() as u64).to_be_bytes());
            hasher.update(key.as_bytes());
            hasher.update((value.len() as u64).to_be_bytes());
            hasher.update(value.as_bytes());
        }

        hex::encode(hasher.finalize())
    }

    /// Fingerprint a device as observed now
    pub fn generate_device_fingerprint(
        &self,
        attributes: &DeviceAttributes,
        observation: Option<&DeviceObservation>,
    ) -> DeviceFingerprint {
        self.generate_at(attributes, observation, Utc::now())
    }

    /// Fingerprint a device as observed at `now`. Never fails.
    pub fn generate_at(
        &self,
        attributes: &DeviceAttributes,
        observation: Option<&DeviceObservation>,
        now: DateTime<Utc>,
    ) -> DeviceFingerprint {
        let id = self.fingerprint_id(attributes);
        let browser = browser_info(attributes);
        let (screen, screen_plausible) = screen_info(attributes);
        let completeness = attributes.completeness();

        let mut indicators = Vec::new();
        if completeness <= 0.5 {
            indicators.push(RiskIndicator::IncompleteAttributes);
        }
        match browser.user_agent.as_deref() {
            None => indicators.push(RiskIndicator::MissingUserAgent),
            Some(ua) if self.is_automation(ua, attributes) => {
                indicators.push(RiskIndicator::AutomationSignature)
            }
            Some(_) => {}
        }
        if !screen_plausible {
            indicators.push(RiskIndicator::ImplausibleScreen);
        }
        match observation {
            None => indicators.push(RiskIndicator::FirstObservation),
            Some(obs) => {
                if obs.flagged {
                    indicators.push(RiskIndicator::PreviouslyFlagged);
                }
                if obs.distinct_users > self.config.shared_device_users {
                    indicators.push(RiskIndicator::SharedDevice);
                }
            }
        }

        let trust_score = self.trust_score(completeness, observation, &indicators, now);

        debug!(
            fingerprint = %id,
            trust_score = trust_score,
            indicators = ?indicators,
            "Device fingerprint generated"
        );

        DeviceFingerprint {
            id,
            trust_score,
            browser,
            screen,
            first_seen: observation.map(|o| o.first_seen).unwrap_or(now),
            last_seen: now,
            risk_indicators: indicators,
        }
    }

    fn is_automation(&self, user_agent: &str, attributes: &DeviceAttributes) -> bool {
        let ua = user_agent.to_ascii_lowercase();
        self.config
            .automation_markers
            .iter()
            .any(|marker| ua.contains(&marker.to_ascii_lowercase()))
            || attributes.get("webdriver") == Some("true")
    }

    fn trust_score(
        &self,
        completeness: f64,
        observation: Option<&DeviceObservation>,
        indicators: &[RiskIndicator],
        now: DateTime<Utc>,
    ) -> f64 {
        let mut trust = 0.5 + 0.4 * completeness;

        match observation {
            Some(obs) => {
                let age_days = (now - obs.first_seen).num_days().max(0) as f64;
                trust += 0.1 * (age_days / 90.0).min(1.0);
                trust += 0.05 * (obs.seen_count as f64 / 20.0).min(1.0);
            }
            None => trust -= 0.1,
        }

        for indicator in indicators {
            trust -= match indicator {
                RiskIndicator::AutomationSignature => 0.4,
                RiskIndicator::ImplausibleScreen => 0.15,
                RiskIndicator::SharedDevice => 0.15,
                RiskIndicator::MissingUserAgent => 0.1,
                _ => 0.0,
            };
        }

        if indicators.contains(&RiskIndicator::IncompleteAttributes) {
            trust = trust.min(INCOMPLETE_TRUST_CAP);
        }
        if indicators.contains(&RiskIndicator::PreviouslyFlagged) {
            trust = trust.min(FLAGGED_TRUST_CAP);
        }

        trust.clamp(0.0, 1.0)
    }
}

impl Default for DeviceFingerprintGenerator {
    fn default() -> Self {
        Self::new(DeviceConfig::default())
    }
}

fn browser_info(attributes: &DeviceAttributes) -> BrowserInfo {
    let user_agent = attributes.get("user_agent").map(str::to_string);
    let family = user_agent.as_deref().and_then(browser_family).map(str::to_string);

    BrowserInfo {
        user_agent,
        family,
        platform: attributes.get("platform").map(str::to_string),
        language: attributes.get("language").map(str::to_string),
        timezone: attributes.get("timezone").map(str::to_string),
    }
}

fn browser_family(user_agent: &str) -> Option<&'static str> {
    // Order matters: Edge and Opera also advertise Chrome, Chrome also advertises Safari
    const FAMILIES: [(&str, &str); 5] = [
        ("Edg/", "Edge"),
        ("OPR/", "Opera"),
        ("Chrome/", "Chrome"),
        ("Firefox/", "Firefox"),
        ("Safari/", "Safari"),
    ];
    FAMILIES
        .iter()
        .find(|(marker, _)| user_agent.contains(marker))
        .map(|(_, family)| *family)
}

/// Parse screen attributes; the flag is false when present values are implausible
fn screen_info(attributes: &DeviceAttributes) -> (ScreenInfo, bool) {
    let mut plausible = true;
    let mut screen = ScreenInfo::default();

    if let Some(resolution) = attributes.get("screen_resolution") {
        let parsed = resolution
            .split_once(['x', 'X', '*'])
            .and_then(|(w, h)| Some((w.trim().parse::<u32>().ok()?, h.trim().parse::<u32>().ok()?)));
        match parsed {
            Some((w, h)) if (1..=MAX_SCREEN_EDGE).contains(&w) && (1..=MAX_SCREEN_EDGE).contains(&h) => {
                screen.width = Some(w);
                screen.height = Some(h);
            }
            _ => plausible = false,
        }
    }

    if let Some(depth) = attributes.get("color_depth") {
        match depth.parse::<u32>() {
            Ok(d) if (1..=48).contains(&d) => screen.color_depth = Some(d),
            _ => plausible = false,
        }
    }

    (screen, plausible)
}
