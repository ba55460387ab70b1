//! Rolling, time-windowed transaction aggregates per identifying key
//!
//! Each (key, window) pair owns a fixed ring of time buckets. Recording a
//! transaction touches one bucket per window; reading sums the buckets that
//! still fall inside the window and resets the ones that expired. Memory is
//! bounded by the number of active keys: idle keys are swept periodically.

use crate::config::VelocityConfig;
use crate::error::VelocityCheckError;
use crate::types::transaction::TransactionContext;
use crate::types::velocity::{VelocityCheck, VelocityKey, VelocityThresholds, VelocityWindow};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::net::IpAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

/// Marks a ring slot that has never held data
const EMPTY_EPOCH: i64 = i64::MIN;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct CounterKey {
    key: VelocityKey,
    window: usize,
}

#[derive(Debug, Clone)]
struct Slot {
    epoch: i64,
    count: u64,
    amount: i64,
    devices: HashSet<String>,
    locations: HashSet<String>,
}

impl Slot {
    fn empty() -> Self {
        Self::starting(EMPTY_EPOCH)
    }

    fn starting(epoch: i64) -> Self {
        Self {
            epoch,
            count: 0,
            amount: 0,
            devices: HashSet::new(),
            locations: HashSet::new(),
        }
    }
}

/// Sums over the live buckets of one window
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WindowTotals {
    pub count: u64,
    pub amount: i64,
    pub unique_devices: u64,
    pub unique_locations: u64,
}

/// Fixed-capacity ring of time buckets for one (key, window)
#[derive(Debug)]
struct WindowCounter {
    slots: Vec<Slot>,
    latest_epoch: i64,
}

impl WindowCounter {
    fn new(buckets: u32) -> Self {
        Self {
            slots: vec![Slot::empty(); buckets.max(1) as usize],
            latest_epoch: EMPTY_EPOCH,
        }
    }

    fn span(&self) -> i64 {
        self.slots.len() as i64
    }

    fn record(&mut self, epoch: i64, amount: i64, device: Option<&str>, location: Option<&str>) {
        // Older than everything the ring can still hold
        if self.latest_epoch != EMPTY_EPOCH && epoch <= self.latest_epoch - self.span() {
            return;
        }

        let index = epoch.rem_euclid(self.span()) as usize;
        let slot = &mut self.slots[index];
        if slot.epoch > epoch {
            // Slot already holds a newer bucket a full window ahead
            return;
        }
        if slot.epoch != epoch {
            *slot = Slot::starting(epoch);
        }

        slot.count += 1;
        slot.amount = slot.amount.saturating_add(amount.max(0));
        if let Some(device) = device {
            slot.devices.insert(device.to_string());
        }
        if let Some(location) = location {
            slot.locations.insert(location.to_string());
        }
        self.latest_epoch = self.latest_epoch.max(epoch);
    }

    /// Sum live buckets as of `now_epoch`, resetting expired ones
    fn totals(&mut self, now_epoch: i64) -> WindowTotals {
        let oldest_live = now_epoch - self.span();
        let mut totals = WindowTotals::default();
        let mut devices: HashSet<&str> = HashSet::new();
        let mut locations: HashSet<&str> = HashSet::new();

        for slot in &mut self.slots {
            if slot.epoch != EMPTY_EPOCH && slot.epoch <= oldest_live {
                *slot = Slot::empty();
            }
        }

        for slot in &self.slots {
            if slot.epoch == EMPTY_EPOCH || slot.epoch > now_epoch {
                continue;
            }
            totals.count += slot.count;
            totals.amount = totals.amount.saturating_add(slot.amount);
            devices.extend(slot.devices.iter().map(String::as_str));
            locations.extend(slot.locations.iter().map(String::as_str));
        }

        totals.unique_devices = devices.len() as u64;
        totals.unique_locations = locations.len() as u64;
        totals
    }

    fn is_idle(&self, now_epoch: i64) -> bool {
        self.latest_epoch == EMPTY_EPOCH || self.latest_epoch <= now_epoch - self.span()
    }
}

/// Risk for a window's totals: 0 at threshold, 100 at three times threshold
pub fn assess_totals(totals: &WindowTotals, thresholds: &VelocityThresholds) -> (f64, bool) {
    let mut ratios = Vec::with_capacity(3);
    if thresholds.max_count > 0 {
        ratios.push(totals.count as f64 / thresholds.max_count as f64);
    }
    if thresholds.max_amount > 0 {
        ratios.push(totals.amount as f64 / thresholds.max_amount as f64);
    }
    if thresholds.max_unique_devices > 0 {
        ratios.push(totals.unique_devices as f64 / thresholds.max_unique_devices as f64);
    }

    let exceeded = ratios.iter().any(|&r| r > 1.0);
    let risk = ratios
        .iter()
        .map(|&r| ((r - 1.0) / 2.0).clamp(0.0, 1.0) * 100.0)
        .fold(0.0, f64::max);

    (risk, exceeded)
}

/// Location bucket for unique-location counting: IPv4 /24, IPv6 /48, else billing country
pub fn location_key(ctx: &TransactionContext) -> Option<String> {
    match ctx.ip() {
        Some(IpAddr::V4(ip)) => {
            let [a, b, c, _] = ip.octets();
            Some(format!("ip4:{a}.{b}.{c}.0/24"))
        }
        Some(IpAddr::V6(ip)) => {
            let s = ip.segments();
            Some(format!("ip6:{:x}:{:x}:{:x}::/48", s[0], s[1], s[2]))
        }
        None => ctx.billing_country().map(|c| format!("country:{c}")),
    }
}

/// Concurrent sliding-window counters keyed by (identifier, window)
pub struct VelocityTracker {
    windows: Vec<VelocityWindow>,
    counters: DashMap<CounterKey, Mutex<WindowCounter>>,
    sweep_interval: u64,
    recorded: AtomicU64,
}

impl VelocityTracker {
    pub fn new(config: &VelocityConfig) -> Self {
        let shards = if config.shards >= 2 && config.shards.is_power_of_two() {
            config.shards
        } else {
            warn!(shards = config.shards, "Invalid velocity shard count, using 64");
            64
        };

        Self {
            windows: config.windows.clone(),
            counters: DashMap::with_shard_amount(shards),
            sweep_interval: config.sweep_interval,
            recorded: AtomicU64::new(0),
        }
    }

    pub fn windows(&self) -> &[VelocityWindow] {
        &self.windows
    }

    /// Number of live (key, window) counters
    pub fn active_counters(&self) -> usize {
        self.counters.len()
    }

    /// Append a scored transaction to every window of every key it carries
    pub fn record_transaction(&self, ctx: &TransactionContext, device_id: Option<&str>) {
        let customer = ctx.customer().unwrap_or_default();
        let keys = VelocityKey::from_identifiers(&ctx.user_id, customer, &ctx.payment_method_id);
        if keys.is_empty() {
            warn!(transaction_id = %ctx.transaction_id, "Transaction has no velocity identifiers, not recorded");
            return;
        }

        let device = device_id.or(ctx.device_fingerprint.as_deref());
        let location = location_key(ctx);
        self.record(&keys, ctx.timestamp, ctx.amount, device, location.as_deref());
    }

    /// Append one transaction to the counters of `keys`.
    ///
    /// Timestamps ahead of the clock are counted as now; a future bucket would
    /// otherwise shadow every live one until real time caught up.
    pub fn record(
        &self,
        keys: &[VelocityKey],
        at: DateTime<Utc>,
        amount: i64,
        device: Option<&str>,
        location: Option<&str>,
    ) {
        let now = Utc::now();
        let at = at.min(now);

        for key in keys {
            for (index, window) in self.windows.iter().enumerate() {
                let epoch = epoch_of(at, window);
                let counter_key = CounterKey {
                    key: key.clone(),
                    window: index,
                };

                if let Some(counter) = self.counters.get(&counter_key) {
                    counter.lock().record(epoch, amount, device, location);
                    continue;
                }

                self.counters
                    .entry(counter_key)
                    .or_insert_with(|| Mutex::new(WindowCounter::new(window.buckets)))
                    .lock()
                    .record(epoch, amount, device, location);
            }
        }

        let recorded = self.recorded.fetch_add(1, Ordering::Relaxed) + 1;
        if self.sweep_interval > 0 && recorded % self.sweep_interval == 0 {
            let removed = self.prune_idle(now);
            debug!(removed = removed, remaining = self.counters.len(), "Swept idle velocity keys");
        }
    }

    /// One check per configured window, as of now
    pub fn check_velocity(
        &self,
        user_id: &str,
        customer_id: &str,
        payment_method_id: &str,
    ) -> Result<Vec<VelocityCheck>, VelocityCheckError> {
        self.check_velocity_at(user_id, customer_id, payment_method_id, Utc::now())
    }

    /// One check per configured window, as of `now`.
    ///
    /// Each key is aggregated separately; the riskiest key (then the busiest)
    /// is reported for each window.
    pub fn check_velocity_at(
        &self,
        user_id: &str,
        customer_id: &str,
        payment_method_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<VelocityCheck>, VelocityCheckError> {
        let keys = VelocityKey::from_identifiers(user_id, customer_id, payment_method_id);
        if keys.is_empty() {
            return Err(VelocityCheckError::MissingIdentifiers);
        }

        let non_empty = |s: &str| Some(s.trim().to_string()).filter(|s| !s.is_empty());
        let mut checks = Vec::with_capacity(self.windows.len());

        for (index, window) in self.windows.iter().enumerate() {
            let now_epoch = epoch_of(now, window);
            let mut dominant: Option<(VelocityKey, WindowTotals, f64, bool)> = None;

            for key in &keys {
                let totals = self.totals(key, index, now_epoch);
                let (risk, exceeded) = assess_totals(&totals, &window.thresholds);

                let riskier = match &dominant {
                    None => true,
                    Some((_, best, best_risk, best_exceeded)) => {
                        (exceeded, risk, totals.count) > (*best_exceeded, *best_risk, best.count)
                    }
                };
                if riskier {
                    dominant = Some((key.clone(), totals, risk, exceeded));
                }
            }

            if let Some((key, totals, risk, exceeded)) = dominant {
                checks.push(VelocityCheck {
                    user_id: non_empty(user_id),
                    customer_id: non_empty(customer_id),
                    payment_method_id: non_empty(payment_method_id),
                    dominant_key: key,
                    window: window.label.clone(),
                    window_secs: window.duration_secs,
                    transaction_count: totals.count,
                    total_amount: totals.amount,
                    unique_devices: totals.unique_devices,
                    unique_locations: totals.unique_locations,
                    risk_score: risk,
                    exceeded,
                    thresholds: window.thresholds.clone(),
                });
            }
        }

        Ok(checks)
    }

    fn totals(&self, key: &VelocityKey, window: usize, now_epoch: i64) -> WindowTotals {
        let counter_key = CounterKey {
            key: key.clone(),
            window,
        };
        match self.counters.get(&counter_key) {
            Some(counter) => counter.lock().totals(now_epoch),
            None => WindowTotals::default(),
        }
    }

    /// Drop counters with no activity inside their window. Returns how many were removed.
    pub fn prune_idle(&self, now: DateTime<Utc>) -> usize {
        let before = self.counters.len();
        self.counters.retain(|key, counter| match self.windows.get(key.window) {
            Some(window) => !counter.get_mut().is_idle(epoch_of(now, window)),
            None => false,
        });
        before.saturating_sub(self.counters.len())
    }
}

impl Default for VelocityTracker {
    fn default() -> Self {
        Self::new(&VelocityConfig::default())
    }
}

fn epoch_of(at: DateTime<Utc>, window: &VelocityWindow) -> i64 {
    at.timestamp().div_euclid(window.bucket_width_secs())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    fn tracker() -> VelocityTracker {
        VelocityTracker::new(&VelocityConfig::default())
    }

    fn user(id: &str) -> Vec<VelocityKey> {
        vec![VelocityKey::User(id.to_string())]
    }

    #[test]
    fn test_missing_identifiers_rejected() {
        let tracker = tracker();
        assert_eq!(
            tracker.check_velocity("", "", ""),
            Err(VelocityCheckError::MissingIdentifiers)
        );
        assert_eq!(
            tracker.check_velocity("  ", "", " "),
            Err(VelocityCheckError::MissingIdentifiers)
        );
    }

    #[test]
    fn test_one_check_per_window() {
        let tracker = tracker();
        let checks = tracker.check_velocity("user_1", "", "").unwrap();

        assert_eq!(checks.len(), 3);
        assert_eq!(checks[0].window, "1h");
        assert!(checks.iter().all(|c| c.transaction_count == 0 && !c.exceeded));
        assert_eq!(checks[0].user_id.as_deref(), Some("user_1"));
        assert!(checks[0].customer_id.is_none());
    }

    #[test]
    fn test_aggregates_and_threshold() {
        let tracker = tracker();
        let now = Utc::now();

        for i in 0..6 {
            let device = format!("dev_{}", i % 3);
            tracker.record(&user("u"), now, 1_000, Some(&device), Some("ip4:10.0.0.0/24"));
        }

        let checks = tracker.check_velocity_at("u", "", "", now).unwrap();
        let hour = &checks[0];
        assert_eq!(hour.transaction_count, 6);
        assert_eq!(hour.total_amount, 6_000);
        assert_eq!(hour.unique_devices, 3);
        assert_eq!(hour.unique_locations, 1);
        // 6 > 5 transactions and 3 > 2 devices
        assert!(hour.exceeded);
        // device ratio 1.5 dominates: (1.5 - 1) / 2 = 25
        assert!((hour.risk_score - 25.0).abs() < 1e-9);
        assert!(!checks[1].exceeded);
    }

    #[test]
    fn test_risk_scales_to_three_times_threshold() {
        let thresholds = VelocityThresholds {
            max_count: 10,
            max_amount: 0,
            max_unique_devices: 0,
        };
        let at = |count| WindowTotals {
            count,
            ..WindowTotals::default()
        };

        assert_eq!(assess_totals(&at(10), &thresholds), (0.0, false));
        let (risk, exceeded) = assess_totals(&at(20), &thresholds);
        assert!(exceeded);
        assert!((risk - 50.0).abs() < 1e-9);
        assert_eq!(assess_totals(&at(30), &thresholds).0, 100.0);
        assert_eq!(assess_totals(&at(90), &thresholds).0, 100.0);
    }

    #[test]
    fn test_expired_buckets_pruned_on_read() {
        let tracker = tracker();
        let now = Utc::now();

        tracker.record(&user("u"), now - Duration::hours(2), 500, None, None);
        tracker.record(&user("u"), now, 700, None, None);

        let checks = tracker.check_velocity_at("u", "", "", now).unwrap();
        assert_eq!(checks[0].transaction_count, 1);
        assert_eq!(checks[0].total_amount, 700);
        assert_eq!(checks[1].transaction_count, 2);
        assert_eq!(checks[2].transaction_count, 2);
    }

    #[test]
    fn test_stale_record_does_not_clobber_live_bucket() {
        let tracker = tracker();
        let now = Utc::now();

        tracker.record(&user("u"), now, 100, None, None);
        // Exactly one window earlier maps to the same ring slot
        tracker.record(&user("u"), now - Duration::hours(1), 100, None, None);

        let checks = tracker.check_velocity_at("u", "", "", now).unwrap();
        assert_eq!(checks[0].transaction_count, 1);
    }

    #[test]
    fn test_dominant_key_is_riskiest() {
        let tracker = tracker();
        let now = Utc::now();
        let card = vec![VelocityKey::PaymentMethod("pm_shared".into())];

        tracker.record(&user("u"), now, 100, None, None);
        for _ in 0..8 {
            tracker.record(&card, now, 100, None, None);
        }

        let checks = tracker.check_velocity_at("u", "", "pm_shared", now).unwrap();
        assert_eq!(checks[0].dominant_key, VelocityKey::PaymentMethod("pm_shared".into()));
        assert_eq!(checks[0].transaction_count, 8);
        assert!(checks[0].exceeded);
    }

    #[test]
    fn test_prune_idle_keys() {
        let tracker = tracker();
        let now = Utc::now();

        tracker.record(&user("old"), now - Duration::days(8), 100, None, None);
        tracker.record(&user("new"), now, 100, None, None);
        assert_eq!(tracker.active_counters(), 6);

        let removed = tracker.prune_idle(now);
        assert_eq!(removed, 3);
        assert_eq!(tracker.active_counters(), 3);
    }

    #[test]
    fn test_concurrent_records_are_not_lost() {
        let tracker = Arc::new(tracker());
        let now = Utc::now();

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let tracker = Arc::clone(&tracker);
                std::thread::spawn(move || {
                    for i in 0..250 {
                        let device = format!("dev_{t}_{i}");
                        tracker.record(&user("hot"), now, 10, Some(&device), None);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        let checks = tracker.check_velocity_at("hot", "", "", now).unwrap();
        assert_eq!(checks[0].transaction_count, 2_000);
        assert_eq!(checks[0].total_amount, 20_000);
        assert_eq!(checks[0].unique_devices, 2_000);
    }

    #[test]
    fn test_future_record_does_not_blind_window() {
        let tracker = tracker();
        let now = Utc::now();

        tracker.record(&user("u"), now + Duration::hours(2), 100, None, None);
        for _ in 0..20 {
            tracker.record(&user("u"), Utc::now(), 100, None, None);
        }

        let checks = tracker.check_velocity("u", "", "").unwrap();
        assert_eq!(checks[0].transaction_count, 21);
        assert!(checks[0].exceeded);
    }

    #[test]
    fn test_future_record_sweep_keeps_live_keys() {
        let tracker = VelocityTracker::new(&VelocityConfig {
            sweep_interval: 3,
            ..VelocityConfig::default()
        });
        let now = Utc::now();

        tracker.record(&user("a"), now, 100, None, None);
        tracker.record(&user("a"), now, 100, None, None);
        // Third record triggers the sweep
        tracker.record(&user("b"), now + Duration::days(30), 100, None, None);

        let checks = tracker.check_velocity("a", "", "").unwrap();
        assert_eq!(checks[0].transaction_count, 2);
        assert_eq!(tracker.active_counters(), 6);
    }

    #[test]
    fn test_location_key() {
        let ctx = TransactionContext::new("tx", "u", 100, "USD", "pm").with_client("203.0.113.77", "ua");
        assert_eq!(location_key(&ctx).as_deref(), Some("ip4:203.0.113.0/24"));

        let ctx = TransactionContext::new("tx", "u", 100, "USD", "pm");
        assert_eq!(location_key(&ctx), None);
    }
}
