//! Learned factor weights and the store that publishes them to scorers

use crate::config::ModelConfig;
use crate::types::risk::RiskFactorType;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Immutable, versioned set of per-dimension weights
#[derive(Debug, Clone, PartialEq)]
pub struct WeightTable {
    weights: BTreeMap<RiskFactorType, f64>,
    version: u64,
    updated_at: DateTime<Utc>,
}

/// On-disk form, keyed by dimension name
#[derive(Debug, Serialize, Deserialize)]
struct WeightTableFile {
    version: u64,
    updated_at: DateTime<Utc>,
    weights: BTreeMap<String, f64>,
}

impl WeightTable {
    /// Version-zero table seeded from configuration
    pub fn from_config(config: &ModelConfig) -> Self {
        let weights = RiskFactorType::SCORED
            .into_iter()
            .map(|kind| (kind, config.weight_for(kind).max(0.0)))
            .collect();

        Self {
            weights,
            version: 0,
            updated_at: Utc::now(),
        }
    }

    /// Weight of a dimension; unknown dimensions weigh nothing
    pub fn weight(&self, kind: RiskFactorType) -> f64 {
        self.weights.get(&kind).copied().unwrap_or(0.0)
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    pub fn iter(&self) -> impl Iterator<Item = (RiskFactorType, f64)> + '_ {
        self.weights.iter().map(|(&kind, &weight)| (kind, weight))
    }

    pub fn total(&self) -> f64 {
        self.weights.values().sum()
    }

    /// Next version with `deltas` applied, each weight clamped to `[min, max]`
    pub fn with_adjustments(&self, deltas: &BTreeMap<RiskFactorType, f64>, min: f64, max: f64) -> Self {
        let weights = self
            .weights
            .iter()
            .map(|(&kind, &weight)| {
                let delta = deltas.get(&kind).copied().unwrap_or(0.0);
                (kind, (weight + delta).clamp(min, max))
            })
            .collect();

        Self {
            weights,
            version: self.version + 1,
            updated_at: Utc::now(),
        }
    }

    /// Load a table saved by `save_to_path`
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading weight table");

        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read weight table from {}", path.display()))?;
        let file: WeightTableFile = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse weight table {}", path.display()))?;

        let mut weights = BTreeMap::new();
        for (name, weight) in file.weights {
            match RiskFactorType::from_name(&name) {
                Some(kind) if RiskFactorType::SCORED.contains(&kind) => {
                    if !weight.is_finite() || weight < 0.0 {
                        anyhow::bail!("Weight for {name} must be a non-negative number, got {weight}");
                    }
                    weights.insert(kind, weight);
                }
                _ => warn!(dimension = %name, "Ignoring weight for unknown dimension"),
            }
        }

        if weights.is_empty() {
            anyhow::bail!("No usable weights in {}", path.display());
        }

        info!(version = file.version, dimensions = weights.len(), "Weight table loaded");

        Ok(Self {
            weights,
            version: file.version,
            updated_at: file.updated_at,
        })
    }

    /// Write the table as JSON, replacing the file atomically
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = WeightTableFile {
            version: self.version,
            updated_at: self.updated_at,
            weights: self
                .weights
                .iter()
                .map(|(kind, &weight)| (kind.as_str().to_string(), weight))
                .collect(),
        };
        let json = serde_json::to_string_pretty(&file)?;

        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json)
            .with_context(|| format!("Failed to write weight table to {}", tmp.display()))?;
        std::fs::rename(&tmp, path)
            .with_context(|| format!("Failed to move weight table into {}", path.display()))?;

        info!(path = %path.display(), version = self.version, "Weight table saved");
        Ok(())
    }
}

/// Publishes the current weight table.
///
/// Readers take a cheap snapshot and never observe a partially applied update.
#[derive(Debug)]
pub struct WeightStore {
    current: RwLock<Arc<WeightTable>>,
}

impl WeightStore {
    pub fn new(table: WeightTable) -> Self {
        Self {
            current: RwLock::new(Arc::new(table)),
        }
    }

    pub fn from_config(config: &ModelConfig) -> Self {
        Self::new(WeightTable::from_config(config))
    }

    pub fn snapshot(&self) -> Arc<WeightTable> {
        self.current.read().clone()
    }

    /// Swap in a new table, returning the one it replaced
    pub fn replace(&self, table: WeightTable) -> Arc<WeightTable> {
        std::mem::replace(&mut *self.current.write(), Arc::new(table))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{}-{}.json", name, uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_from_config() {
        let table = WeightTable::from_config(&ModelConfig::default());
        assert_eq!(table.version(), 0);
        assert_eq!(table.weight(RiskFactorType::Amount), 0.25);
        assert_eq!(table.weight(RiskFactorType::InputValidation), 0.0);
        assert!((table.total() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_adjustments_are_bounded_and_versioned() {
        let table = WeightTable::from_config(&ModelConfig::default());
        let mut deltas = BTreeMap::new();
        deltas.insert(RiskFactorType::Amount, 1.0);
        deltas.insert(RiskFactorType::Geography, -1.0);

        let next = table.with_adjustments(&deltas, 0.02, 0.6);
        assert_eq!(next.version(), 1);
        assert_eq!(next.weight(RiskFactorType::Amount), 0.6);
        assert_eq!(next.weight(RiskFactorType::Geography), 0.02);
        assert_eq!(next.weight(RiskFactorType::Device), 0.2);
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("weights");
        let mut deltas = BTreeMap::new();
        deltas.insert(RiskFactorType::Velocity, 0.05);
        let table = WeightTable::from_config(&ModelConfig::default()).with_adjustments(&deltas, 0.0, 1.0);

        table.save_to_path(&path).unwrap();
        let loaded = WeightTable::load_from_path(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(loaded.version(), 1);
        assert!((loaded.weight(RiskFactorType::Velocity) - 0.3).abs() < 1e-12);
    }

    #[test]
    fn test_load_rejects_negative_weight() {
        let path = temp_path("weights-bad");
        std::fs::write(
            &path,
            r#"{"version": 3, "updated_at": "2024-01-01T00:00:00Z", "weights": {"amount": -0.5}}"#,
        )
        .unwrap();

        let result = WeightTable::load_from_path(&path);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_store_replace() {
        let store = WeightStore::from_config(&ModelConfig::default());
        let before = store.snapshot();
        let next = before.with_adjustments(&BTreeMap::new(), 0.0, 1.0);

        let old = store.replace(next);
        assert_eq!(old.version(), 0);
        assert_eq!(store.snapshot().version(), 1);
        // Earlier snapshots are unaffected
        assert_eq!(before.version(), 0);
    }
}
