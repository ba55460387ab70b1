//! Configuration management for the risk engine

use crate::error::ConfigError;
use crate::scoring::policy::DecisionPolicy;
use crate::types::risk::RiskFactorType;
use crate::types::velocity::VelocityWindow;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub scoring: DecisionPolicy,
    pub amount: AmountConfig,
    pub velocity: VelocityConfig,
    pub device: DeviceConfig,
    pub geography: GeographyConfig,
    pub model: ModelConfig,
    pub lookup: LookupConfig,
    pub pipeline: PipelineConfig,
    pub logging: LoggingConfig,
}

/// AMOUNT factor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AmountConfig {
    /// Amount (minor units) considered ordinary
    pub baseline: i64,
    /// Per-currency baselines for currencies with different minor-unit scales
    pub currency_baselines: HashMap<String, i64>,
    /// Score added per doubling of the amount/baseline ratio
    pub curve_scale: f64,
}

impl Default for AmountConfig {
    fn default() -> Self {
        let mut currency_baselines = HashMap::new();
        currency_baselines.insert("JPY".to_string(), 15_000);
        currency_baselines.insert("KRW".to_string(), 130_000);

        Self {
            baseline: 10_000,
            currency_baselines,
            curve_scale: 20.0,
        }
    }
}

impl AmountConfig {
    /// Baseline for a currency, case-insensitive
    pub fn baseline_for(&self, currency: &str) -> i64 {
        self.currency_baselines
            .iter()
            .find(|(code, _)| code.eq_ignore_ascii_case(currency.trim()))
            .map(|(_, &baseline)| baseline)
            .filter(|&baseline| baseline > 0)
            .unwrap_or(self.baseline)
    }
}

/// Velocity tracking configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct VelocityConfig {
    /// Shards in the concurrent counter map (power of two)
    pub shards: usize,
    /// Idle keys are swept after this many recorded transactions
    pub sweep_interval: u64,
    pub windows: Vec<VelocityWindow>,
}

impl Default for VelocityConfig {
    fn default() -> Self {
        Self {
            shards: 64,
            sweep_interval: 4_096,
            windows: VelocityWindow::default_windows(),
        }
    }
}

/// Device trust heuristics
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Score added for a device never seen before
    pub unseen_penalty: f64,
    /// Score added for a previously flagged device
    pub flagged_penalty: f64,
    /// Distinct users above which a device counts as shared
    pub shared_device_users: u32,
    /// Case-insensitive user-agent fragments that indicate automation
    pub automation_markers: Vec<String>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            unseen_penalty: 15.0,
            flagged_penalty: 30.0,
            shared_device_users: 3,
            automation_markers: [
                "headlesschrome",
                "phantomjs",
                "selenium",
                "webdriver",
                "puppeteer",
                "playwright",
                "python-requests",
                "curl/",
                "wget/",
                "scrapy",
                "bot",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
        }
    }
}

/// GEOGRAPHY factor configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeographyConfig {
    /// ISO-3166 alpha-2 codes treated as high risk
    pub high_risk_countries: Vec<String>,
}

impl Default for GeographyConfig {
    fn default() -> Self {
        Self {
            high_risk_countries: ["KP", "IR", "SY", "CU"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl GeographyConfig {
    pub fn is_high_risk(&self, country: &str) -> bool {
        self.high_risk_countries
            .iter()
            .any(|c| c.eq_ignore_ascii_case(country))
    }
}

/// Weight table and online update configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Initial factor weights by dimension name ("amount", "time_pattern", ...)
    pub weights: HashMap<String, f64>,
    /// JSON weight table loaded at startup (overrides `weights`) and saved after updates
    pub weights_path: Option<String>,
    pub learning_rate: f64,
    /// Maximum absolute change to any single weight per batch
    pub max_step: f64,
    pub min_weight: f64,
    pub max_weight: f64,
}

fn default_weights() -> HashMap<String, f64> {
    let mut weights = HashMap::new();
    weights.insert("amount".to_string(), 0.25);
    weights.insert("velocity".to_string(), 0.25);
    weights.insert("device".to_string(), 0.20);
    weights.insert("time_pattern".to_string(), 0.10);
    weights.insert("geography".to_string(), 0.10);
    weights.insert("behavioral".to_string(), 0.10);
    weights
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            weights: default_weights(),
            weights_path: None,
            learning_rate: 0.05,
            max_step: 0.05,
            min_weight: 0.02,
            max_weight: 0.6,
        }
    }
}

impl ModelConfig {
    /// Configured weight for a dimension, falling back to the built-in default
    pub fn weight_for(&self, kind: RiskFactorType) -> f64 {
        self.weights
            .get(kind.as_str())
            .copied()
            .or_else(|| default_weights().get(kind.as_str()).copied())
            .unwrap_or(0.0)
    }
}

/// Collaborator lookup configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Budget for each historical lookup in milliseconds
    pub timeout_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self { timeout_ms: 50 }
    }
}

impl LookupConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Replay pipeline configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Concurrent scoring tasks
    pub workers: usize,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 8,
            metrics_interval_secs: 30,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// Load `config/config.toml` if present, layered with `RISK_*` environment overrides
    pub fn load() -> Result<Self> {
        Self::build(Path::new(DEFAULT_CONFIG_PATH), false)
    }

    /// Load configuration from a specific path
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::build(path.as_ref(), true)
    }

    fn build(path: &Path, required: bool) -> Result<Self> {
        let config: EngineConfig = Config::builder()
            .add_source(File::from(path).required(required))
            .add_source(
                Environment::with_prefix("RISK")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to build configuration")?
            .try_deserialize()
            .context("Failed to deserialize configuration")?;

        config.validate().context("Invalid configuration")?;
        Ok(config)
    }

    /// Check cross-field constraints serde cannot express
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate()?;

        if self.amount.baseline <= 0 {
            return Err(ConfigError::AmountBaseline);
        }

        if self.velocity.windows.is_empty() {
            return Err(ConfigError::NoVelocityWindows);
        }
        for window in &self.velocity.windows {
            // Buckets narrower than a second would shrink the window
            if window.duration_secs == 0
                || window.buckets == 0
                || u64::from(window.buckets) > window.duration_secs
            {
                return Err(ConfigError::VelocityWindow(window.label.clone()));
            }
        }
        if self.velocity.shards < 2 || !self.velocity.shards.is_power_of_two() {
            return Err(ConfigError::ShardCount(self.velocity.shards));
        }

        let model = &self.model;
        if !(0.0..=1.0).contains(&model.min_weight)
            || !(0.0..=1.0).contains(&model.max_weight)
            || model.min_weight > model.max_weight
        {
            return Err(ConfigError::WeightBounds);
        }

        if self.lookup.timeout_ms == 0 {
            return Err(ConfigError::LookupTimeout);
        }

        Ok(())
    }
}
