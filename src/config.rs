//! Configuration management for the usage ledger.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::Result;

/// Environment variable prefix for layered configuration, e.g.
/// `USAGE_LEDGER__COUNTERS__PREFIX=api`.
pub const ENV_PREFIX: &str = "USAGE_LEDGER";

/// Main configuration for the usage ledger.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Usage counter configuration
    #[serde(default)]
    pub counters: CounterConfig,

    /// Credit pack ledger configuration
    #[serde(default)]
    pub credits: CreditConfig,

    /// Monthly quota ledger configuration
    #[serde(default)]
    pub quota: QuotaConfig,

    /// Backing store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Usage counter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CounterConfig {
    /// Key prefix shared by calendar and rolling counters
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// Minimum expiry the store accepts, in seconds
    #[serde(default = "default_min_ttl")]
    pub min_ttl_secs: u64,

    /// Default rolling window length in seconds
    #[serde(default = "default_rolling_window")]
    pub rolling_window_secs: u64,
}

impl Default for CounterConfig {
    fn default() -> Self {
        Self {
            prefix: default_prefix(),
            min_ttl_secs: default_min_ttl(),
            rolling_window_secs: default_rolling_window(),
        }
    }
}

fn default_prefix() -> String {
    "rl".to_string()
}

fn default_min_ttl() -> u64 {
    60
}

fn default_rolling_window() -> u64 {
    86_400
}

/// Credit pack ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditConfig {
    /// Calendar months a pack stays valid
    #[serde(default = "default_validity_months")]
    pub validity_months: u32,

    /// Extra days granted after the validity period
    #[serde(default = "default_grace_days")]
    pub grace_days: u32,
}

impl Default for CreditConfig {
    fn default() -> Self {
        Self {
            validity_months: default_validity_months(),
            grace_days: default_grace_days(),
        }
    }
}

fn default_validity_months() -> u32 {
    6
}

fn default_grace_days() -> u32 {
    14
}

/// Monthly quota ledger configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaConfig {
    /// Feature segment in `ai:quota:{feature}:...` keys
    #[serde(default = "default_quota_feature")]
    pub feature: String,
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            feature: default_quota_feature(),
        }
    }
}

fn default_quota_feature() -> String {
    "video".to_string()
}

/// Backing store configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Snapshot file for the file-backed store; in-memory when unset
    #[serde(default)]
    pub data_path: Option<PathBuf>,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl LedgerConfig {
    /// Load configuration from an optional YAML file layered with
    /// `USAGE_LEDGER__*` environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }
}
