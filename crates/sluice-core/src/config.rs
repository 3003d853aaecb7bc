//! Gateway configuration.
//!
//! TOML with a default for every key; an empty document is a valid config.
//!
//! ```toml
//! max_runs = 500
//! max_rows = 100000
//! row_ttl_secs = 86400
//! key_prefix = "sluice"
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for '{field}': {message}")]
    InvalidValue {
        field: &'static str,
        message: String,
    },
}

/// Bounds and namespacing for one gateway instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct GatewayConfig {
    /// Maximum number of run receipts kept.
    pub max_runs: usize,
    /// Maximum number of buffered rows across all receipts.
    pub max_rows: usize,
    /// Drift events kept; oldest dropped first.
    pub max_drift_events: usize,
    /// Dispatch lifecycle entries tracked; oldest dropped first.
    pub max_dispatches: usize,
    /// TTL on persisted row-buffer blobs.
    pub row_ttl_secs: u64,
    /// Default gap that splits advisory receipt batches.
    pub batch_gap_secs: u64,
    /// Namespace for every durable-cache key this gateway writes.
    pub key_prefix: String,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            max_runs: 500,
            max_rows: 100_000,
            max_drift_events: 1_000,
            max_dispatches: 1_000,
            row_ttl_secs: 24 * 60 * 60,
            batch_gap_secs: 60,
            key_prefix: "sluice".to_string(),
        }
    }
}

impl FromStr for GatewayConfig {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_toml_str(s)
    }
}

impl GatewayConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("max_runs", self.max_runs),
            ("max_rows", self.max_rows),
            ("max_drift_events", self.max_drift_events),
            ("max_dispatches", self.max_dispatches),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field,
                    message: "must be at least 1".to_string(),
                });
            }
        }
        if self.key_prefix.is_empty() || self.key_prefix.contains(':') {
            return Err(ConfigError::InvalidValue {
                field: "key_prefix",
                message: format!("must be non-empty and free of ':' (got `{}`)", self.key_prefix),
            });
        }
        Ok(())
    }

    pub fn row_ttl(&self) -> Duration {
        Duration::from_secs(self.row_ttl_secs)
    }

    pub fn batch_gap(&self) -> Duration {
        Duration::from_secs(self.batch_gap_secs)
    }
}
