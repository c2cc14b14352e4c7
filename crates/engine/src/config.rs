//! Registry configuration via `schemata.toml`
//!
//! Selects the table backend, where its data lives, how hard it syncs, and
//! the retry policies of the operations the engine retries on its own.

use crate::retry::RetryConfig;
use schemata_durability::wal::DurabilityMode;
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Conventional config file name inside a data directory
pub const CONFIG_FILE_NAME: &str = "schemata.toml";

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Read {
        /// File that was read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The config is not valid TOML for this schema
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config parsed but its values are inconsistent
    #[error("invalid config: {0}")]
    Invalid(String),
}

impl From<ConfigError> for schemata_core::Error {
    fn from(e: ConfigError) -> Self {
        schemata_core::Error::InvalidOperation(e.to_string())
    }
}

/// Table driver behind every group
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    /// In-memory tables; nothing survives the process
    #[default]
    Memory,
    /// Store-backed tables with an immutable-record cache
    Table,
    /// Log + index tables, one log per group
    Log,
}

/// Registry configuration loaded from `schemata.toml`
///
/// # Example
///
/// ```toml
/// backend = "log"
/// data_dir = "/var/lib/schemata"
/// durability = "strict"
///
/// [encoding_retry]
/// max_retries = 10
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Table backend
    #[serde(default)]
    pub backend: Backend,
    /// Data directory of the `table` and `log` backends; in memory when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    /// Durability mode: `"strict"` or `"batched"`
    #[serde(default = "default_durability_str")]
    pub durability: String,
    /// Retries of the codec-list read-modify-write
    #[serde(default = "RetryConfig::unbounded", deserialize_with = "codec_retry_over_unbounded")]
    pub codec_retry: RetryConfig,
    /// Retries of the encoding-id get-or-create loop
    #[serde(default)]
    pub encoding_retry: RetryConfig,
}

fn default_durability_str() -> String {
    "batched".to_string()
}

/// `[codec_retry]` fields as written
#[derive(Deserialize)]
struct RetryOverrides {
    max_retries: Option<usize>,
    base_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
}

/// Fields missing from `[codec_retry]` keep the unbounded policy's values
fn codec_retry_over_unbounded<'de, D>(deserializer: D) -> Result<RetryConfig, D::Error>
where
    D: Deserializer<'de>,
{
    let overrides = RetryOverrides::deserialize(deserializer)?;
    let base = RetryConfig::unbounded();
    Ok(RetryConfig {
        max_retries: overrides.max_retries.unwrap_or(base.max_retries),
        base_delay_ms: overrides.base_delay_ms.unwrap_or(base.base_delay_ms),
        max_delay_ms: overrides.max_delay_ms.unwrap_or(base.max_delay_ms),
    })
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            data_dir: None,
            durability: default_durability_str(),
            codec_retry: RetryConfig::unbounded(),
            encoding_retry: RetryConfig::default(),
        }
    }
}

impl RegistryConfig {
    /// Parse and validate a config from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: RegistryConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse the durability string into a `DurabilityMode`
    pub fn durability_mode(&self) -> Result<DurabilityMode, ConfigError> {
        match self.durability.as_str() {
            "strict" => Ok(DurabilityMode::Strict),
            "batched" => Ok(DurabilityMode::default()),
            other => Err(ConfigError::Invalid(format!(
                "durability '{}', expected \"strict\" or \"batched\"",
                other
            ))),
        }
    }

    /// Check values that parse but do not fit together
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.durability_mode()?;
        if self.backend == Backend::Memory && self.data_dir.is_some() {
            return Err(ConfigError::Invalid(
                "the memory backend does not take a data_dir".to_string(),
            ));
        }
        for (name, retry) in [("codec_retry", &self.codec_retry), ("encoding_retry", &self.encoding_retry)] {
            if retry.base_delay_ms > retry.max_delay_ms {
                return Err(ConfigError::Invalid(format!(
                    "{}: base_delay_ms {} exceeds max_delay_ms {}",
                    name, retry.base_delay_ms, retry.max_delay_ms
                )));
            }
        }
        Ok(())
    }

    /// Builder: table backend
    pub fn with_backend(mut self, backend: Backend) -> Self {
        self.backend = backend;
        self
    }

    /// Builder: data directory
    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.data_dir = Some(data_dir.into());
        self
    }

    /// Builder: durability mode string
    pub fn with_durability(mut self, durability: impl Into<String>) -> Self {
        self.durability = durability.into();
        self
    }

    /// Builder: codec retry policy
    pub fn with_codec_retry(mut self, retry: RetryConfig) -> Self {
        self.codec_retry = retry;
        self
    }

    /// Builder: encoding-id retry policy
    pub fn with_encoding_retry(mut self, retry: RetryConfig) -> Self {
        self.encoding_retry = retry;
        self
    }

    /// Default config file content with comments
    pub fn default_toml() -> &'static str {
        r#"# Schemata registry configuration
#
# Table backend: "memory" (default), "table" or "log"
#   "memory" = nothing survives the process
#   "table"  = store-backed tables, file-backed when data_dir is set
#   "log"    = log + index tables, one log file per group when data_dir is set
backend = "memory"

# data_dir = "/var/lib/schemata"

# Durability mode: "strict" or "batched" (default)
#   "strict"  = fsync every write
#   "batched" = periodic fsync, may lose the last interval on crash
durability = "batched"

# Codec-list retries. Unbounded unless max_retries is set.
# [codec_retry]
# max_retries = 100
# base_delay_ms = 1
# max_delay_ms = 100

# Encoding-id get-or-create retries
[encoding_retry]
max_retries = 3
base_delay_ms = 1
max_delay_ms = 100
"#
    }
}
