//! Configuration module for the region scan client
//!
//! Supports YAML configuration files with module-based organization

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Scanner configuration
    #[serde(default)]
    pub scan: ScanConfig,
    /// Retry and backoff configuration
    #[serde(default)]
    pub retry: RetryConfig,
    /// META lookup configuration
    #[serde(default)]
    pub meta: MetaConfig,
    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Load configuration from YAML file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let content =
            std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_yaml(&content)
    }

    /// Load configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to YAML file
    pub fn to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let yaml =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, yaml).map_err(|e| ConfigError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Merge with another config (other takes precedence)
    pub fn merge(&mut self, other: Config) {
        self.scan.merge(other.scan);
        self.retry.merge(other.retry);
        self.meta.merge(other.meta);
        self.log.merge(other.log);
    }

    /// Reject settings that would make scans unable to progress
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.scan.batch_size == 0 {
            return Err(ConfigError::Invalid("scan.batch_size must be positive".into()));
        }
        if self.retry.max_attempts == 0 {
            return Err(ConfigError::Invalid("retry.max_attempts must be positive".into()));
        }
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            return Err(ConfigError::Invalid(
                "retry.base_delay_ms must not exceed retry.max_delay_ms".into(),
            ));
        }
        if self.meta.max_attempts == 0 {
            return Err(ConfigError::Invalid("meta.max_attempts must be positive".into()));
        }
        if self.meta.table.is_empty() || self.meta.family.is_empty() {
            return Err(ConfigError::Invalid(
                "meta.table and meta.family must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Scanner configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScanConfig {
    /// Maximum rows requested per batch
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
        }
    }
}

impl ScanConfig {
    fn merge(&mut self, other: Self) {
        if other.batch_size > 0 && other.batch_size != default_batch_size() {
            self.batch_size = other.batch_size;
        }
    }
}

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Attempts per request before giving up on NotServingRegion failures
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// First backoff delay in milliseconds
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Backoff ceiling in milliseconds
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    /// Random extra delay added to each backoff, in milliseconds
    #[serde(default)]
    pub jitter_ms: u64,
    /// Retries against the same server before forcing re-resolution
    #[serde(default = "default_transient_attempts")]
    pub transient_attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            jitter_ms: 0,
            transient_attempts: default_transient_attempts(),
        }
    }
}

impl RetryConfig {
    fn merge(&mut self, other: Self) {
        if other.max_attempts > 0 && other.max_attempts != default_max_attempts() {
            self.max_attempts = other.max_attempts;
        }
        if other.base_delay_ms != default_base_delay_ms() {
            self.base_delay_ms = other.base_delay_ms;
        }
        if other.max_delay_ms != default_max_delay_ms() {
            self.max_delay_ms = other.max_delay_ms;
        }
        if other.jitter_ms > 0 {
            self.jitter_ms = other.jitter_ms;
        }
        if other.transient_attempts != default_transient_attempts() {
            self.transient_attempts = other.transient_attempts;
        }
    }

    /// Get base delay as Duration
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Get backoff ceiling as Duration
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }
}

/// META lookup configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetaConfig {
    /// Name of the META table
    #[serde(default = "default_meta_table")]
    pub table: String,
    /// Column family holding region descriptors
    #[serde(default = "default_meta_family")]
    pub family: String,
    /// META lookups per resolution before failing with BrokenMeta
    #[serde(default = "default_meta_max_attempts")]
    pub max_attempts: u32,
}

impl Default for MetaConfig {
    fn default() -> Self {
        Self {
            table: default_meta_table(),
            family: default_meta_family(),
            max_attempts: default_meta_max_attempts(),
        }
    }
}

impl MetaConfig {
    fn merge(&mut self, other: Self) {
        if !other.table.is_empty() && other.table != default_meta_table() {
            self.table = other.table;
        }
        if !other.family.is_empty() && other.family != default_meta_family() {
            self.family = other.family;
        }
        if other.max_attempts > 0 && other.max_attempts != default_meta_max_attempts() {
            self.max_attempts = other.max_attempts;
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl LogConfig {
    fn merge(&mut self, other: Self) {
        if !other.level.is_empty() && other.level != default_log_level() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_batch_size() -> u32 {
    128
}

fn default_max_attempts() -> u32 {
    10
}

fn default_base_delay_ms() -> u64 {
    50
}

fn default_max_delay_ms() -> u64 {
    2000 // 2 seconds
}

fn default_transient_attempts() -> u32 {
    3
}

fn default_meta_table() -> String {
    String::from_utf8_lossy(region_core::meta::META_TABLE).into_owned()
}

fn default_meta_family() -> String {
    String::from_utf8_lossy(region_core::meta::INFO_FAMILY).into_owned()
}

fn default_meta_max_attempts() -> u32 {
    3
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Configuration error
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.scan.batch_size, 128);
        assert_eq!(config.retry.max_attempts, 10);
        assert_eq!(config.retry.transient_attempts, 3);
        assert_eq!(config.retry.max_delay(), Duration::from_secs(2));
        assert_eq!(config.meta.table, ".META.");
        assert_eq!(config.meta.family, "info");
        assert_eq!(config.meta.max_attempts, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_yaml_partial() {
        let yaml = r#"
scan:
  batch_size: 16
retry:
  max_attempts: 4
  base_delay_ms: 10
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.scan.batch_size, 16);
        assert_eq!(config.retry.max_attempts, 4);
        assert_eq!(config.retry.base_delay_ms, 10);
        assert_eq!(config.retry.max_delay_ms, 2000);
        assert_eq!(config.meta, MetaConfig::default());
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_from_yaml_rejects_invalid() {
        assert!(matches!(
            Config::from_yaml("scan:\n  batch_size: 0\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("retry:\n  base_delay_ms: 5000\n"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            Config::from_yaml("scan: [1, 2"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_merge_prefers_other() {
        let mut base = Config::default();
        base.scan.batch_size = 64;
        let mut other = Config::default();
        other.retry.max_attempts = 2;
        other.log.level = "debug".to_string();
        base.merge(other);
        assert_eq!(base.scan.batch_size, 64);
        assert_eq!(base.retry.max_attempts, 2);
        assert_eq!(base.log.level, "debug");
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("region-client-{}.yaml", std::process::id()));
        let mut config = Config::default();
        config.meta.max_attempts = 5;
        config.to_file(&path).unwrap();
        let loaded = Config::from_file(&path).unwrap();
        let _ = std::fs::remove_file(&path);
        assert_eq!(loaded, config);
    }
}
