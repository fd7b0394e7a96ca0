//! Configuration for the ledger

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Ledger configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,

    /// Conflict retry configuration
    pub retry: RetryConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/neuron-ledger"),
            service_name: "neuron-ledger".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            rocksdb: RocksDBConfig::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,

    /// How long a transaction waits for a row lock before aborting (ms)
    pub lock_timeout_ms: i64,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
            lock_timeout_ms: 1_000,
        }
    }
}

/// Retry policy for transactions aborted by a concurrent writer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Delay before the first retry (ms)
    pub initial_delay_ms: u64,

    /// Upper bound on any single delay (ms)
    pub max_delay_ms: u64,

    /// Growth factor between retries
    pub backoff_multiplier: f64,

    /// Fraction of the delay randomized either way
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay_ms: 5,
            max_delay_ms: 200,
            backoff_multiplier: 2.0,
            jitter_factor: 0.1,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Override fields from environment variables
    pub fn apply_env(&mut self) -> crate::Result<()> {
        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            self.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(timeout) = std::env::var("LEDGER_LOCK_TIMEOUT_MS") {
            self.rocksdb.lock_timeout_ms = timeout.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_LOCK_TIMEOUT_MS: {}", e))
            })?;
        }

        if let Ok(retries) = std::env::var("LEDGER_MAX_RETRIES") {
            self.retry.max_retries = retries.parse().map_err(|e| {
                crate::Error::Config(format!("Invalid LEDGER_MAX_RETRIES: {}", e))
            })?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.service_name, "neuron-ledger");
        assert_eq!(config.rocksdb.lock_timeout_ms, 1_000);
        assert_eq!(config.retry.max_retries, 3);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_dir = "/var/lib/neurons"

            [retry]
            max_retries = 7
            "#,
        )
        .unwrap();

        assert_eq!(config.data_dir, PathBuf::from("/var/lib/neurons"));
        assert_eq!(config.retry.max_retries, 7);
        assert_eq!(config.retry.initial_delay_ms, 5);
        assert_eq!(config.rocksdb.max_background_jobs, 2);
    }

    #[test]
    fn test_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "[rocksdb]\nlock_timeout_ms = 250\n").unwrap();

        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.rocksdb.lock_timeout_ms, 250);
    }

    #[test]
    fn test_from_file_rejects_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.toml");
        std::fs::write(&path, "retry = 12").unwrap();

        let err = Config::from_file(&path).unwrap_err();
        assert!(err.to_string().contains("Failed to parse config"));
    }
}
