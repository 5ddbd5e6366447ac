//! Coordinator configuration
//!
//! Loaded from a YAML file with one section per concern. Command line flags
//! override individual values afterwards.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use dist_core::EngineConfig;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Distribution engine settings
    #[serde(default)]
    pub engine: EngineConfig,
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
        serde_yaml::from_str(yaml).map_err(|e| ConfigError::ParseError(e.to_string()))
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
        self.server.merge(other.server);
        self.storage.merge(other.storage);
        self.engine.merge(other.engine);
        self.log.merge(other.log);
    }
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP API listen address
    #[serde(default = "default_http_addr")]
    pub http_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: default_http_addr(),
        }
    }
}

impl ServerConfig {
    fn merge(&mut self, other: Self) {
        if !other.http_addr.is_empty() {
            self.http_addr = other.http_addr;
        }
    }
}

/// Catalog persistence configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory holding the catalog file
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Period of the background save task in seconds
    #[serde(default = "default_save_interval_secs")]
    pub save_interval_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            save_interval_secs: default_save_interval_secs(),
        }
    }
}

impl StorageConfig {
    fn merge(&mut self, other: Self) {
        if !other.data_dir.as_os_str().is_empty() {
            self.data_dir = other.data_dir;
        }
        if other.save_interval_secs > 0 {
            self.save_interval_secs = other.save_interval_secs;
        }
    }

    pub fn save_interval(&self) -> Duration {
        Duration::from_secs(self.save_interval_secs)
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
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
        if !other.level.is_empty() {
            self.level = other.level;
        }
    }
}

// Default value functions

fn default_http_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./coordinator_data")
}

fn default_save_interval_secs() -> u64 {
    60
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
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_yaml() {
        let yaml = r#"
server:
  http_addr: "127.0.0.1:9000"
storage:
  data_dir: /var/lib/coordinator
engine:
  cluster_name: analytics
  shard_count: 16
  shard_replication_factor: 2
log:
  level: debug
"#;
        let config = Config::from_yaml(yaml).unwrap();
        assert_eq!(config.server.http_addr, "127.0.0.1:9000");
        assert_eq!(config.storage.data_dir, PathBuf::from("/var/lib/coordinator"));
        assert_eq!(config.storage.save_interval_secs, 60);
        assert_eq!(config.engine.cluster_name, "analytics");
        assert_eq!(config.engine.shard_count, 16);
        assert_eq!(config.engine.shard_replication_factor, 2);
        assert_eq!(config.engine.lock_timeout_ms, 5000);
        assert_eq!(config.log.level, "debug");
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = Config::from_yaml("{}").unwrap();
        assert_eq!(config.server.http_addr, "0.0.0.0:8080");
        assert_eq!(config.storage.save_interval(), Duration::from_secs(60));
        assert_eq!(config.engine.shard_count, 32);
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            Config::from_yaml("server: [1, 2"),
            Err(ConfigError::ParseError(_))
        ));
    }

    #[test]
    fn test_merge() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.server.http_addr = String::new();
        other.storage.save_interval_secs = 5;
        other.log.level = "warn".to_string();
        base.merge(other);

        assert_eq!(base.server.http_addr, "0.0.0.0:8080");
        assert_eq!(base.storage.save_interval_secs, 5);
        assert_eq!(base.log.level, "warn");
    }

    #[test]
    fn test_file_round_trip() {
        let path = std::env::temp_dir().join(format!("coordinator_config_{}.yaml", std::process::id()));
        let mut config = Config::default();
        config.engine.shard_count = 4;
        config.to_file(&path).unwrap();

        let loaded = Config::from_file(&path).unwrap();
        assert_eq!(loaded.engine.shard_count, 4);
        let _ = std::fs::remove_file(&path);
    }
}
