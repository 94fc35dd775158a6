//! Configuration management for directord
//!
//! One flat YAML file shared by the server, the client, and the CLI. Every
//! key is also accepted as a command-line flag of the same name (hyphens for
//! underscores); flags win over the file.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::error::ConfigError;

/// Default heartbeat interval in seconds
pub const DEFAULT_HEARTBEAT_INTERVAL: u64 = 60;

/// Missed intervals before a worker is considered dead
pub const HEARTBEAT_LIVENESS: u64 = 3;

/// Default cache TTL in seconds (12 hours)
pub const DEFAULT_CACHE_TTL: u64 = 43200;

/// Flat configuration shared by every directord process
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Transport plug-in name
    pub driver: String,

    /// Host or IP the client connects to
    pub server_address: String,

    /// Server listen address
    pub bind_address: String,

    /// Seconds between heartbeats
    pub heartbeat_interval: u64,

    /// Verbose logging
    pub debug: bool,

    /// UNIX socket path for local RPC
    pub socket_path: PathBuf,

    /// Group owning the control socket (name or gid)
    pub socket_group: Option<String>,

    /// Plain-text authentication token for applicable drivers
    pub shared_key: Option<String>,

    /// Enable asymmetric-key encryption for applicable drivers
    pub curve_encryption: bool,

    /// Datastore backend URL (`memory` or `file:///path`)
    pub datastore: String,

    /// Default cache TTL in seconds
    pub cache_ttl: u64,

    /// Client-local cache directory
    pub cache_path: PathBuf,

    /// Extra directory for user-defined components
    pub component_path: Option<PathBuf>,

    /// Override for the client identity (defaults to the host name)
    pub identity: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            driver: "tcp".to_string(),
            server_address: "127.0.0.1:5555".to_string(),
            bind_address: "0.0.0.0:5555".to_string(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            debug: false,
            socket_path: PathBuf::from("/var/run/directord.sock"),
            socket_group: None,
            shared_key: None,
            curve_encryption: false,
            datastore: "memory".to_string(),
            cache_ttl: DEFAULT_CACHE_TTL,
            cache_path: PathBuf::from("/var/cache/directord"),
            component_path: None,
            identity: None,
        }
    }
}

impl Config {
    /// Worker expiry window: heartbeat interval times the liveness factor
    pub fn expiry_window_secs(&self) -> u64 {
        self.heartbeat_interval * HEARTBEAT_LIVENESS
    }

    /// Parse the configured datastore URL
    pub fn datastore_spec(&self) -> Result<DatastoreSpec, ConfigError> {
        self.datastore.parse()
    }
}

/// Parsed datastore backend selection
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatastoreSpec {
    /// Volatile, process-lifetime store
    Memory,
    /// JSON-per-key directory layout
    File(PathBuf),
}

impl FromStr for DatastoreSpec {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() || s == "memory" {
            return Ok(DatastoreSpec::Memory);
        }
        if let Some(path) = s.strip_prefix("file://") {
            if path.is_empty() {
                return Err(ConfigError::UnsupportedDatastore(s.to_string()));
            }
            return Ok(DatastoreSpec::File(PathBuf::from(path)));
        }
        // Remote key-value URLs (redis://...) are a plug-in seam not wired
        // into this build.
        Err(ConfigError::UnsupportedDatastore(s.to_string()))
    }
}

/// Get the default configuration directory
pub fn default_config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("directord")
}

/// Get the default configuration file path
pub fn default_config_path() -> PathBuf {
    default_config_dir().join("config.yaml")
}

/// Load configuration from a file
pub fn load_config(path: &Path) -> Result<Config, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::NotFound(path.to_path_buf()));
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| ConfigError::Invalid(format!("Failed to read config: {}", e)))?;

    let config: Config = serde_yaml::from_str(&content)?;
    Ok(config)
}

/// Save configuration to a file
pub fn save_config(path: &Path, config: &Config) -> Result<(), ConfigError> {
    let content = serde_yaml::to_string(config)
        .map_err(|e| ConfigError::Invalid(format!("Failed to render config: {}", e)))?;

    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| ConfigError::Invalid(format!("Failed to create config dir: {}", e)))?;
    }

    std::fs::write(path, content)
        .map_err(|e| ConfigError::Invalid(format!("Failed to write config: {}", e)))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.driver, "tcp");
        assert_eq!(config.heartbeat_interval, 60);
        assert_eq!(config.expiry_window_secs(), 180);
        assert_eq!(config.cache_ttl, DEFAULT_CACHE_TTL);
    }

    #[test]
    fn test_datastore_spec_parse() {
        assert_eq!(
            "memory".parse::<DatastoreSpec>().unwrap(),
            DatastoreSpec::Memory
        );
        assert_eq!(
            "file:///var/cache/directord".parse::<DatastoreSpec>().unwrap(),
            DatastoreSpec::File(PathBuf::from("/var/cache/directord"))
        );
        assert!("redis://127.0.0.1/0".parse::<DatastoreSpec>().is_err());
        assert!("file://".parse::<DatastoreSpec>().is_err());
    }

    #[test]
    fn test_load_partial_yaml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, "debug: true\nheartbeat_interval: 5\n").unwrap();

        let config = load_config(&path).unwrap();
        assert!(config.debug);
        assert_eq!(config.heartbeat_interval, 5);
        // Unspecified keys keep their defaults
        assert_eq!(config.driver, "tcp");
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");
        match load_config(&path) {
            Err(ConfigError::NotFound(p)) => assert_eq!(p, path),
            other => panic!("Expected NotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.yaml");

        let mut config = Config::default();
        config.datastore = "file:///tmp/dird".to_string();
        save_config(&path, &config).unwrap();

        let reloaded = load_config(&path).unwrap();
        assert_eq!(reloaded.datastore, "file:///tmp/dird");
    }
}
