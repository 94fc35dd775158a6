//! Core error types for directord

use std::path::PathBuf;
use thiserror::Error;

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// YAML parse error
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),

    /// Unsupported datastore URL
    #[error("Unsupported datastore URL: {0} (expected `memory` or `file:///path`)")]
    UnsupportedDatastore(String),
}

/// Datastore-related errors
#[derive(Error, Debug)]
pub enum DatastoreError {
    /// Key not representable on this backend
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Stored value failed to decode
    #[error("Corrupt value for key {key}: {source}")]
    Corrupt {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    /// Value failed to encode
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
