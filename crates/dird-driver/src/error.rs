//! Driver error types

use thiserror::Error;

use dird_protocol::ProtocolError;

/// Errors that can occur inside a transport driver
#[derive(Error, Debug)]
pub enum DriverError {
    /// Bind failure on the server side
    #[error("Failed to bind {address}: {source}")]
    Bind {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// Connect failure on the client side
    #[error("Failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: std::io::Error,
    },

    /// No live connection for the addressed identity
    #[error("Identity not connected: {0}")]
    NotConnected(String),

    /// The driver was closed while the operation was in flight
    #[error("Driver closed")]
    Closed,

    /// A frame could not be delivered after retry exhaustion
    #[error("Frame undeliverable after {attempts} attempts")]
    Undeliverable { attempts: u32 },

    /// Operation the driver does not implement (e.g. key generation)
    #[error("Unsupported by driver: {0}")]
    Unsupported(&'static str),

    /// Wire-level error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
