//! Protocol error types

use thiserror::Error;

/// Errors that can occur during protocol operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Invalid frame header
    #[error("Invalid frame header")]
    InvalidHeader,

    /// Unknown channel tag
    #[error("Unknown channel: {0}")]
    UnknownChannel(u8),

    /// Unknown control code
    #[error("Unknown control code: {0}")]
    UnknownControl(u8),

    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
