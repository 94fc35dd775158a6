//! Component error types

use thiserror::Error;

use dird_core::error::DatastoreError;

/// Errors raised by components and the DSL layer
#[derive(Error, Debug)]
pub enum ComponentError {
    /// Unknown verb
    #[error("Unknown component: {0}")]
    UnknownVerb(String),

    /// Malformed submission rejected during normalization
    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    /// Template rendering failure
    #[error("Blueprint error: {0}")]
    Blueprint(String),

    /// Client-side execution failure
    #[error("Execution error: {0}")]
    Execution(String),

    /// Transfer channel failure
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Cache access failure
    #[error("Cache error: {0}")]
    Cache(#[from] DatastoreError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
