//! dird-core: Core domain types and services for directord
//!
//! Shared between the server coordinator, the client worker, and the user
//! CLI: identities and worker records, the job model and its fingerprinting,
//! configuration, the control-socket RPC types, the datastore abstraction
//! with its memory and file backends, and the tagged TTL cache built on top
//! of it.

pub mod cache;
pub mod clock;
pub mod config;
pub mod datastore;
pub mod error;
pub mod job;
pub mod rpc;
pub mod sha;
pub mod types;
pub mod wire;

pub use config::{Config, DatastoreSpec};
pub use error::{ConfigError, DatastoreError};
pub use job::{JobDefinition, JobRecord, JobSpec, NodeResult};
pub use types::{Identity, JobState, WorkerRecord};
