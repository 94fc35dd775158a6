//! Datastore abstraction
//!
//! A datastore instance is one table of JSON documents with single-key
//! atomicity and last-writer-wins semantics. The coordinator keeps its
//! worker and job tables here; the client keeps its caches here.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use crate::config::DatastoreSpec;
use crate::error::DatastoreError;

/// One table of JSON documents
#[async_trait]
pub trait Datastore: Send + Sync {
    /// Fetch a document
    async fn get(&self, key: &str) -> Result<Option<Value>, DatastoreError>;

    /// Store a document, replacing any previous value
    async fn put(&self, key: &str, value: Value) -> Result<(), DatastoreError>;

    /// Remove a document; absent keys are not an error
    async fn delete(&self, key: &str) -> Result<(), DatastoreError>;

    /// List `(key, value)` pairs, optionally filtered by key prefix.
    /// No ordering is guaranteed.
    async fn scan(&self, prefix: Option<&str>) -> Result<Vec<(String, Value)>, DatastoreError>;

    /// Drop every document, returning how many were removed
    async fn clear(&self) -> Result<usize, DatastoreError>;
}

/// Open one table of the configured backend.
pub async fn open(
    spec: &DatastoreSpec,
    table: &str,
) -> Result<Arc<dyn Datastore>, DatastoreError> {
    match spec {
        DatastoreSpec::Memory => Ok(Arc::new(MemoryStore::new())),
        DatastoreSpec::File(root) => {
            let store = FileStore::open(root.join(table)).await?;
            Ok(Arc::new(store))
        }
    }
}
