//! Volatile in-memory datastore backend

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

use super::Datastore;
use crate::error::DatastoreError;

/// Process-lifetime table held in a HashMap
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<HashMap<String, Value>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Datastore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, DatastoreError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: Value) -> Result<(), DatastoreError> {
        self.entries.write().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), DatastoreError> {
        self.entries.write().await.remove(key);
        Ok(())
    }

    async fn scan(&self, prefix: Option<&str>) -> Result<Vec<(String, Value)>, DatastoreError> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .filter(|(k, _)| prefix.map_or(true, |p| k.starts_with(p)))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    async fn clear(&self) -> Result<usize, DatastoreError> {
        let mut entries = self.entries.write().await;
        let count = entries.len();
        entries.clear();
        Ok(count)
    }
}
