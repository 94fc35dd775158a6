//! Tagged TTL cache on top of the datastore
//!
//! The client worker keeps its argument, environment, query, job-outcome,
//! and parent-outcome caches here. Every entry carries an expiry deadline;
//! TTL is evaluated lazily on read and expired entries are deleted at that
//! point.

use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use crate::clock;
use crate::datastore::Datastore;
use crate::error::DatastoreError;

/// Cache partitions addressable by `CACHEEVICT`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTag {
    /// Interpolation arguments (string → scalar)
    Args,
    /// Process environment overrides (string → string)
    Envs,
    /// Accumulative cluster query results (string → {identity → value})
    Query,
    /// Job outcomes keyed by job sha
    Jobs,
    /// Parent outcomes keyed by parent id
    Parents,
}

impl CacheTag {
    /// All tags, for `CACHEEVICT all`
    pub fn all() -> [CacheTag; 5] {
        [
            CacheTag::Args,
            CacheTag::Envs,
            CacheTag::Query,
            CacheTag::Jobs,
            CacheTag::Parents,
        ]
    }

    fn prefix(&self) -> &'static str {
        match self {
            CacheTag::Args => "args:",
            CacheTag::Envs => "envs:",
            CacheTag::Query => "query:",
            CacheTag::Jobs => "jobs:",
            CacheTag::Parents => "parents:",
        }
    }

    fn entry_key(&self, key: &str) -> String {
        format!("{}{}", self.prefix(), key)
    }
}

impl fmt::Display for CacheTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.prefix().trim_end_matches(':'))
    }
}

impl FromStr for CacheTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "args" => Ok(CacheTag::Args),
            "envs" => Ok(CacheTag::Envs),
            "query" => Ok(CacheTag::Query),
            "jobs" => Ok(CacheTag::Jobs),
            "parents" => Ok(CacheTag::Parents),
            other => Err(format!("unknown cache tag: {}", other)),
        }
    }
}

/// Client-local cache with lazy TTL, backed by a datastore table
pub struct CacheStore {
    store: Arc<dyn Datastore>,
    default_ttl_ms: u64,
}

impl CacheStore {
    /// Create a cache over the given table with a default TTL in seconds
    pub fn new(store: Arc<dyn Datastore>, default_ttl_secs: u64) -> Self {
        Self {
            store,
            default_ttl_ms: default_ttl_secs * 1000,
        }
    }

    /// Store a value under the default TTL
    pub async fn put(&self, tag: CacheTag, key: &str, value: Value) -> Result<(), DatastoreError> {
        self.put_ttl(tag, key, value, self.default_ttl_ms).await
    }

    /// Store a value under an explicit TTL in milliseconds
    pub async fn put_ttl(
        &self,
        tag: CacheTag,
        key: &str,
        value: Value,
        ttl_ms: u64,
    ) -> Result<(), DatastoreError> {
        let entry = json!({
            "value": value,
            "expires_at_ms": clock::now_millis() + ttl_ms,
        });
        self.store.put(&tag.entry_key(key), entry).await
    }

    /// Fetch a value; expired entries are deleted and read as absent
    pub async fn get(&self, tag: CacheTag, key: &str) -> Result<Option<Value>, DatastoreError> {
        let entry_key = tag.entry_key(key);
        let Some(entry) = self.store.get(&entry_key).await? else {
            return Ok(None);
        };
        if entry_expired(&entry) {
            self.store.delete(&entry_key).await?;
            return Ok(None);
        }
        Ok(entry.get("value").cloned())
    }

    /// Snapshot one whole tag as a map, skipping expired entries
    pub async fn get_map(&self, tag: CacheTag) -> Result<Map<String, Value>, DatastoreError> {
        let mut out = Map::new();
        for (key, entry) in self.store.scan(Some(tag.prefix())).await? {
            if entry_expired(&entry) {
                self.store.delete(&key).await?;
                continue;
            }
            let bare = key.trim_start_matches(tag.prefix()).to_string();
            if let Some(value) = entry.get("value") {
                out.insert(bare, value.clone());
            }
        }
        Ok(out)
    }

    /// Merge an object into an entry that holds an object.
    ///
    /// Used for the accumulative query cache
    /// (`query[key][identity] = value`) and for `extend_args`-style updates.
    /// The merged entry gets a fresh default TTL.
    pub async fn merge_object(
        &self,
        tag: CacheTag,
        key: &str,
        update: Map<String, Value>,
    ) -> Result<(), DatastoreError> {
        let mut merged = match self.get(tag, key).await? {
            Some(Value::Object(existing)) => existing,
            _ => Map::new(),
        };
        for (k, v) in update {
            merged.insert(k, v);
        }
        self.put(tag, key, Value::Object(merged)).await
    }

    /// Evict one tag, returning the number of removed entries
    pub async fn evict(&self, tag: CacheTag) -> Result<usize, DatastoreError> {
        let entries = self.store.scan(Some(tag.prefix())).await?;
        let count = entries.len();
        for (key, _) in entries {
            self.store.delete(&key).await?;
        }
        Ok(count)
    }

    /// Evict every tag
    pub async fn evict_all(&self) -> Result<usize, DatastoreError> {
        let mut count = 0;
        for tag in CacheTag::all() {
            count += self.evict(tag).await?;
        }
        Ok(count)
    }
}

fn entry_expired(entry: &Value) -> bool {
    entry
        .get("expires_at_ms")
        .and_then(|v| v.as_u64())
        .map(|deadline| clock::now_millis() >= deadline)
        .unwrap_or(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::MemoryStore;

    fn cache() -> CacheStore {
        CacheStore::new(Arc::new(MemoryStore::new()), 3600)
    }

    #[tokio::test]
    async fn test_put_get() {
        let cache = cache();
        cache
            .put(CacheTag::Args, "release", json!("epoxy"))
            .await
            .unwrap();
        assert_eq!(
            cache.get(CacheTag::Args, "release").await.unwrap(),
            Some(json!("epoxy"))
        );
        // Tags are isolated
        assert!(cache.get(CacheTag::Envs, "release").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ttl_expiry_is_lazy() {
        let cache = cache();
        cache
            .put_ttl(CacheTag::Args, "gone", json!(1), 0)
            .await
            .unwrap();
        assert!(cache.get(CacheTag::Args, "gone").await.unwrap().is_none());
        // The expired entry was deleted on read
        assert!(cache.get_map(CacheTag::Args).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_map_skips_expired() {
        let cache = cache();
        cache.put(CacheTag::Envs, "KEEP", json!("1")).await.unwrap();
        cache
            .put_ttl(CacheTag::Envs, "DROP", json!("2"), 0)
            .await
            .unwrap();

        let map = cache.get_map(CacheTag::Envs).await.unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("KEEP"), Some(&json!("1")));
    }

    #[tokio::test]
    async fn test_query_accumulates_per_identity() {
        let cache = cache();
        let mut first = Map::new();
        first.insert("node1".to_string(), json!({"release": "epoxy"}));
        cache
            .merge_object(CacheTag::Query, "release", first)
            .await
            .unwrap();

        let mut second = Map::new();
        second.insert("node2".to_string(), json!({"release": "flux"}));
        cache
            .merge_object(CacheTag::Query, "release", second)
            .await
            .unwrap();

        let value = cache.get(CacheTag::Query, "release").await.unwrap().unwrap();
        assert_eq!(value["node1"], json!({"release": "epoxy"}));
        assert_eq!(value["node2"], json!({"release": "flux"}));
    }

    #[tokio::test]
    async fn test_evict_tag() {
        let cache = cache();
        cache.put(CacheTag::Jobs, "sha1", json!(true)).await.unwrap();
        cache.put(CacheTag::Jobs, "sha2", json!(false)).await.unwrap();
        cache.put(CacheTag::Args, "keep", json!(1)).await.unwrap();

        assert_eq!(cache.evict(CacheTag::Jobs).await.unwrap(), 2);
        assert!(cache.get(CacheTag::Jobs, "sha1").await.unwrap().is_none());
        assert!(cache.get(CacheTag::Args, "keep").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_evict_all_clears_every_tag() {
        let cache = cache();
        cache.put(CacheTag::Args, "a", json!(1)).await.unwrap();
        cache.put(CacheTag::Envs, "e", json!(2)).await.unwrap();
        cache.put(CacheTag::Query, "q", json!({})).await.unwrap();
        cache.put(CacheTag::Jobs, "j", json!(3)).await.unwrap();
        cache.put(CacheTag::Parents, "p", json!(4)).await.unwrap();

        assert_eq!(cache.evict_all().await.unwrap(), 5);
        for tag in CacheTag::all() {
            assert!(cache.get_map(tag).await.unwrap().is_empty());
        }
    }

    #[test]
    fn test_tag_parse() {
        assert_eq!("args".parse::<CacheTag>().unwrap(), CacheTag::Args);
        assert_eq!("query".parse::<CacheTag>().unwrap(), CacheTag::Query);
        assert!("bogus".parse::<CacheTag>().is_err());
    }
}
