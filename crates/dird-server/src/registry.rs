//! Worker registry
//!
//! Tracks every client the server has heard from. Heartbeats refresh the
//! expiry deadline; expired workers stop being dispatch candidates but stay
//! visible until an explicit purge. Records are written through to the
//! datastore so a file-backed server can show history across restarts.

use dashmap::DashMap;
use std::sync::Arc;

use dird_core::clock;
use dird_core::datastore::Datastore;
use dird_core::types::{Identity, WorkerRecord};
use dird_core::wire::HeartbeatData;

/// Identity → worker record table
pub struct WorkerRegistry {
    workers: DashMap<Identity, WorkerRecord>,
    store: Arc<dyn Datastore>,
    expiry_window_secs: u64,
}

impl WorkerRegistry {
    /// Create a registry with the given expiry window (seconds)
    pub fn new(store: Arc<dyn Datastore>, expiry_window_secs: u64) -> Self {
        Self {
            workers: DashMap::new(),
            store,
            expiry_window_secs,
        }
    }

    /// Apply one heartbeat.
    ///
    /// Returns false when the heartbeat was rejected because the identity is
    /// already registered under a different machine id (duplicate host
    /// names in the fleet).
    pub async fn heartbeat(&self, identity: &Identity, data: Option<HeartbeatData>) -> bool {
        let deadline = clock::deadline_millis(self.expiry_window_secs);

        let record = match self.workers.get(identity) {
            Some(existing) => {
                let mut record = existing.clone();
                drop(existing);
                if let Some(data) = data {
                    if !record.machine_id.is_empty()
                        && !data.machine_id.is_empty()
                        && record.machine_id != data.machine_id
                    {
                        tracing::error!(
                            "Worker [ {} ] not updated: duplicate host name with a \
                             different machine id (existing {} != incoming {})",
                            identity,
                            record.machine_id,
                            data.machine_id
                        );
                        return false;
                    }
                    record.version = data.version;
                    record.host_uptime = data.host_uptime;
                    record.agent_uptime = data.agent_uptime;
                    record.machine_id = data.machine_id;
                    record.components = data.components;
                }
                record.expiry_deadline_ms = deadline;
                record
            }
            None => {
                let data = data.unwrap_or_else(|| HeartbeatData {
                    version: String::new(),
                    host_uptime: String::new(),
                    agent_uptime: String::new(),
                    machine_id: String::new(),
                    components: Vec::new(),
                });
                WorkerRecord {
                    identity: identity.clone(),
                    expiry_deadline_ms: deadline,
                    first_seen_ms: clock::now_millis(),
                    version: data.version,
                    host_uptime: data.host_uptime,
                    agent_uptime: data.agent_uptime,
                    machine_id: data.machine_id,
                    components: data.components,
                }
            }
        };

        if let Ok(value) = serde_json::to_value(&record) {
            if let Err(e) = self.store.put(identity.as_str(), value).await {
                tracing::warn!("Worker record persistence failed for {}: {}", identity, e);
            }
        }
        self.workers.insert(identity.clone(), record);
        true
    }

    /// Get one record
    pub fn get(&self, identity: &Identity) -> Option<WorkerRecord> {
        self.workers.get(identity).map(|r| r.clone())
    }

    /// Every known record, dead or alive
    pub fn all(&self) -> Vec<WorkerRecord> {
        let mut records: Vec<WorkerRecord> =
            self.workers.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| a.identity.cmp(&b.identity));
        records
    }

    /// Identities whose expiry deadline is in the future
    pub fn alive(&self) -> Vec<Identity> {
        let mut alive: Vec<Identity> = self
            .workers
            .iter()
            .filter(|r| r.value().is_alive())
            .map(|r| r.key().clone())
            .collect();
        alive.sort();
        alive
    }

    /// Whether one identity is alive
    pub fn is_alive(&self, identity: &Identity) -> bool {
        self.workers
            .get(identity)
            .map(|r| r.is_alive())
            .unwrap_or(false)
    }

    /// Drop every record, returning how many were removed
    pub async fn purge(&self) -> usize {
        let count = self.workers.len();
        self.workers.clear();
        if let Err(e) = self.store.clear().await {
            tracing::warn!("Worker table clear failed: {}", e);
        }
        count
    }

    /// One sweep pass: log identities that crossed their deadline.
    ///
    /// Expired workers are retained for display; only dispatch candidacy is
    /// affected (`alive()` filters on the deadline).
    pub fn sweep(&self) -> Vec<Identity> {
        let now = clock::now_millis();
        let mut evicted = Vec::new();
        for entry in self.workers.iter() {
            let record = entry.value();
            // Report workers that expired within the last sweep period only
            // once by checking a narrow window.
            if record.expiry_deadline_ms <= now
                && now - record.expiry_deadline_ms < 1500
            {
                evicted.push(entry.key().clone());
            }
        }
        for identity in &evicted {
            tracing::warn!("Worker {} expired (no heartbeat)", identity);
        }
        evicted
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dird_core::datastore::MemoryStore;

    fn heartbeat_data(machine_id: &str) -> HeartbeatData {
        HeartbeatData {
            version: "0.1.0".to_string(),
            host_uptime: "100".to_string(),
            agent_uptime: "10".to_string(),
            machine_id: machine_id.to_string(),
            components: vec!["RUN".to_string()],
        }
    }

    fn registry() -> WorkerRegistry {
        WorkerRegistry::new(Arc::new(MemoryStore::new()), 180)
    }

    #[tokio::test]
    async fn test_heartbeat_registers_worker() {
        let registry = registry();
        let node = Identity::new("node1");

        assert!(registry.heartbeat(&node, Some(heartbeat_data("m-1"))).await);
        assert!(registry.is_alive(&node));
        assert_eq!(registry.alive(), vec![node.clone()]);

        let record = registry.get(&node).unwrap();
        assert_eq!(record.version, "0.1.0");
        assert_eq!(record.components, vec!["RUN"]);
    }

    #[tokio::test]
    async fn test_bare_heartbeat_only_refreshes() {
        let registry = registry();
        let node = Identity::new("node1");

        registry.heartbeat(&node, Some(heartbeat_data("m-1"))).await;
        // Transport-level handshake heartbeats carry no data
        registry.heartbeat(&node, None).await;

        let record = registry.get(&node).unwrap();
        assert_eq!(record.version, "0.1.0");
        assert_eq!(record.machine_id, "m-1");
    }

    #[tokio::test]
    async fn test_duplicate_machine_id_rejected() {
        let registry = registry();
        let node = Identity::new("node1");

        assert!(registry.heartbeat(&node, Some(heartbeat_data("m-1"))).await);
        assert!(!registry.heartbeat(&node, Some(heartbeat_data("m-2"))).await);

        // The original registration is untouched
        assert_eq!(registry.get(&node).unwrap().machine_id, "m-1");
    }

    #[tokio::test]
    async fn test_purge_clears_records() {
        let registry = registry();
        registry
            .heartbeat(&Identity::new("node1"), Some(heartbeat_data("m-1")))
            .await;
        registry
            .heartbeat(&Identity::new("node2"), Some(heartbeat_data("m-2")))
            .await;

        assert_eq!(registry.purge().await, 2);
        assert!(registry.all().is_empty());
    }

    #[tokio::test]
    async fn test_expired_worker_not_alive_but_listed() {
        let registry = WorkerRegistry::new(Arc::new(MemoryStore::new()), 0);
        let node = Identity::new("node1");
        registry.heartbeat(&node, Some(heartbeat_data("m-1"))).await;

        assert!(!registry.is_alive(&node));
        assert!(registry.alive().is_empty());
        // Still visible for display
        assert_eq!(registry.all().len(), 1);
    }
}
