//! Job board
//!
//! The server's view of every tracked job: records with per-node results,
//! write-through persistence, and per `(job, identity)` completion signals
//! the dispatcher lanes wait on for synchronous parents.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::watch;
use uuid::Uuid;

use dird_core::datastore::Datastore;
use dird_core::job::{JobRecord, NodeResult};
use dird_core::types::Identity;

/// Tracked jobs plus completion plumbing
pub struct JobBoard {
    records: DashMap<Uuid, JobRecord>,
    completions: DashMap<(Uuid, Identity), watch::Sender<bool>>,
    store: Arc<dyn Datastore>,
}

impl JobBoard {
    /// Create a board persisting into the given table
    pub fn new(store: Arc<dyn Datastore>) -> Self {
        Self {
            records: DashMap::new(),
            completions: DashMap::new(),
            store,
        }
    }

    /// Insert a fresh record and set up completion slots for its targets
    pub async fn insert(&self, record: JobRecord) {
        for identity in &record.targets {
            self.completions
                .entry((record.job_id, identity.clone()))
                .or_insert_with(|| watch::channel(false).0);
        }
        let job_id = record.job_id;
        self.records.insert(job_id, record);
        self.persist(job_id).await;
    }

    /// Fetch a record clone
    pub fn get(&self, job_id: &Uuid) -> Option<JobRecord> {
        self.records.get(job_id).map(|r| r.clone())
    }

    /// Every record, newest first
    pub fn list(&self) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        records.sort_by(|a, b| b.created_at_ms.cmp(&a.created_at_ms));
        records
    }

    /// Records belonging to one parent
    pub fn for_parent(&self, parent_id: &Uuid) -> Vec<JobRecord> {
        let mut records: Vec<JobRecord> = self
            .records
            .iter()
            .filter(|r| r.value().parent_id == *parent_id)
            .map(|r| r.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at_ms.cmp(&b.created_at_ms));
        records
    }

    /// Mutate a record under its shard lock, then persist it.
    ///
    /// Completion watches fire for every `(job, identity)` that is terminal
    /// after the mutation.
    pub async fn update<F>(&self, job_id: &Uuid, mutate: F) -> Option<JobRecord>
    where
        F: FnOnce(&mut JobRecord),
    {
        let snapshot = {
            let mut entry = self.records.get_mut(job_id)?;
            mutate(entry.value_mut());
            entry.value().clone()
        };

        for (identity, node) in &snapshot.per_node {
            if node.state.is_terminal() {
                if let Some(tx) = self.completions.get(&(*job_id, identity.clone())) {
                    let _ = tx.send(true);
                }
            }
        }
        self.persist(*job_id).await;
        Some(snapshot)
    }

    /// Record the transport hand-off for one identity
    pub async fn mark_transmitted(&self, job_id: &Uuid, identity: &Identity) {
        self.update(job_id, |record| record.mark_transmitted(identity))
            .await;
    }

    /// Merge one node result; returns the refreshed record when applied
    pub async fn merge_node(
        &self,
        job_id: &Uuid,
        identity: &Identity,
        result: NodeResult,
    ) -> Option<JobRecord> {
        self.update(job_id, |record| {
            record.merge_node(identity, result);
        })
        .await
    }

    /// A receiver that flips to true once `(job, identity)` is terminal
    pub fn completion(&self, job_id: Uuid, identity: Identity) -> watch::Receiver<bool> {
        let tx = self
            .completions
            .entry((job_id, identity))
            .or_insert_with(|| watch::channel(false).0);
        tx.subscribe()
    }

    /// Wait until `(job, identity)` is terminal.
    ///
    /// Deadline enforcement lives with the per-job watchdog, so this only
    /// returns early if the board is purged underneath us.
    pub async fn wait_terminal(&self, job_id: Uuid, identity: Identity) {
        if self
            .get(&job_id)
            .map(|record| record.is_terminal_for(&identity))
            .unwrap_or(true)
        {
            return;
        }
        let mut rx = self.completion(job_id, identity);
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                return;
            }
        }
    }

    /// Drop every record, returning how many were removed
    pub async fn purge(&self) -> usize {
        let count = self.records.len();
        self.records.clear();
        // Release any lane still gated on a purged job
        for entry in self.completions.iter() {
            let _ = entry.value().send(true);
        }
        self.completions.clear();
        if let Err(e) = self.store.clear().await {
            tracing::warn!("Job table clear failed: {}", e);
        }
        count
    }

    async fn persist(&self, job_id: Uuid) {
        let Some(record) = self.get(&job_id) else {
            return;
        };
        match serde_json::to_value(&record) {
            Ok(value) => {
                if let Err(e) = self.store.put(&job_id.to_string(), value).await {
                    tracing::warn!("Job record persistence failed for {}: {}", job_id, e);
                }
            }
            Err(e) => tracing::warn!("Job record serialization failed for {}: {}", job_id, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dird_core::clock;
    use dird_core::datastore::MemoryStore;
    use dird_core::job::{JobDefinition, JobSpec};
    use dird_core::types::JobState;
    use serde_json::json;

    fn board() -> JobBoard {
        JobBoard::new(Arc::new(MemoryStore::new()))
    }

    fn record(targets: &[&str]) -> JobRecord {
        let mut def = JobDefinition::new();
        def.set("command", json!("true"));
        let spec = JobSpec::new("RUN", def);
        JobRecord::new(&spec, targets.iter().map(|t| Identity::new(*t)).collect())
    }

    fn success() -> NodeResult {
        NodeResult {
            state: JobState::Succeeded,
            success: Some(true),
            returned_at_ms: Some(clock::now_millis()),
            ..NodeResult::pending()
        }
    }

    #[tokio::test]
    async fn test_insert_and_list() {
        let board = board();
        let r = record(&["n1"]);
        let id = r.job_id;
        board.insert(r).await;

        assert!(board.get(&id).is_some());
        assert_eq!(board.list().len(), 1);
    }

    #[tokio::test]
    async fn test_completion_watch_fires_on_terminal() {
        let board = Arc::new(board());
        let r = record(&["n1"]);
        let id = r.job_id;
        board.insert(r).await;

        let waiter = {
            let board = Arc::clone(&board);
            tokio::spawn(async move {
                board.wait_terminal(id, Identity::new("n1")).await;
            })
        };

        board.merge_node(&id, &Identity::new("n1"), success()).await;
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("completion watch should fire")
            .unwrap();
    }

    #[tokio::test]
    async fn test_wait_terminal_returns_for_unknown_job() {
        let board = board();
        // A purged or never-created job never blocks a lane
        board.wait_terminal(Uuid::new_v4(), Identity::new("n1")).await;
    }

    #[tokio::test]
    async fn test_purge_unblocks_waiters() {
        let board = Arc::new(board());
        let r = record(&["n1"]);
        let id = r.job_id;
        board.insert(r).await;

        let waiter = {
            let board = Arc::clone(&board);
            tokio::spawn(async move {
                board.wait_terminal(id, Identity::new("n1")).await;
            })
        };
        tokio::task::yield_now().await;

        assert_eq!(board.purge().await, 1);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .expect("purge should unblock waiters")
            .unwrap();
        assert!(board.list().is_empty());
    }

    #[tokio::test]
    async fn test_for_parent_filters() {
        let board = board();
        let a = record(&["n1"]);
        let parent = a.parent_id;
        let b = record(&["n1"]);
        board.insert(a).await;
        board.insert(b).await;

        assert_eq!(board.for_parent(&parent).len(), 1);
    }
}
