//! Dispatcher
//!
//! Resolves targets, fans jobs out through one FIFO lane per identity, and
//! enforces the synchronous-parent ordering gate: job *n*+1 of a sync
//! parent does not leave its lane until job *n* is terminal for that
//! identity. Lanes are independent, so one slow identity never stalls the
//! rest of the fleet.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dird_core::clock;
use dird_core::job::{JobRecord, JobSpec, NodeResult};
use dird_core::sha;
use dird_core::types::{Identity, JobState};
use dird_driver::contract::{send_with_retry, ServerDriver};
use dird_driver::RetryPolicy;
use dird_protocol::{Channel, Control, Frame, FramePayload};

use crate::board::JobBoard;
use crate::registry::WorkerRegistry;

/// How long a job may wait for at least one live target
const NO_TARGET_GRACE: Duration = Duration::from_secs(5);

/// Poll interval while inside the target grace window
const TARGET_POLL: Duration = Duration::from_millis(500);

/// Slack added to the client timeout before the server gives up on a node
const NETWORK_SLACK: Duration = Duration::from_secs(5);

struct LaneItem {
    spec: JobSpec,
}

/// Fan-out engine with per-identity lanes
pub struct Dispatcher {
    driver: Arc<dyn ServerDriver>,
    workers: Arc<WorkerRegistry>,
    board: Arc<JobBoard>,
    lanes: DashMap<Identity, mpsc::UnboundedSender<LaneItem>>,
    cancel: CancellationToken,
}

impl Dispatcher {
    /// Create a dispatcher
    pub fn new(
        driver: Arc<dyn ServerDriver>,
        workers: Arc<WorkerRegistry>,
        board: Arc<JobBoard>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            workers,
            board,
            lanes: DashMap::new(),
            cancel,
        }
    }

    /// Consume the submission queue until cancelled
    pub fn spawn(
        self: Arc<Self>,
        mut submit_rx: mpsc::Receiver<JobSpec>,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::debug!("Dispatcher shutting down");
                        break;
                    }
                    submission = submit_rx.recv() => {
                        let Some(spec) = submission else { break };
                        self.dispatch_one(spec).await;
                    }
                }
            }
        })
    }

    /// Resolve targets and enqueue one job
    async fn dispatch_one(&self, mut spec: JobSpec) {
        tracing::debug!(job_id = %spec.job_id, verb = %spec.verb, "Dispatching job");

        let Some(targets) = self.resolve_targets(&mut spec).await else {
            tracing::error!(job_id = %spec.job_id, "No live targets, failing job");
            let mut record = JobRecord::new(&spec, Vec::new());
            record.state = JobState::Failed;
            record.failure_reason = Some("no_targets".to_string());
            self.board.insert(record).await;
            return;
        };

        if matches!(spec.verb.as_str(), "ADD" | "COPY") {
            if let Err(message) = stamp_file_shas(&mut spec).await {
                tracing::error!(job_id = %spec.job_id, "{}", message);
                let mut record = JobRecord::new(&spec, Vec::new());
                record.state = JobState::Failed;
                record.failure_reason = Some(message);
                self.board.insert(record).await;
                return;
            }
        }

        self.board
            .insert(JobRecord::new(&spec, targets.clone()))
            .await;

        let sync_gate = !spec.parent_async && !spec.definition.parent_async_bypass();
        for identity in targets {
            if sync_gate {
                let lane = self.lane(&identity);
                if lane.send(LaneItem { spec: spec.clone() }).is_err() {
                    tracing::warn!("Lane for {} is gone, marking NACKED", identity);
                    self.board
                        .merge_node(&spec.job_id, &identity, nack_result("lane closed"))
                        .await;
                }
            } else {
                // Async parents and bypass callbacks are emitted as soon as
                // they are targeted. They must not queue behind a gated job
                // in the lane: a gated job may be waiting on data a bypass
                // callback delivers.
                let driver = Arc::clone(&self.driver);
                let board = Arc::clone(&self.board);
                let spec = spec.clone();
                tokio::spawn(async move {
                    deliver(driver, board, identity, spec).await;
                });
            }
        }
    }

    /// Resolve the target set, waiting out the grace window when the fleet
    /// is momentarily empty. Returns None once the grace expires.
    async fn resolve_targets(&self, spec: &mut JobSpec) -> Option<Vec<Identity>> {
        let started = clock::now_millis();
        loop {
            let resolved = self.resolve_now(spec);
            if !resolved.is_empty() {
                return Some(self.apply_fanout_rules(spec, resolved));
            }
            if clock::now_millis() - started >= NO_TARGET_GRACE.as_millis() as u64 {
                return None;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return None,
                _ = tokio::time::sleep(TARGET_POLL) => {}
            }
        }
    }

    fn resolve_now(&self, spec: &JobSpec) -> Vec<Identity> {
        let explicit = spec.definition.targets();
        let mut resolved: Vec<Identity> = if explicit.is_empty() {
            self.workers.alive()
        } else {
            let mut known = Vec::new();
            for target in explicit {
                if self.workers.is_alive(&target) {
                    known.push(target);
                } else {
                    tracing::warn!(
                        "Target [ {} ] is unknown or expired; check the name against \
                         the available targets",
                        target
                    );
                }
            }
            known
        };

        let restrict = spec.definition.restrict();
        if !restrict.is_empty() {
            // Restricted-out identities are trivially terminal: they never
            // become targets, so the sync gate skips them.
            resolved.retain(|identity| restrict.contains(identity));
        }
        resolved
    }

    /// QUERY fans out to the whole fleet with its scope recorded on the
    /// definition; `run_once` collapses to the first resolved target.
    fn apply_fanout_rules(&self, spec: &mut JobSpec, resolved: Vec<Identity>) -> Vec<Identity> {
        if spec.verb == "QUERY" && spec.definition.get("query_store").is_none() {
            spec.definition.set(
                "targets",
                serde_json::Value::Array(
                    resolved
                        .iter()
                        .map(|i| serde_json::Value::String(i.to_string()))
                        .collect(),
                ),
            );
            let mut fleet = self.workers.alive();
            let restrict = spec.definition.restrict();
            if !restrict.is_empty() {
                fleet.retain(|identity| restrict.contains(identity));
            }
            return fleet;
        }
        if spec.definition.run_once() {
            return resolved.into_iter().take(1).collect();
        }
        resolved
    }

    fn lane(&self, identity: &Identity) -> mpsc::UnboundedSender<LaneItem> {
        self.lanes
            .entry(identity.clone())
            .or_insert_with(|| {
                let (tx, rx) = mpsc::unbounded_channel();
                tokio::spawn(lane_loop(
                    identity.clone(),
                    rx,
                    Arc::clone(&self.driver),
                    Arc::clone(&self.board),
                    self.cancel.clone(),
                ));
                tx
            })
            .clone()
    }
}

/// One identity's FIFO lane for synchronous parents: send, then hold the
/// lane until the job is terminal for this identity.
async fn lane_loop(
    identity: Identity,
    mut rx: mpsc::UnboundedReceiver<LaneItem>,
    driver: Arc<dyn ServerDriver>,
    board: Arc<JobBoard>,
    cancel: CancellationToken,
) {
    loop {
        let item = tokio::select! {
            _ = cancel.cancelled() => break,
            item = rx.recv() => match item {
                Some(item) => item,
                None => break,
            },
        };
        let job_id = item.spec.job_id;

        if deliver(
            Arc::clone(&driver),
            Arc::clone(&board),
            identity.clone(),
            item.spec,
        )
        .await
        {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = board.wait_terminal(job_id, identity.clone()) => {}
            }
        }
    }
}

/// Hand one job to the transport, recording the transmit time and arming
/// the per-node deadline watchdog. Returns false when the frame was
/// undeliverable (the node is NACKED).
async fn deliver(
    driver: Arc<dyn ServerDriver>,
    board: Arc<JobBoard>,
    identity: Identity,
    spec: JobSpec,
) -> bool {
    let job_id = spec.job_id;
    let frame = job_frame(&spec, &identity);
    match send_with_retry(driver.as_ref(), &identity, frame, RetryPolicy::default()).await {
        Ok(()) => {
            board.mark_transmitted(&job_id, &identity).await;
            spawn_node_watchdog(
                Arc::clone(&board),
                job_id,
                identity,
                Duration::from_secs(spec.definition.timeout_secs()) + NETWORK_SLACK,
            );
            true
        }
        Err(e) => {
            tracing::warn!(
                job_id = %job_id,
                identity = %identity,
                "Dispatch undeliverable: {}",
                e
            );
            board
                .merge_node(&job_id, &identity, nack_result(&e.to_string()))
                .await;
            false
        }
    }
}

/// After the client timeout plus slack, an unreturned node is TIMEDOUT
fn spawn_node_watchdog(board: Arc<JobBoard>, job_id: Uuid, identity: Identity, deadline: Duration) {
    tokio::spawn(async move {
        tokio::time::sleep(deadline).await;
        let expired = board
            .get(&job_id)
            .map(|record| !record.is_terminal_for(&identity))
            .unwrap_or(false);
        if expired {
            tracing::warn!(job_id = %job_id, identity = %identity, "Node deadline expired");
            board
                .merge_node(
                    &job_id,
                    &identity,
                    NodeResult {
                        state: JobState::Timedout,
                        success: Some(false),
                        info: "no return before the server deadline".to_string(),
                        ..NodeResult::pending()
                    },
                )
                .await;
        }
    });
}

fn nack_result(reason: &str) -> NodeResult {
    NodeResult {
        state: JobState::Nacked,
        success: Some(false),
        info: reason.to_string(),
        returned_at_ms: Some(clock::now_millis()),
        ..NodeResult::pending()
    }
}

fn job_frame(spec: &JobSpec, identity: &Identity) -> Frame {
    let mut payload = FramePayload::control(spec.job_id, Control::JobDispatch);
    payload.command = spec.verb.clone();
    payload.identity = identity.to_string();
    payload.job_sha = spec.job_sha.clone();
    payload.data = serde_json::to_vec(spec).unwrap_or_default();
    Frame::new(Channel::Job, payload)
}

/// Fingerprint every source file of an ADD/COPY before fan-out
async fn stamp_file_shas(spec: &mut JobSpec) -> Result<(), String> {
    let sources = spec.definition.get_list("from");
    if sources.is_empty() {
        return Err("file transfer without source files".to_string());
    }
    let mut shas = serde_json::Map::new();
    for path in sources {
        let owned = path.clone();
        let digest = tokio::task::spawn_blocking(move || {
            sha::file_sha(std::path::Path::new(&owned))
        })
        .await
        .map_err(|e| format!("sha task failed: {}", e))?
        .map_err(|e| format!("unreadable source file {}: {}", path, e))?;
        shas.insert(path, serde_json::Value::String(digest));
    }
    spec.definition.set("file_sha", serde_json::Value::Object(shas));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use dird_core::job::JobDefinition;

    fn spec_with(def: JobDefinition, verb: &str) -> JobSpec {
        JobSpec::new(verb, def)
    }

    #[tokio::test]
    async fn test_stamp_file_shas() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("payload.txt");
        tokio::fs::write(&file, b"directord").await.unwrap();

        let mut def = JobDefinition::new();
        def.set("from", json!([file.to_str().unwrap()]));
        def.set("to", json!("/tmp/out"));
        let mut spec = spec_with(def, "COPY");

        stamp_file_shas(&mut spec).await.unwrap();
        let shas = spec.definition.get("file_sha").unwrap().as_object().unwrap();
        assert_eq!(
            shas[file.to_str().unwrap()].as_str().unwrap(),
            dird_core::sha::bytes_sha(b"directord")
        );
    }

    #[tokio::test]
    async fn test_stamp_file_shas_missing_file() {
        let mut def = JobDefinition::new();
        def.set("from", json!(["/definitely/not/here"]));
        let mut spec = spec_with(def, "ADD");
        assert!(stamp_file_shas(&mut spec).await.is_err());
    }

    #[test]
    fn test_job_frame_shape() {
        let mut def = JobDefinition::new();
        def.set("command", json!("echo hi"));
        let spec = spec_with(def, "RUN");
        let frame = job_frame(&spec, &Identity::new("n1"));

        assert_eq!(frame.channel, Channel::Job);
        assert_eq!(frame.payload.control, Control::JobDispatch);
        assert_eq!(frame.payload.command, "RUN");
        assert_eq!(frame.payload.identity, "n1");
        assert_eq!(frame.payload.job_sha, spec.job_sha);

        let decoded: JobSpec = serde_json::from_slice(&frame.payload.data).unwrap();
        assert_eq!(decoded.job_id, spec.job_id);
    }
}
