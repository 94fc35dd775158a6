//! The job model: definitions, submission specs, and tracked records

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

use crate::clock;
use crate::sha;
use crate::types::{Identity, JobState};

/// Default per-job timeout in seconds
pub const DEFAULT_TIMEOUT_SECS: u64 = 600;

/// A job definition: the verb-specific fields plus the common fields
/// (`timeout`, `skip_cache`, `run_once`, `targets`, `restrict`,
/// `extend_args`, `stdout_arg`, `stderr_arg`, `parent_async_bypass`),
/// all held in one JSON map so the fingerprint and the wire form stay
/// byte-stable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobDefinition(pub Map<String, Value>);

impl JobDefinition {
    /// Create an empty definition
    pub fn new() -> Self {
        Self(Map::new())
    }

    /// Insert a field
    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    /// Get a field
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Get a string field
    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    /// Get a boolean field, defaulting to false
    pub fn get_flag(&self, key: &str) -> bool {
        self.0.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    /// Get a string-list field, defaulting to empty
    pub fn get_list(&self, key: &str) -> Vec<String> {
        self.0
            .get(key)
            .and_then(|v| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(|i| i.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Job timeout in seconds
    pub fn timeout_secs(&self) -> u64 {
        self.0
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS)
    }

    /// Whether the client cache must be bypassed
    pub fn skip_cache(&self) -> bool {
        self.get_flag("skip_cache")
    }

    /// Whether the job is eligible for cache-hit skipping
    pub fn run_once(&self) -> bool {
        self.get_flag("run_once")
    }

    /// Explicit target identities, empty meaning "all alive"
    pub fn targets(&self) -> Vec<Identity> {
        self.get_list("targets").into_iter().map(Identity).collect()
    }

    /// Identity restriction; when non-empty only these identities run the job
    pub fn restrict(&self) -> Vec<Identity> {
        self.get_list("restrict")
            .into_iter()
            .map(Identity)
            .collect()
    }

    /// Argument-cache key that receives trimmed stdout on success
    pub fn stdout_arg(&self) -> Option<&str> {
        self.get_str("stdout_arg")
    }

    /// Argument-cache key that receives trimmed stderr on success
    pub fn stderr_arg(&self) -> Option<&str> {
        self.get_str("stderr_arg")
    }

    /// Extra interpolation variables attached at submission
    pub fn extend_args(&self) -> Option<&Map<String, Value>> {
        self.0.get("extend_args").and_then(|v| v.as_object())
    }

    /// Whether the job bypasses the synchronous-parent ordering gate
    pub fn parent_async_bypass(&self) -> bool {
        self.get_flag("parent_async_bypass")
    }
}

/// An immutable submission unit: one verb invocation bound for fan-out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    /// Unique per fan-out
    pub job_id: Uuid,
    /// The orchestration this job belongs to; equals `job_id` for one-shots
    pub parent_id: Uuid,
    /// Component name, uppercase
    pub verb: String,
    /// Content fingerprint over the canonical definition
    pub job_sha: String,
    /// Verb fields plus common fields
    pub definition: JobDefinition,
    /// Whether the parent orchestration relaxes ordering
    pub parent_async: bool,
}

impl JobSpec {
    /// Build a spec, fingerprinting the definition.
    pub fn new(verb: impl Into<String>, definition: JobDefinition) -> Self {
        let verb = verb.into();
        let job_sha = sha::job_sha(&verb, &definition.0);
        let job_id = Uuid::new_v4();
        Self {
            job_id,
            parent_id: job_id,
            verb,
            job_sha,
            definition,
            parent_async: false,
        }
    }

    /// Attach this spec to an orchestration parent
    pub fn with_parent(mut self, parent_id: Uuid, parent_async: bool) -> Self {
        self.parent_id = parent_id;
        self.parent_async = parent_async;
        self
    }

    /// Recompute the fingerprint after definition edits
    pub fn refresh_sha(&mut self) {
        self.job_sha = sha::job_sha(&self.verb, &self.definition.0);
    }
}

/// Per-identity outcome of a job
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// Per-node state
    pub state: JobState,
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Free-form detail from the component
    pub info: String,
    /// Set once the node reports a terminal outcome
    pub success: Option<bool>,
    /// Wall-clock execution time measured on the client
    pub execution_seconds: Option<f64>,
    /// Dispatch-to-return time measured on the server
    pub roundtrip_seconds: Option<f64>,
    /// When the terminal return arrived (epoch millis)
    pub returned_at_ms: Option<u64>,
}

impl NodeResult {
    /// A fresh pending result
    pub fn pending() -> Self {
        Self {
            state: JobState::Pending,
            stdout: String::new(),
            stderr: String::new(),
            info: String::new(),
            success: None,
            execution_seconds: None,
            roundtrip_seconds: None,
            returned_at_ms: None,
        }
    }
}

/// A tracked job: the spec plus everything learned after dispatch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Unique job id
    pub job_id: Uuid,
    /// Orchestration parent id
    pub parent_id: Uuid,
    /// Component verb
    pub verb: String,
    /// Content fingerprint
    pub job_sha: String,
    /// The submitted definition
    pub definition: JobDefinition,
    /// Whether the parent relaxes ordering
    pub parent_async: bool,
    /// Identities the job was fanned out to
    pub targets: Vec<Identity>,
    /// Submission time (epoch millis)
    pub created_at_ms: u64,
    /// Per-identity transport hand-off times (epoch millis)
    pub transmitted_at_ms: HashMap<Identity, u64>,
    /// Aggregate state over all expected identities
    pub state: JobState,
    /// Per-identity outcomes
    pub per_node: HashMap<Identity, NodeResult>,
    /// Failure annotation for jobs that never dispatched (e.g. no_targets)
    pub failure_reason: Option<String>,
}

impl JobRecord {
    /// Create a record for a spec fanned out to `targets`.
    pub fn new(spec: &JobSpec, targets: Vec<Identity>) -> Self {
        let per_node = targets
            .iter()
            .map(|t| (t.clone(), NodeResult::pending()))
            .collect();
        Self {
            job_id: spec.job_id,
            parent_id: spec.parent_id,
            verb: spec.verb.clone(),
            job_sha: spec.job_sha.clone(),
            definition: spec.definition.clone(),
            parent_async: spec.parent_async,
            targets,
            created_at_ms: clock::now_millis(),
            transmitted_at_ms: HashMap::new(),
            state: JobState::Pending,
            per_node,
            failure_reason: None,
        }
    }

    /// Record the transport hand-off for one identity.
    pub fn mark_transmitted(&mut self, identity: &Identity) {
        self.transmitted_at_ms
            .insert(identity.clone(), clock::now_millis());
        let node = self
            .per_node
            .entry(identity.clone())
            .or_insert_with(NodeResult::pending);
        if node.state.can_transition_to(JobState::Dispatched) {
            node.state = JobState::Dispatched;
        }
        self.refold();
    }

    /// Merge a per-node update, never downgrading a terminal node state.
    ///
    /// Returns true when the update was applied.
    pub fn merge_node(&mut self, identity: &Identity, update: NodeResult) -> bool {
        let node = self
            .per_node
            .entry(identity.clone())
            .or_insert_with(NodeResult::pending);
        if node.state.is_terminal() && !update.state.is_terminal() {
            return false;
        }
        if node.state.is_terminal() && update.state.is_terminal() && node.state != update.state {
            // Conflicting terminal replays keep the first outcome
            return false;
        }
        *node = update;
        self.refold();
        true
    }

    /// True once every expected identity has a terminal result.
    pub fn is_terminal(&self) -> bool {
        !self.per_node.is_empty() && self.per_node.values().all(|n| n.state.is_terminal())
    }

    /// Whether the given identity reached a terminal state.
    pub fn is_terminal_for(&self, identity: &Identity) -> bool {
        self.per_node
            .get(identity)
            .map(|n| n.state.is_terminal())
            .unwrap_or(true)
    }

    /// Recompute the aggregate state from the per-node map.
    ///
    /// Precedence: any failure-like terminal outcome dominates, then
    /// timeouts, then success; non-terminal jobs show the furthest
    /// in-flight stage.
    fn refold(&mut self) {
        if self.per_node.is_empty() {
            return;
        }
        let states: Vec<JobState> = self.per_node.values().map(|n| n.state).collect();
        let next = if states.iter().all(|s| s.is_terminal()) {
            if states
                .iter()
                .any(|s| matches!(s, JobState::Failed | JobState::Nacked))
            {
                JobState::Failed
            } else if states.iter().any(|s| matches!(s, JobState::Timedout)) {
                JobState::Timedout
            } else {
                JobState::Succeeded
            }
        } else if states.iter().any(|s| matches!(s, JobState::Running)) {
            JobState::Running
        } else if states.iter().any(|s| matches!(s, JobState::Dispatched)) {
            JobState::Dispatched
        } else {
            JobState::Pending
        };
        if self.state != next && (self.state.can_transition_to(next) || !self.state.is_terminal()) {
            self.state = next;
        }
    }

    /// Latest terminal return time across identities (epoch millis)
    pub fn last_returned_at_ms(&self) -> Option<u64> {
        self.per_node.values().filter_map(|n| n.returned_at_ms).max()
    }

    /// Identities that have not reached a terminal state yet
    pub fn outstanding(&self) -> Vec<Identity> {
        self.per_node
            .iter()
            .filter(|(_, n)| !n.state.is_terminal())
            .map(|(i, _)| i.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn spec(command: &str) -> JobSpec {
        let mut def = JobDefinition::new();
        def.set("command", json!(command));
        JobSpec::new("RUN", def)
    }

    fn terminal(state: JobState, success: bool) -> NodeResult {
        NodeResult {
            state,
            success: Some(success),
            returned_at_ms: Some(clock::now_millis()),
            ..NodeResult::pending()
        }
    }

    #[test]
    fn test_spec_sha_stability() {
        let a = spec("echo hello");
        let b = spec("echo hello");
        assert_eq!(a.job_sha, b.job_sha);
        assert_ne!(a.job_id, b.job_id);
    }

    #[test]
    fn test_spec_parent_defaults_to_self() {
        let s = spec("true");
        assert_eq!(s.job_id, s.parent_id);
    }

    #[test]
    fn test_definition_accessors() {
        let mut def = JobDefinition::new();
        def.set("timeout", json!(30));
        def.set("run_once", json!(true));
        def.set("targets", json!(["n1", "n2"]));
        def.set("stdout_arg", json!("result"));

        assert_eq!(def.timeout_secs(), 30);
        assert!(def.run_once());
        assert!(!def.skip_cache());
        assert_eq!(def.targets(), vec![Identity::new("n1"), Identity::new("n2")]);
        assert_eq!(def.stdout_arg(), Some("result"));
        assert!(def.restrict().is_empty());
    }

    #[test]
    fn test_definition_timeout_default() {
        assert_eq!(JobDefinition::new().timeout_secs(), DEFAULT_TIMEOUT_SECS);
    }

    #[test]
    fn test_record_fold_all_succeed() {
        let s = spec("true");
        let n1 = Identity::new("n1");
        let n2 = Identity::new("n2");
        let mut record = JobRecord::new(&s, vec![n1.clone(), n2.clone()]);

        record.mark_transmitted(&n1);
        record.mark_transmitted(&n2);
        assert_eq!(record.state, JobState::Dispatched);

        record.merge_node(&n1, terminal(JobState::Succeeded, true));
        assert!(!record.is_terminal());
        record.merge_node(&n2, terminal(JobState::Succeeded, true));
        assert!(record.is_terminal());
        assert_eq!(record.state, JobState::Succeeded);
    }

    #[test]
    fn test_record_fold_failure_dominates() {
        let s = spec("false");
        let n1 = Identity::new("n1");
        let n2 = Identity::new("n2");
        let mut record = JobRecord::new(&s, vec![n1.clone(), n2.clone()]);

        record.merge_node(&n1, terminal(JobState::Succeeded, true));
        record.merge_node(&n2, terminal(JobState::Failed, false));
        assert_eq!(record.state, JobState::Failed);
    }

    #[test]
    fn test_record_fold_timeout_without_failure() {
        let s = spec("sleep 10");
        let n1 = Identity::new("n1");
        let n2 = Identity::new("n2");
        let mut record = JobRecord::new(&s, vec![n1.clone(), n2.clone()]);

        record.merge_node(&n1, terminal(JobState::Succeeded, true));
        record.merge_node(&n2, terminal(JobState::Timedout, false));
        assert_eq!(record.state, JobState::Timedout);
    }

    #[test]
    fn test_merge_never_downgrades_terminal() {
        let s = spec("true");
        let n1 = Identity::new("n1");
        let mut record = JobRecord::new(&s, vec![n1.clone()]);

        assert!(record.merge_node(&n1, terminal(JobState::Succeeded, true)));
        assert_eq!(record.state, JobState::Succeeded);

        // Replayed duplicate with a non-terminal state is rejected
        let mut running = NodeResult::pending();
        running.state = JobState::Running;
        assert!(!record.merge_node(&n1, running));
        assert_eq!(record.state, JobState::Succeeded);

        // Conflicting terminal replay keeps the first outcome
        assert!(!record.merge_node(&n1, terminal(JobState::Failed, false)));
        assert_eq!(record.state, JobState::Succeeded);
    }

    #[test]
    fn test_merge_identical_terminal_replay_applies() {
        let s = spec("true");
        let n1 = Identity::new("n1");
        let mut record = JobRecord::new(&s, vec![n1.clone()]);

        assert!(record.merge_node(&n1, terminal(JobState::Succeeded, true)));
        // Last writer wins on identical outcome
        assert!(record.merge_node(&n1, terminal(JobState::Succeeded, true)));
    }

    #[test]
    fn test_record_serde_roundtrip() {
        let s = spec("echo persisted");
        let n1 = Identity::new("n1");
        let mut record = JobRecord::new(&s, vec![n1.clone()]);
        record.mark_transmitted(&n1);
        record.merge_node(&n1, terminal(JobState::Succeeded, true));

        let value = serde_json::to_value(&record).unwrap();
        let back: JobRecord = serde_json::from_value(value).unwrap();

        assert_eq!(back.job_id, record.job_id);
        assert_eq!(back.job_sha, record.job_sha);
        assert_eq!(back.state, record.state);
        assert_eq!(back.definition, record.definition);
        assert_eq!(
            back.per_node[&n1].success,
            record.per_node[&n1].success
        );
        assert_eq!(back.transmitted_at_ms, record.transmitted_at_ms);
    }

    #[test]
    fn test_outstanding_identities() {
        let s = spec("true");
        let n1 = Identity::new("n1");
        let n2 = Identity::new("n2");
        let mut record = JobRecord::new(&s, vec![n1.clone(), n2.clone()]);

        record.merge_node(&n1, terminal(JobState::Succeeded, true));
        assert_eq!(record.outstanding(), vec![n2]);
    }
}
