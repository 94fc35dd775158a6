//! Control-socket RPC protocol
//!
//! JSON-encoded, newline-delimited request/response pairs over the server's
//! local UNIX socket. The socket's filesystem permissions are the only trust
//! boundary for these operations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::job::{JobRecord, JobSpec};

/// Control request from the CLI to the server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Submit compiled jobs (an orchestration stream or a one-shot exec)
    SubmitJobs { jobs: Vec<JobSpec> },

    /// List known workers
    ListNodes,

    /// List tracked jobs
    ListJobs,

    /// Full record for one job
    JobInfo { job_id: Uuid },

    /// Completion snapshot for one job
    PollJob { job_id: Uuid },

    /// Drop all tracked jobs
    PurgeJobs,

    /// Drop all worker records
    PurgeNodes,

    /// Write all tracked jobs to a JSON file on the server host
    ExportJobs { path: String },

    /// Profiling aggregate for one job
    AnalyzeJob { job_id: Uuid },

    /// Profiling aggregate across an orchestration
    AnalyzeParent { parent_id: Uuid },

    /// Generate driver key material (driver-specific)
    GenerateKeys,

    /// Launch the read-only dashboard (no dashboard ships in this build)
    RunUi,

    /// Liveness probe
    Ping,
}

/// Control response from the server to the CLI
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ControlResponse {
    /// Jobs were queued for dispatch
    Accepted { job_ids: Vec<Uuid> },

    /// Known workers
    Nodes { nodes: Vec<NodeReport> },

    /// Tracked jobs
    Jobs { jobs: Vec<JobRecord> },

    /// One tracked job
    Job { job: Box<JobRecord> },

    /// Completion snapshot
    Poll(PollStatus),

    /// Profiling aggregate
    Analysis(AnalysisReport),

    /// Export finished
    Exported { path: String, count: usize },

    /// Purge finished
    Purged { count: usize },

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },

    /// Pong response
    Pong,
}

impl ControlResponse {
    /// Build an error response
    pub fn error(message: impl Into<String>) -> Self {
        ControlResponse::Error {
            message: message.into(),
        }
    }
}

/// Worker summary returned by `list_nodes`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeReport {
    /// Client identity
    pub identity: String,
    /// Whether the expiry deadline is in the future
    pub alive: bool,
    /// Seconds until expiry (negative when already expired)
    pub expiry_secs: f64,
    /// Client software version
    pub version: String,
    /// Host uptime as reported
    pub host_uptime: String,
    /// Agent uptime as reported
    pub agent_uptime: String,
    /// Stable machine identifier
    pub machine_id: String,
    /// Advertised component verbs
    pub components: Vec<String>,
}

/// Completion snapshot for `poll_job`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollStatus {
    /// Whether every expected identity reached a terminal state
    pub done: bool,
    /// Aggregate success; None while still in flight
    pub success: Option<bool>,
    /// Human-readable summary line
    pub info: String,
}

/// Profiling aggregate for a job or an orchestration parent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnalysisReport {
    /// Job id or parent id the report describes
    pub subject: String,
    /// max(returned_at) − min(created_at), seconds
    pub actual_runtime: f64,
    /// Sum of per-node execution times, seconds
    pub combined_execution_time: f64,
    /// Mean per-node execution time, seconds
    pub avg_execution_time: f64,
    /// Identity with the smallest execution time
    pub fastest_node_by_execution: Option<String>,
    /// Identity with the largest execution time
    pub slowest_node_by_execution: Option<String>,
    /// Identity with the smallest roundtrip time
    pub fastest_node_by_roundtrip: Option<String>,
    /// Identity with the largest roundtrip time
    pub slowest_node_by_roundtrip: Option<String>,
    /// Number of jobs aggregated
    pub total_jobs: usize,
    /// Number of per-node results aggregated
    pub total_node_count: usize,
    /// Per-node successes
    pub total_successes: usize,
    /// Per-node failures (timeouts included)
    pub total_failures: usize,
}

/// Serialize a control message to JSON bytes (no trailing newline)
pub fn to_bytes<T: Serialize>(message: &T) -> Vec<u8> {
    serde_json::to_vec(message).expect("control message serialization should not fail")
}

/// Deserialize a control message from JSON bytes
pub fn from_bytes<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, serde_json::Error> {
    serde_json::from_slice(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobDefinition;
    use serde_json::json;

    #[test]
    fn test_request_serialization() {
        let req = ControlRequest::JobInfo {
            job_id: Uuid::nil(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("job_info"));

        let decoded: ControlRequest = serde_json::from_str(&json).unwrap();
        match decoded {
            ControlRequest::JobInfo { job_id } => assert_eq!(job_id, Uuid::nil()),
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_submit_roundtrip() {
        let mut def = JobDefinition::new();
        def.set("command", json!("echo hi"));
        let spec = JobSpec::new("RUN", def);
        let req = ControlRequest::SubmitJobs { jobs: vec![spec] };

        let bytes = to_bytes(&req);
        let decoded: ControlRequest = from_bytes(&bytes).unwrap();
        match decoded {
            ControlRequest::SubmitJobs { jobs } => {
                assert_eq!(jobs.len(), 1);
                assert_eq!(jobs[0].verb, "RUN");
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_response_serialization() {
        let resp = ControlResponse::Poll(PollStatus {
            done: true,
            success: Some(true),
            info: "1/1 nodes succeeded".to_string(),
        });
        let json = serde_json::to_string(&resp).unwrap();
        let decoded: ControlResponse = serde_json::from_str(&json).unwrap();
        match decoded {
            ControlResponse::Poll(status) => {
                assert!(status.done);
                assert_eq!(status.success, Some(true));
            }
            _ => panic!("Wrong variant"),
        }
    }

    #[test]
    fn test_parameterless_request_roundtrip() {
        for request in [
            ControlRequest::PurgeJobs,
            ControlRequest::PurgeNodes,
            ControlRequest::GenerateKeys,
            ControlRequest::RunUi,
            ControlRequest::Ping,
        ] {
            let bytes = to_bytes(&request);
            let decoded: ControlRequest = from_bytes(&bytes).unwrap();
            assert_eq!(
                serde_json::to_string(&decoded).unwrap(),
                serde_json::to_string(&request).unwrap()
            );
        }
    }

    #[test]
    fn test_error_helper() {
        match ControlResponse::error("boom") {
            ControlResponse::Error { message } => assert_eq!(message, "boom"),
            _ => panic!("Wrong variant"),
        }
    }
}
