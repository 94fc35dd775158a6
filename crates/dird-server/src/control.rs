//! Local control socket
//!
//! A UNIX stream socket speaking newline-delimited JSON. The socket file's
//! permissions (0660, optionally group-owned) are the trust boundary for
//! every user-facing operation.

use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio_util::sync::CancellationToken;

use dird_core::rpc::{ControlRequest, ControlResponse, NodeReport, PollStatus};
use dird_core::types::JobState;

use crate::analyze;
use crate::server::ServerState;

/// Control-socket acceptor
pub struct ControlSocket {
    state: Arc<ServerState>,
    cancel: CancellationToken,
}

impl ControlSocket {
    /// Create the acceptor
    pub fn new(state: Arc<ServerState>, cancel: CancellationToken) -> Self {
        Self { state, cancel }
    }

    /// Bind the socket and accept connections until cancelled
    pub async fn run(self) -> anyhow::Result<()> {
        let socket_path = self.state.config.socket_path.clone();
        prepare_socket_path(&socket_path)?;

        let listener = UnixListener::bind(&socket_path)?;
        apply_socket_permissions(&socket_path, self.state.config.socket_group.as_deref())?;
        tracing::info!("Control socket bound at {:?}", socket_path);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::debug!("Control socket shutting down");
                    let _ = std::fs::remove_file(&socket_path);
                    break;
                }
                result = listener.accept() => {
                    match result {
                        Ok((stream, _)) => {
                            let state = Arc::clone(&self.state);
                            tokio::spawn(async move {
                                if let Err(e) = handle_connection(stream, state).await {
                                    tracing::debug!("Control connection ended: {}", e);
                                }
                            });
                        }
                        Err(e) => tracing::error!("Control socket accept failed: {}", e),
                    }
                }
            }
        }
        Ok(())
    }
}

fn prepare_socket_path(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        std::fs::remove_file(path).map_err(|e| {
            anyhow::anyhow!(
                "socket path {:?} already exists and could not be removed: {}",
                path,
                e
            )
        })?;
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

fn apply_socket_permissions(path: &Path, group: Option<&str>) -> anyhow::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o660))?;

    if let Some(group) = group {
        let gid = match group.parse::<u32>() {
            Ok(gid) => nix::unistd::Gid::from_raw(gid),
            Err(_) => nix::unistd::Group::from_name(group)?
                .ok_or_else(|| anyhow::anyhow!("unknown group: {}", group))?
                .gid,
        };
        nix::unistd::chown(path, None, Some(gid))?;
    }
    Ok(())
}

async fn handle_connection(stream: UnixStream, state: Arc<ServerState>) -> anyhow::Result<()> {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();

    while let Some(line) = lines.next_line().await? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<ControlRequest>(&line) {
            Ok(request) => handle_request(&state, request).await,
            Err(e) => ControlResponse::error(format!("malformed request: {}", e)),
        };
        let mut bytes = serde_json::to_vec(&response)?;
        bytes.push(b'\n');
        write_half.write_all(&bytes).await?;
    }
    Ok(())
}

async fn handle_request(state: &ServerState, request: ControlRequest) -> ControlResponse {
    match request {
        ControlRequest::Ping => ControlResponse::Pong,

        ControlRequest::SubmitJobs { jobs } => {
            if jobs.is_empty() {
                return ControlResponse::error("no jobs in submission");
            }
            let mut job_ids = Vec::with_capacity(jobs.len());
            for job in &jobs {
                if !state.components.contains(&job.verb) {
                    return ControlResponse::error(format!("unknown component: {}", job.verb));
                }
            }
            for job in jobs {
                job_ids.push(job.job_id);
                if state.submit_tx.send(job).await.is_err() {
                    return ControlResponse::error("coordinator is shutting down");
                }
            }
            tracing::debug!("Accepted {} job(s) for dispatch", job_ids.len());
            ControlResponse::Accepted { job_ids }
        }

        ControlRequest::ListNodes => {
            let nodes = state
                .workers
                .all()
                .into_iter()
                .map(|record| NodeReport {
                    identity: record.identity.to_string(),
                    alive: record.is_alive(),
                    expiry_secs: record.expiry_secs(),
                    version: record.version.clone(),
                    host_uptime: record.host_uptime.clone(),
                    agent_uptime: record.agent_uptime.clone(),
                    machine_id: record.machine_id.clone(),
                    components: record.components,
                })
                .collect();
            ControlResponse::Nodes { nodes }
        }

        ControlRequest::ListJobs => ControlResponse::Jobs {
            jobs: state.board.list(),
        },

        ControlRequest::JobInfo { job_id } => match state.board.get(&job_id) {
            Some(job) => ControlResponse::Job { job: Box::new(job) },
            None => ControlResponse::error(format!("unknown job: {}", job_id)),
        },

        ControlRequest::PollJob { job_id } => match state.board.get(&job_id) {
            Some(job) => ControlResponse::Poll(poll_status(&job)),
            None => ControlResponse::error(format!("unknown job: {}", job_id)),
        },

        ControlRequest::PurgeJobs => ControlResponse::Purged {
            count: state.board.purge().await,
        },

        ControlRequest::PurgeNodes => ControlResponse::Purged {
            count: state.workers.purge().await,
        },

        ControlRequest::ExportJobs { path } => {
            let jobs = state.board.list();
            let count = jobs.len();
            match serde_json::to_vec_pretty(&jobs) {
                Ok(bytes) => match tokio::fs::write(&path, bytes).await {
                    Ok(()) => ControlResponse::Exported { path, count },
                    Err(e) => ControlResponse::error(format!("export failed: {}", e)),
                },
                Err(e) => ControlResponse::error(format!("export serialization failed: {}", e)),
            }
        }

        ControlRequest::AnalyzeJob { job_id } => match state.board.get(&job_id) {
            Some(job) => ControlResponse::Analysis(analyze::analyze_job(&job)),
            None => ControlResponse::error(format!("unknown job: {}", job_id)),
        },

        ControlRequest::AnalyzeParent { parent_id } => {
            let jobs = state.board.for_parent(&parent_id);
            if jobs.is_empty() {
                return ControlResponse::error(format!("unknown parent: {}", parent_id));
            }
            ControlResponse::Analysis(analyze::analyze_parent(&parent_id.to_string(), &jobs))
        }

        ControlRequest::GenerateKeys => match state.driver.generate_keys() {
            Ok(_) => ControlResponse::Ok,
            Err(e) => ControlResponse::error(e.to_string()),
        },

        // The operation is part of the control surface; no dashboard ships
        // in this build, so it is answered rather than failing to parse.
        ControlRequest::RunUi => {
            ControlResponse::error("unsupported operation: no dashboard in this build")
        }
    }
}

fn poll_status(job: &dird_core::job::JobRecord) -> PollStatus {
    if let Some(reason) = &job.failure_reason {
        return PollStatus {
            done: true,
            success: Some(false),
            info: reason.clone(),
        };
    }
    let done = job.is_terminal();
    let successes = job
        .per_node
        .values()
        .filter(|n| n.success == Some(true))
        .count();
    let info = format!("{}/{} nodes succeeded", successes, job.per_node.len());
    PollStatus {
        done,
        success: done.then_some(job.state == JobState::Succeeded),
        info,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dird_core::clock;
    use dird_core::job::{JobDefinition, JobRecord, JobSpec, NodeResult};
    use dird_core::types::Identity;
    use serde_json::json;

    fn record(targets: &[&str]) -> JobRecord {
        let mut def = JobDefinition::new();
        def.set("command", json!("true"));
        let spec = JobSpec::new("RUN", def);
        JobRecord::new(&spec, targets.iter().map(|t| Identity::new(*t)).collect())
    }

    #[test]
    fn test_poll_status_in_flight() {
        let job = record(&["n1", "n2"]);
        let status = poll_status(&job);
        assert!(!status.done);
        assert!(status.success.is_none());
        assert_eq!(status.info, "0/2 nodes succeeded");
    }

    #[test]
    fn test_poll_status_done() {
        let mut job = record(&["n1"]);
        job.merge_node(
            &Identity::new("n1"),
            NodeResult {
                state: JobState::Succeeded,
                success: Some(true),
                returned_at_ms: Some(clock::now_millis()),
                ..NodeResult::pending()
            },
        );
        let status = poll_status(&job);
        assert!(status.done);
        assert_eq!(status.success, Some(true));
        assert_eq!(status.info, "1/1 nodes succeeded");
    }

    #[test]
    fn test_poll_status_no_targets() {
        let mut job = record(&[]);
        job.state = JobState::Failed;
        job.failure_reason = Some("no_targets".to_string());
        let status = poll_status(&job);
        assert!(status.done);
        assert_eq!(status.success, Some(false));
        assert_eq!(status.info, "no_targets");
    }
}
