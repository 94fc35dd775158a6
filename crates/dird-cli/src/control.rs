//! Control-socket client
//!
//! One newline-delimited JSON request/response per call, reconnecting per
//! request like any short-lived CLI.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use uuid::Uuid;

use dird_core::job::JobSpec;
use dird_core::rpc::{ControlRequest, ControlResponse, PollStatus};

/// Client for the server's local control socket
pub struct ControlClient {
    socket_path: PathBuf,
}

impl ControlClient {
    /// Create a client for the given socket path
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// The socket path this client talks to
    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Issue one request and await its response
    pub async fn request(&self, request: &ControlRequest) -> Result<ControlResponse> {
        let stream = UnixStream::connect(&self.socket_path)
            .await
            .with_context(|| {
                format!(
                    "Failed to connect to the server socket at {:?}. Is the server running?",
                    self.socket_path
                )
            })?;
        let (read_half, mut write_half) = stream.into_split();

        let mut bytes = serde_json::to_vec(request)?;
        bytes.push(b'\n');
        write_half.write_all(&bytes).await?;

        let mut line = String::new();
        let mut reader = BufReader::new(read_half);
        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            anyhow::bail!("server closed the connection without answering");
        }
        Ok(serde_json::from_str(&line)?)
    }

    /// Submit compiled jobs, returning their ids
    pub async fn submit(&self, jobs: Vec<JobSpec>) -> Result<Vec<Uuid>> {
        match self.request(&ControlRequest::SubmitJobs { jobs }).await? {
            ControlResponse::Accepted { job_ids } => Ok(job_ids),
            ControlResponse::Error { message } => anyhow::bail!("{}", message),
            other => anyhow::bail!("Unexpected response: {:?}", other),
        }
    }

    /// Poll one job until it is done or `timeout` passes
    pub async fn poll_job(&self, job_id: Uuid, timeout: Duration) -> Result<PollStatus> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let status = match self.request(&ControlRequest::PollJob { job_id }).await? {
                ControlResponse::Poll(status) => status,
                ControlResponse::Error { message } => anyhow::bail!("{}", message),
                other => anyhow::bail!("Unexpected response: {:?}", other),
            };
            if status.done {
                return Ok(status);
            }
            if tokio::time::Instant::now() >= deadline {
                anyhow::bail!("timed out waiting for job {}", job_id);
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }
}
