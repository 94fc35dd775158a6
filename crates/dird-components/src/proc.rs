//! Child-process execution for shell-backed components
//!
//! Commands run under `/bin/sh -c` with the client's cached environment
//! overlayed. Cancellation sends SIGTERM, waits out a grace period, then
//! kills the process group for good.

use std::process::Stdio;
use std::time::Duration;

use serde_json::Map;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::error::ComponentError;

/// Grace between cooperative cancellation and the hard kill
pub const KILL_GRACE: Duration = Duration::from_secs(5);

/// Result of one shell invocation
#[derive(Debug)]
pub struct ShellResult {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Zero exit status
    pub success: bool,
    /// The process was cancelled before it finished
    pub cancelled: bool,
}

/// Run `command` through the shell, honoring `cancel`.
pub async fn run_shell(
    command: &str,
    envs: &Map<String, serde_json::Value>,
    cancel: &CancellationToken,
) -> Result<ShellResult, ComponentError> {
    let mut cmd = Command::new("/bin/sh");
    cmd.arg("-c")
        .arg(command)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    for (key, value) in envs {
        match value {
            serde_json::Value::String(s) => {
                cmd.env(key, s);
            }
            other => {
                cmd.env(key, other.to_string());
            }
        }
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| ComponentError::Execution(format!("spawn failed: {}", e)))?;

    let mut stdout_pipe = child.stdout.take();
    let mut stderr_pipe = child.stderr.take();

    let mut stdout_buf = Vec::new();
    let mut stderr_buf = Vec::new();

    let status = tokio::select! {
        status = wait_and_drain(&mut child, &mut stdout_pipe, &mut stderr_pipe,
                                &mut stdout_buf, &mut stderr_buf) => status?,
        _ = cancel.cancelled() => {
            kill_graceful(&mut child).await;
            return Ok(ShellResult {
                stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
                stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
                success: false,
                cancelled: true,
            });
        }
    };

    Ok(ShellResult {
        stdout: String::from_utf8_lossy(&stdout_buf).into_owned(),
        stderr: String::from_utf8_lossy(&stderr_buf).into_owned(),
        success: status.success(),
        cancelled: false,
    })
}

async fn wait_and_drain(
    child: &mut Child,
    stdout_pipe: &mut Option<tokio::process::ChildStdout>,
    stderr_pipe: &mut Option<tokio::process::ChildStderr>,
    stdout_buf: &mut Vec<u8>,
    stderr_buf: &mut Vec<u8>,
) -> Result<std::process::ExitStatus, ComponentError> {
    // Drain both pipes concurrently so a full stderr pipe can't wedge the
    // child while we wait on stdout.
    let stdout_read = async {
        if let Some(pipe) = stdout_pipe.as_mut() {
            pipe.read_to_end(stdout_buf).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    let stderr_read = async {
        if let Some(pipe) = stderr_pipe.as_mut() {
            pipe.read_to_end(stderr_buf).await?;
        }
        Ok::<_, std::io::Error>(())
    };
    tokio::try_join!(stdout_read, stderr_read)
        .map_err(|e| ComponentError::Execution(format!("output read failed: {}", e)))?;
    child
        .wait()
        .await
        .map_err(|e| ComponentError::Execution(format!("wait failed: {}", e)))
}

/// SIGTERM first, hard kill after the grace period.
pub async fn kill_graceful(child: &mut Child) {
    #[cfg(target_family = "unix")]
    {
        use nix::sys::signal::{kill, Signal};
        use nix::unistd::Pid;
        if let Some(id) = child.id() {
            let _ = kill(Pid::from_raw(id as i32), Signal::SIGTERM);
            if tokio::time::timeout(KILL_GRACE, child.wait()).await.is_ok() {
                return;
            }
        }
    }
    let _ = child.kill().await;
}
