//! The component ABI
//!
//! One implementation per verb. Components declare their argument surface
//! (`spec`), normalize submissions on the server/CLI side (`normalize`), and
//! execute on the client side (`run`). Execution gets a `TaskContext` with
//! the job, the client cache, a cancellation token honored on timeout, and
//! the transfer-channel handle for file pulls.

use async_trait::async_trait;
use serde_json::Map;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dird_core::cache::CacheStore;
use dird_core::job::{JobDefinition, JobSpec};
use dird_core::types::Identity;

use crate::argspec::{ArgSpec, BoundArgs};
use crate::error::ComponentError;

/// File pulls over the transfer channel, implemented by the worker
#[async_trait]
pub trait Transfer: Send + Sync {
    /// Fetch the full contents of a server-side file
    async fn fetch(&self, job_id: Uuid, path: &str) -> Result<Vec<u8>, ComponentError>;
}

/// Everything a component sees while executing one job
pub struct TaskContext<'a> {
    /// The job being executed
    pub job: &'a JobSpec,
    /// This client's identity
    pub identity: &'a Identity,
    /// Client-local tagged cache
    pub cache: &'a CacheStore,
    /// Cancelled when the job times out or the worker shuts down
    pub cancel: CancellationToken,
    /// Transfer-channel handle; absent in offline test harnesses
    pub transfer: Option<&'a dyn Transfer>,
}

impl TaskContext<'_> {
    /// Snapshot of the args cache for blueprint rendering
    pub async fn args_map(
        &self,
    ) -> Result<Map<String, serde_json::Value>, ComponentError> {
        let mut args = self.cache.get_map(dird_core::cache::CacheTag::Args).await?;
        // Submission-time extension variables overlay the cached ones
        if let Some(extend) = self.job.definition.extend_args() {
            for (k, v) in extend {
                args.insert(k.clone(), v.clone());
            }
        }
        Ok(args)
    }
}

/// Outcome of one component execution on one client
#[derive(Debug, Clone, Default)]
pub struct TaskOutcome {
    /// Captured standard output
    pub stdout: String,
    /// Captured standard error
    pub stderr: String,
    /// Whether the execution succeeded
    pub success: bool,
    /// Free-form detail line for operators
    pub info: Option<String>,
    /// Callback jobs to submit through the server
    pub new_tasks: Vec<JobSpec>,
}

impl TaskOutcome {
    /// Successful outcome with an info line
    pub fn success(info: impl Into<String>) -> Self {
        Self {
            success: true,
            info: Some(info.into()),
            ..Self::default()
        }
    }

    /// Failed outcome with an info line
    pub fn failure(info: impl Into<String>) -> Self {
        Self {
            success: false,
            info: Some(info.into()),
            ..Self::default()
        }
    }

    /// Attach stdout
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }
}

/// A named unit of work
#[async_trait]
pub trait Component: Send + Sync {
    /// The verb, uppercase
    fn name(&self) -> &'static str;

    /// Argument surface for DSL binding (include `ArgSpec::common()`)
    fn spec(&self) -> ArgSpec;

    /// Server-side normalization: move bound arguments into the definition,
    /// rejecting malformed submissions.
    fn normalize(
        &self,
        bound: &BoundArgs,
        definition: &mut JobDefinition,
    ) -> Result<(), ComponentError>;

    /// Client-side execution
    async fn run(&self, ctx: &TaskContext<'_>) -> Result<TaskOutcome, ComponentError>;

    /// Whether outcomes participate in cache-hit skipping
    fn cacheable(&self) -> bool {
        true
    }

    /// Whether the executor may run this component on the bounded pool
    /// instead of the serial lane
    fn no_block(&self) -> bool {
        false
    }
}

/// Copy the common bound flags into a definition.
///
/// Shared by every component's `normalize`.
pub fn apply_common_fields(bound: &BoundArgs, definition: &mut JobDefinition) {
    for key in ["skip_cache", "run_once", "timeout", "stdout_arg", "stderr_arg"] {
        if let Some(value) = bound.values.get(key) {
            definition.set(key, value.clone());
        }
    }
}
