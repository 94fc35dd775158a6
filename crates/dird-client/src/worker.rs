//! Job ingest, executor loop, and result emitter
//!
//! Ingest is the single consumer of the job channel: it deduplicates,
//! honors `restrict`, acks, and feeds a FIFO. The executor drains the FIFO
//! serially; components that declare `no_block` run on a bounded pool so a
//! long wait (QUERY_WAIT, JOB_WAIT) cannot wedge ordinary jobs. Results go
//! back over the return channel with the bounded retry schedule.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::json;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use dird_components::abi::{TaskContext, TaskOutcome, Transfer};
use dird_components::proc::KILL_GRACE;
use dird_components::Registry;
use dird_core::cache::{CacheStore, CacheTag};
use dird_core::job::JobSpec;
use dird_core::types::Identity;
use dird_core::wire::ReturnData;
use dird_driver::contract::{client_send_with_retry, ClientDriver};
use dird_driver::RetryPolicy;
use dird_protocol::{Channel, Control, Frame, FramePayload};

/// Size of the bounded pool for `no_block` components
const POOL_PERMITS: usize = 4;

/// Everything the executor shares across jobs
pub struct Worker {
    driver: Arc<dyn ClientDriver>,
    identity: Identity,
    registry: Arc<Registry>,
    cache: Arc<CacheStore>,
    transfer: Arc<dyn Transfer>,
    pool: Arc<Semaphore>,
    cancel: CancellationToken,
}

impl Worker {
    /// Create a worker
    pub fn new(
        driver: Arc<dyn ClientDriver>,
        identity: Identity,
        registry: Arc<Registry>,
        cache: Arc<CacheStore>,
        transfer: Arc<dyn Transfer>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            identity,
            registry,
            cache,
            transfer,
            pool: Arc::new(Semaphore::new(POOL_PERMITS)),
            cancel,
        }
    }

    /// Spawn the ingest loop and the executor loop
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();

        let ingest = Arc::clone(&self);
        tokio::spawn(async move { ingest.ingest_loop(queue_tx).await });

        let executor = self;
        tokio::spawn(async move { executor.executor_loop(queue_rx).await })
    }

    /// Single consumer of the job channel
    async fn ingest_loop(&self, queue_tx: mpsc::UnboundedSender<JobSpec>) {
        let mut seen: HashSet<Uuid> = HashSet::new();
        loop {
            let frame = tokio::select! {
                _ = self.cancel.cancelled() => break,
                frame = self.driver.recv(Channel::Job) => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            if frame.payload.control != Control::JobDispatch {
                tracing::warn!(
                    "Unexpected control {:?} on the job channel",
                    frame.payload.control
                );
                continue;
            }

            let spec: JobSpec = match serde_json::from_slice(&frame.payload.data) {
                Ok(spec) => spec,
                Err(e) => {
                    tracing::error!("Undecodable job frame dropped: {}", e);
                    continue;
                }
            };

            // Restricted-out jobs are silently dropped, no result
            let restrict = spec.definition.restrict();
            if !restrict.is_empty() && !restrict.contains(&self.identity) {
                tracing::debug!(job_id = %spec.job_id, "Job restricted away from this identity");
                continue;
            }

            // The job channel may replay; duplicates are re-acked only
            let duplicate = !seen.insert(spec.job_id);
            self.send_control(spec.job_id, Control::JobAck, "task queued")
                .await;
            if duplicate {
                tracing::debug!(job_id = %spec.job_id, "Duplicate dispatch ignored");
                continue;
            }

            tracing::info!(
                job_id = %spec.job_id,
                verb = %spec.verb,
                job_sha = %spec.job_sha,
                "Job received"
            );
            if queue_tx.send(spec).is_err() {
                break;
            }
        }
    }

    /// Serial executor; `no_block` components detach onto the pool
    async fn executor_loop(self: Arc<Self>, mut queue_rx: mpsc::UnboundedReceiver<JobSpec>) {
        loop {
            let spec = tokio::select! {
                _ = self.cancel.cancelled() => break,
                spec = queue_rx.recv() => match spec {
                    Some(spec) => spec,
                    None => break,
                },
            };

            // Async-parent jobs and non-blocking components detach onto the
            // pool; everything else runs on the serial lane.
            let pooled = spec.parent_async
                || self
                    .registry
                    .get(&spec.verb)
                    .map(|component| component.no_block())
                    .unwrap_or(false);

            if pooled {
                let worker = Arc::clone(&self);
                let pool = Arc::clone(&self.pool);
                tokio::spawn(async move {
                    let Ok(_permit) = pool.acquire().await else {
                        return;
                    };
                    worker.execute(spec).await;
                });
            } else {
                self.execute(spec).await;
            }
        }
    }

    /// Run one job end to end and emit its result
    async fn execute(&self, spec: JobSpec) {
        let started = Instant::now();

        let component = match self.registry.get(&spec.verb) {
            Ok(component) => component,
            Err(e) => {
                self.emit_result(
                    &spec,
                    TaskOutcome::failure(e.to_string()),
                    Control::JobFailed,
                    0.0,
                )
                .await;
                return;
            }
        };

        // A failed parent blocks the rest of its orchestration here
        if spec.parent_id != spec.job_id && !self.parent_healthy(&spec).await {
            let info = format!(
                "job was not allowed to run because of a failure under parent [ {} ]",
                spec.parent_id
            );
            tracing::error!(job_id = %spec.job_id, "{}", info);
            self.record_outcome(&spec, false).await;
            self.emit_result(&spec, TaskOutcome::failure(info), Control::JobFailed, 0.0)
                .await;
            return;
        }

        // Cache hit: a previously successful run of the same fingerprint
        if component.cacheable()
            && spec.definition.run_once()
            && !spec.definition.skip_cache()
            && self.cached_success(&spec).await
        {
            tracing::info!(job_id = %spec.job_id, "Cache hit, task skipped");
            self.emit_result(
                &spec,
                TaskOutcome::success("task skipped"),
                Control::JobEnd,
                0.0,
            )
            .await;
            return;
        }

        self.send_control(spec.job_id, Control::JobProcessing, "task started")
            .await;

        let job_cancel = self.cancel.child_token();
        let ctx = TaskContext {
            job: &spec,
            identity: &self.identity,
            cache: &self.cache,
            cancel: job_cancel.clone(),
            transfer: Some(self.transfer.as_ref()),
        };

        let timeout = Duration::from_secs(spec.definition.timeout_secs());
        let run = component.run(&ctx);
        tokio::pin!(run);

        let (mut outcome, control) = tokio::select! {
            result = &mut run => match result {
                Ok(outcome) => {
                    let control = if outcome.success { Control::JobEnd } else { Control::JobFailed };
                    (outcome, control)
                }
                Err(e) => {
                    tracing::error!(job_id = %spec.job_id, "Component error: {}", e);
                    (TaskOutcome::failure(e.to_string()), Control::JobFailed)
                }
            },
            _ = tokio::time::sleep(timeout) => {
                tracing::warn!(job_id = %spec.job_id, "Job timeout after {:?}", timeout);
                job_cancel.cancel();
                // Give the component the grace window to observe the
                // cancellation and reap its child process.
                let outcome = match tokio::time::timeout(KILL_GRACE + Duration::from_secs(1), &mut run).await {
                    Ok(Ok(outcome)) => TaskOutcome {
                        success: false,
                        info: Some("task timed out".to_string()),
                        ..outcome
                    },
                    _ => TaskOutcome::failure("task timed out"),
                };
                (outcome, Control::JobTimeout)
            }
        };

        let execution_seconds = started.elapsed().as_secs_f64();

        if outcome.success {
            self.store_output_args(&spec, &outcome).await;
        }
        self.record_outcome(&spec, outcome.success && control == Control::JobEnd)
            .await;

        let new_tasks = std::mem::take(&mut outcome.new_tasks);
        self.emit_result_with_tasks(&spec, outcome, control, execution_seconds, new_tasks)
            .await;
    }

    async fn parent_healthy(&self, spec: &JobSpec) -> bool {
        match self
            .cache
            .get(CacheTag::Parents, &spec.parent_id.to_string())
            .await
        {
            Ok(Some(outcome)) => outcome
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(true),
            _ => true,
        }
    }

    async fn cached_success(&self, spec: &JobSpec) -> bool {
        match self.cache.get(CacheTag::Jobs, &spec.job_sha).await {
            Ok(Some(outcome)) => outcome
                .get("success")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            _ => false,
        }
    }

    /// `stdout_arg`/`stderr_arg` store trimmed output for later templating
    async fn store_output_args(&self, spec: &JobSpec, outcome: &TaskOutcome) {
        if let Some(arg) = spec.definition.stdout_arg() {
            if !outcome.stdout.is_empty() {
                let value = json!(outcome.stdout.trim_end());
                if let Err(e) = self.cache.put(CacheTag::Args, arg, value).await {
                    tracing::warn!("stdout_arg cache write failed: {}", e);
                }
            }
        }
        if let Some(arg) = spec.definition.stderr_arg() {
            if !outcome.stderr.is_empty() {
                let value = json!(outcome.stderr.trim_end());
                if let Err(e) = self.cache.put(CacheTag::Args, arg, value).await {
                    tracing::warn!("stderr_arg cache write failed: {}", e);
                }
            }
        }
    }

    /// Outcomes are cached regardless of success; only successes enable
    /// cache-hit skipping.
    async fn record_outcome(&self, spec: &JobSpec, success: bool) {
        let value = json!({"success": success});
        if let Err(e) = self.cache.put(CacheTag::Jobs, &spec.job_sha, value.clone()).await {
            tracing::warn!("jobs cache write failed: {}", e);
        }
        if spec.parent_id != spec.job_id {
            if let Err(e) = self
                .cache
                .put(CacheTag::Parents, &spec.parent_id.to_string(), value)
                .await
            {
                tracing::warn!("parents cache write failed: {}", e);
            }
        }
    }

    async fn emit_result(
        &self,
        spec: &JobSpec,
        outcome: TaskOutcome,
        control: Control,
        execution_seconds: f64,
    ) {
        self.emit_result_with_tasks(spec, outcome, control, execution_seconds, Vec::new())
            .await
    }

    async fn emit_result_with_tasks(
        &self,
        spec: &JobSpec,
        outcome: TaskOutcome,
        control: Control,
        execution_seconds: f64,
        new_tasks: Vec<JobSpec>,
    ) {
        let data = ReturnData {
            execution_seconds: Some(execution_seconds),
            new_tasks,
        };
        let mut payload = FramePayload::control(spec.job_id, control);
        payload.identity = self.identity.to_string();
        payload.command = spec.verb.clone();
        payload.job_sha = spec.job_sha.clone();
        payload.stdout = outcome.stdout;
        payload.stderr = outcome.stderr;
        payload.info = outcome.info.unwrap_or_default();
        payload.data = serde_json::to_vec(&data).unwrap_or_default();

        if let Err(e) = client_send_with_retry(
            self.driver.as_ref(),
            Frame::new(Channel::Return, payload),
            RetryPolicy::default(),
        )
        .await
        {
            tracing::error!(job_id = %spec.job_id, "Result undeliverable: {}", e);
        }
    }

    async fn send_control(&self, job_id: Uuid, control: Control, info: &str) {
        let payload = FramePayload::control(job_id, control)
            .with_identity(self.identity.as_str())
            .with_info(info);
        if let Err(e) = self.driver.send(Frame::new(Channel::Return, payload)).await {
            tracing::warn!("Control frame send failed: {}", e);
        }
    }
}
