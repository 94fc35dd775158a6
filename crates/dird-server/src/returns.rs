//! Return manager
//!
//! Single consumer of the return channel. Folds acks, progress notes, and
//! terminal results into the job board (idempotently, keyed by
//! `(job_id, identity)`), measures roundtrips against the recorded
//! transmit time, and resubmits callback jobs produced by components.

use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use dird_core::clock;
use dird_core::job::{JobSpec, NodeResult};
use dird_core::types::JobState;
use dird_core::wire::ReturnData;
use dird_driver::contract::ServerDriver;
use dird_protocol::{Channel, Control};

use crate::board::JobBoard;

/// Return-channel worker
pub struct ReturnManager {
    driver: Arc<dyn ServerDriver>,
    board: Arc<JobBoard>,
    submit_tx: mpsc::Sender<JobSpec>,
    cancel: CancellationToken,
}

impl ReturnManager {
    /// Create a return manager
    pub fn new(
        driver: Arc<dyn ServerDriver>,
        board: Arc<JobBoard>,
        submit_tx: mpsc::Sender<JobSpec>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            board,
            submit_tx,
            cancel,
        }
    }

    /// Read the return channel until cancelled
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::debug!("Return manager shutting down");
                        break;
                    }
                    delivery = self.driver.recv(Channel::Return) => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };
                self.handle(delivery).await;
            }
        })
    }

    async fn handle(&self, delivery: dird_driver::Delivery) {
        let identity = delivery.identity;
        let payload = delivery.frame.payload;
        let job_id = payload.message_id;

        tracing::debug!(
            job_id = %job_id,
            identity = %identity,
            control = ?payload.control,
            "Return frame received"
        );

        match payload.control {
            Control::JobAck => {
                self.board
                    .update(&job_id, |record| {
                        if let Some(node) = record.per_node.get_mut(&identity) {
                            if node.state.can_transition_to(JobState::Dispatched) {
                                node.state = JobState::Dispatched;
                            }
                        }
                    })
                    .await;
            }

            Control::JobProcessing => {
                self.board
                    .update(&job_id, |record| {
                        if let Some(node) = record.per_node.get_mut(&identity) {
                            if node.state.can_transition_to(JobState::Running) {
                                node.state = JobState::Running;
                            }
                        }
                    })
                    .await;
            }

            Control::JobEnd | Control::JobFailed | Control::JobTimeout | Control::Nack => {
                let data: ReturnData =
                    serde_json::from_slice(&payload.data).unwrap_or_default();

                let state = match payload.control {
                    Control::JobEnd => JobState::Succeeded,
                    Control::JobTimeout => JobState::Timedout,
                    Control::Nack => JobState::Nacked,
                    _ => JobState::Failed,
                };
                let now = clock::now_millis();
                let roundtrip = self
                    .board
                    .get(&job_id)
                    .and_then(|record| record.transmitted_at_ms.get(&identity).copied())
                    .map(|transmitted| clock::secs_between(transmitted, now));

                let result = NodeResult {
                    state,
                    stdout: payload.stdout,
                    stderr: payload.stderr,
                    info: payload.info,
                    success: Some(state == JobState::Succeeded),
                    execution_seconds: data.execution_seconds,
                    roundtrip_seconds: roundtrip,
                    returned_at_ms: Some(now),
                };

                if self.board.merge_node(&job_id, &identity, result).await.is_none() {
                    tracing::warn!(
                        job_id = %job_id,
                        identity = %identity,
                        "Return for unknown job ignored"
                    );
                }

                for task in data.new_tasks {
                    self.submit_callback(task).await;
                }
            }

            other => {
                tracing::warn!(
                    job_id = %job_id,
                    identity = %identity,
                    "Unexpected control {:?} on the return channel",
                    other
                );
            }
        }
    }

    /// Callback jobs re-enter the coordinator with the async gate bypassed
    async fn submit_callback(&self, mut task: JobSpec) {
        task.definition
            .set("parent_async_bypass", serde_json::Value::Bool(true));
        tracing::debug!(job_id = %task.job_id, verb = %task.verb, "Callback job submitted");
        if self.submit_tx.send(task).await.is_err() {
            tracing::warn!("Submission queue closed, callback job dropped");
        }
    }
}
