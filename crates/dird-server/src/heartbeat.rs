//! Heartbeat tracker and expiry sweep

use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use dird_core::wire::HeartbeatData;
use dird_driver::contract::ServerDriver;
use dird_protocol::Channel;

use crate::registry::WorkerRegistry;

/// Reads heartbeat frames and feeds the worker registry
pub struct HeartbeatTracker {
    driver: Arc<dyn ServerDriver>,
    workers: Arc<WorkerRegistry>,
    cancel: CancellationToken,
}

impl HeartbeatTracker {
    /// Create a tracker
    pub fn new(
        driver: Arc<dyn ServerDriver>,
        workers: Arc<WorkerRegistry>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            driver,
            workers,
            cancel,
        }
    }

    /// Consume the heartbeat channel until cancelled
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::debug!("Heartbeat tracker shutting down");
                        break;
                    }
                    delivery = self.driver.recv(Channel::Heartbeat) => match delivery {
                        Some(delivery) => delivery,
                        None => break,
                    },
                };

                let payload = delivery.frame.payload;
                // Transport handshakes send bare heartbeats with no body;
                // those only refresh the expiry deadline.
                let data: Option<HeartbeatData> = if payload.data.is_empty() {
                    None
                } else {
                    match serde_json::from_slice(&payload.data) {
                        Ok(data) => Some(data),
                        Err(e) => {
                            tracing::warn!(
                                "Malformed heartbeat body from {}: {}",
                                delivery.identity,
                                e
                            );
                            None
                        }
                    }
                };

                tracing::debug!("Received heartbeat from [ {} ]", delivery.identity);
                self.workers.heartbeat(&delivery.identity, data).await;
            }
        })
    }
}

/// Once-per-second sweep over the registry.
///
/// Expiry itself is computed lazily from the deadline; the sweep exists to
/// surface transitions in the log promptly.
pub fn spawn_expiry_sweep(
    workers: Arc<WorkerRegistry>,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(Duration::from_secs(1));
        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!("Expiry sweep shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    workers.sweep();
                }
            }
        }
    })
}
