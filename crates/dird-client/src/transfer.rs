//! Client side of the transfer channel
//!
//! Pulls a server-side file chunk by chunk. Fetches are serialized behind a
//! mutex because the transfer channel carries one stream of replies.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use uuid::Uuid;

use dird_components::abi::Transfer;
use dird_components::ComponentError;
use dird_core::wire::{TransferRequestData, TRANSFER_CHUNK_SIZE};
use dird_driver::contract::ClientDriver;
use dird_protocol::{Channel, Control, Frame, FramePayload};

/// How long to wait for each chunk reply
const CHUNK_TIMEOUT: Duration = Duration::from_secs(30);

/// Transfer-channel client
pub struct ClientTransfer {
    driver: Arc<dyn ClientDriver>,
    identity: String,
    lock: Mutex<()>,
}

impl ClientTransfer {
    /// Create a transfer client
    pub fn new(driver: Arc<dyn ClientDriver>, identity: String) -> Self {
        Self {
            driver,
            identity,
            lock: Mutex::new(()),
        }
    }
}

#[async_trait]
impl Transfer for ClientTransfer {
    async fn fetch(&self, job_id: Uuid, path: &str) -> Result<Vec<u8>, ComponentError> {
        let _guard = self.lock.lock().await;
        let mut contents = Vec::new();
        let mut offset = 0u64;

        loop {
            let request = TransferRequestData {
                path: path.to_string(),
                offset,
                chunk_size: TRANSFER_CHUNK_SIZE,
            };
            let payload = FramePayload::control(job_id, Control::TransferRequest)
                .with_identity(self.identity.as_str())
                .with_data(serde_json::to_vec(&request).map_err(|e| {
                    ComponentError::Transfer(format!("request encoding failed: {}", e))
                })?);

            self.driver
                .send(Frame::new(Channel::Transfer, payload))
                .await
                .map_err(|e| ComponentError::Transfer(format!("request send failed: {}", e)))?;

            let reply = loop {
                let frame =
                    tokio::time::timeout(CHUNK_TIMEOUT, self.driver.recv(Channel::Transfer))
                        .await
                        .map_err(|_| {
                            ComponentError::Transfer(format!(
                                "timed out waiting for a chunk of {}",
                                path
                            ))
                        })?
                        .ok_or_else(|| {
                            ComponentError::Transfer("transfer channel closed".to_string())
                        })?;
                // Replies for other jobs cannot appear while the lock is
                // held, but a stale frame from an abandoned fetch can.
                if frame.payload.message_id == job_id {
                    break frame;
                }
                tracing::debug!("Discarding stale transfer frame");
            };

            match reply.payload.control {
                Control::TransferChunk => {
                    offset += reply.payload.data.len() as u64;
                    contents.extend_from_slice(&reply.payload.data);
                }
                Control::TransferEnd => {
                    contents.extend_from_slice(&reply.payload.data);
                    return Ok(contents);
                }
                Control::TransferFailed => {
                    return Err(ComponentError::Transfer(reply.payload.info));
                }
                other => {
                    return Err(ComponentError::Transfer(format!(
                        "unexpected control {:?} on the transfer channel",
                        other
                    )));
                }
            }
        }
    }
}
