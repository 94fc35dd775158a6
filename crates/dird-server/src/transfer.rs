//! Transfer responder
//!
//! Serves file chunks to clients over the transfer channel. Requests carry
//! a path, an offset, and a chunk size; the final chunk is flagged so the
//! client knows when the file is complete.

use std::io::SeekFrom;
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::sync::CancellationToken;

use dird_core::wire::TransferRequestData;
use dird_driver::contract::ServerDriver;
use dird_protocol::{Channel, Control, Frame, FramePayload};

/// Transfer-channel worker
pub struct TransferResponder {
    driver: Arc<dyn ServerDriver>,
    cancel: CancellationToken,
}

impl TransferResponder {
    /// Create a responder
    pub fn new(driver: Arc<dyn ServerDriver>, cancel: CancellationToken) -> Self {
        Self { driver, cancel }
    }

    /// Consume the transfer channel until cancelled
    pub fn spawn(self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                let delivery = tokio::select! {
                    _ = self.cancel.cancelled() => {
                        tracing::debug!("Transfer responder shutting down");
                        break;
                    }
                    delivery = self.driver.recv(Channel::Transfer) => match delivery {
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

        if payload.control != Control::TransferRequest {
            tracing::warn!(
                "Unexpected control {:?} on the transfer channel from {}",
                payload.control,
                identity
            );
            return;
        }

        let request: TransferRequestData = match serde_json::from_slice(&payload.data) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("Malformed transfer request from {}: {}", identity, e);
                self.reply(
                    &identity,
                    FramePayload::control(payload.message_id, Control::TransferFailed)
                        .with_info(format!("malformed request: {}", e)),
                )
                .await;
                return;
            }
        };

        tracing::debug!(
            "Identity [ {} ] job [ {} ] requests [ {} ] at offset {}",
            identity,
            payload.message_id,
            request.path,
            request.offset
        );

        let chunk = match read_chunk(&request).await {
            Ok(chunk) => chunk,
            Err(e) => {
                tracing::error!(
                    "Identity [ {} ] job [ {} ] file [ {} ] unreadable: {}",
                    identity,
                    payload.message_id,
                    request.path,
                    e
                );
                self.reply(
                    &identity,
                    FramePayload::control(payload.message_id, Control::TransferFailed)
                        .with_info(format!("file [ {} ] was not readable: {}", request.path, e)),
                )
                .await;
                return;
            }
        };

        let control = if chunk.len() < request.chunk_size as usize {
            Control::TransferEnd
        } else {
            Control::TransferChunk
        };
        self.reply(
            &identity,
            FramePayload::control(payload.message_id, control).with_data(chunk),
        )
        .await;
    }

    async fn reply(&self, identity: &dird_core::types::Identity, payload: FramePayload) {
        if let Err(e) = self
            .driver
            .send(identity, Frame::new(Channel::Transfer, payload))
            .await
        {
            tracing::warn!("Transfer reply to {} failed: {}", identity, e);
        }
    }
}

async fn read_chunk(request: &TransferRequestData) -> std::io::Result<Vec<u8>> {
    let mut file = tokio::fs::File::open(&request.path).await?;
    file.seek(SeekFrom::Start(request.offset)).await?;
    let mut buf = vec![0u8; request.chunk_size as usize];
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    buf.truncate(filled);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_read_chunk_with_offset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"0123456789").await.unwrap();

        let chunk = read_chunk(&TransferRequestData {
            path: path.to_str().unwrap().to_string(),
            offset: 4,
            chunk_size: 3,
        })
        .await
        .unwrap();
        assert_eq!(chunk, b"456");
    }

    #[tokio::test]
    async fn test_read_chunk_short_final_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("data.bin");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let chunk = read_chunk(&TransferRequestData {
            path: path.to_str().unwrap().to_string(),
            offset: 0,
            chunk_size: 1024,
        })
        .await
        .unwrap();
        // Short read marks the final chunk
        assert_eq!(chunk, b"abc");
        assert!(chunk.len() < 1024);
    }

    #[tokio::test]
    async fn test_read_chunk_missing_file() {
        let result = read_chunk(&TransferRequestData {
            path: "/definitely/not/here".to_string(),
            offset: 0,
            chunk_size: 16,
        })
        .await;
        assert!(result.is_err());
    }
}
