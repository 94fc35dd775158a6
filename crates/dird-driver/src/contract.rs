//! The driver contract
//!
//! The coordinator and the worker depend only on these traits. Delivery on
//! the return channel is at-least-once (duplicates are merged downstream);
//! the heartbeat channel is best-effort and lossy.

use async_trait::async_trait;

use dird_core::types::Identity;
use dird_protocol::{Channel, Frame};

use crate::backoff::RetryPolicy;
use crate::error::DriverError;

/// A frame received from a peer, attributed to its identity
#[derive(Debug)]
pub struct Delivery {
    /// The sending client (server side) or the server's addressee echo
    pub identity: Identity,
    /// The received frame
    pub frame: Frame,
}

/// Server side of a transport: many identified clients, one bind point
#[async_trait]
pub trait ServerDriver: Send + Sync {
    /// Bind the transport and start accepting connections
    async fn bind(&self) -> Result<(), DriverError>;

    /// Send a frame to one identity
    async fn send(&self, identity: &Identity, frame: Frame) -> Result<(), DriverError>;

    /// Receive the next frame on a channel.
    ///
    /// Each channel has a single logical consumer. Returns None once the
    /// driver is closed and the channel is drained.
    async fn recv(&self, channel: Channel) -> Option<Delivery>;

    /// Identities with a live connection right now
    fn connected(&self) -> Vec<Identity>;

    /// Generate driver key material, when the transport carries any
    fn generate_keys(&self) -> Result<String, DriverError> {
        Err(DriverError::Unsupported("key generation"))
    }

    /// Stop accepting and tear down every connection
    fn close(&self);
}

/// Client side of a transport: one connection to the server
#[async_trait]
pub trait ClientDriver: Send + Sync {
    /// Start the connection supervisor (reconnects with backoff)
    async fn connect(&self) -> Result<(), DriverError>;

    /// Send a frame to the server
    async fn send(&self, frame: Frame) -> Result<(), DriverError>;

    /// Receive the next frame on a channel; None once the driver is closed
    async fn recv(&self, channel: Channel) -> Option<Frame>;

    /// Tear down the connection
    fn close(&self);
}

/// Send through a server driver with the bounded per-frame retry schedule.
///
/// Transient transport errors are retried; after `policy.max_attempts`
/// failures the frame is declared undeliverable so the caller can surface a
/// NACK.
pub async fn send_with_retry(
    driver: &dyn ServerDriver,
    identity: &Identity,
    frame: Frame,
    policy: RetryPolicy,
) -> Result<(), DriverError> {
    let mut attempt = 0;
    loop {
        match driver.send(identity, frame.clone()).await {
            Ok(()) => return Ok(()),
            Err(DriverError::Closed) => return Err(DriverError::Closed),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    tracing::warn!(
                        identity = %identity,
                        attempts = attempt,
                        "Frame undeliverable: {}",
                        e
                    );
                    return Err(DriverError::Undeliverable { attempts: attempt });
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::debug!(
                    identity = %identity,
                    attempt,
                    "Send failed ({}), retrying in {:?}",
                    e,
                    delay
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Send through a client driver with the bounded per-frame retry schedule.
pub async fn client_send_with_retry(
    driver: &dyn ClientDriver,
    frame: Frame,
    policy: RetryPolicy,
) -> Result<(), DriverError> {
    let mut attempt = 0;
    loop {
        match driver.send(frame.clone()).await {
            Ok(()) => return Ok(()),
            Err(DriverError::Closed) => return Err(DriverError::Closed),
            Err(e) => {
                attempt += 1;
                if attempt >= policy.max_attempts {
                    return Err(DriverError::Undeliverable { attempts: attempt });
                }
                let delay = policy.delay_for(attempt - 1);
                tracing::debug!(attempt, "Send failed ({}), retrying in {:?}", e, delay);
                tokio::time::sleep(delay).await;
            }
        }
    }
}
