//! Channel tags, control codes, and the frame payload

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Protocol version. Frames are stable within a major version.
pub const PROTOCOL_VERSION: u8 = 1;

/// Logical channel a frame travels on.
///
/// Channels have independent in-flight queues. Within a single
/// `(identity, channel)` pair order is preserved; across identities there is
/// no ordering guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Channel {
    /// Liveness reporting (best-effort, lossy)
    Heartbeat = 0x01,
    /// Job dispatch, server → client
    Job = 0x02,
    /// Bulk byte transfer (file chunks)
    Transfer = 0x03,
    /// Job results, client → server (at-least-once)
    Return = 0x04,
}

impl Channel {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Heartbeat),
            0x02 => Some(Self::Job),
            0x03 => Some(Self::Transfer),
            0x04 => Some(Self::Return),
            _ => None,
        }
    }

    /// All channels, in tag order
    pub fn all() -> [Channel; 4] {
        [
            Channel::Heartbeat,
            Channel::Job,
            Channel::Transfer,
            Channel::Return,
        ]
    }
}

/// Control code carried by every frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum Control {
    /// Client liveness report
    HeartbeatNotice = 0x01,
    /// Server → client job hand-off
    JobDispatch = 0x10,
    /// Client accepted a job onto its queue
    JobAck = 0x11,
    /// Client started executing a job
    JobProcessing = 0x12,
    /// Job finished successfully
    JobEnd = 0x13,
    /// Job finished unsuccessfully
    JobFailed = 0x14,
    /// Job exceeded its timeout on the client
    JobTimeout = 0x15,
    /// Frame could not be delivered after retry exhaustion
    Nack = 0x16,
    /// Client asks the server for a file chunk
    TransferRequest = 0x20,
    /// Server file chunk, more to follow
    TransferChunk = 0x21,
    /// Server file chunk, final
    TransferEnd = 0x22,
    /// Server could not serve the requested file
    TransferFailed = 0x23,
}

impl Control {
    /// Convert to u8
    pub fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::HeartbeatNotice),
            0x10 => Some(Self::JobDispatch),
            0x11 => Some(Self::JobAck),
            0x12 => Some(Self::JobProcessing),
            0x13 => Some(Self::JobEnd),
            0x14 => Some(Self::JobFailed),
            0x15 => Some(Self::JobTimeout),
            0x16 => Some(Self::Nack),
            0x20 => Some(Self::TransferRequest),
            0x21 => Some(Self::TransferChunk),
            0x22 => Some(Self::TransferEnd),
            0x23 => Some(Self::TransferFailed),
            _ => None,
        }
    }

    /// True for the controls that settle a job on the return channel
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Control::JobEnd | Control::JobFailed | Control::JobTimeout | Control::Nack
        )
    }
}

/// The payload of a frame.
///
/// Every field except `message_id` and `control` is optional in practice;
/// empty strings and empty byte vectors are the wire representation of
/// "absent". `data` carries structured content (JSON) or raw chunk bytes
/// depending on the channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FramePayload {
    /// Message identifier; for job traffic this is the job id
    pub message_id: Uuid,
    /// Control code
    pub control: Control,
    /// Verb for job traffic, empty otherwise
    pub command: String,
    /// Structured content or chunk bytes
    pub data: Vec<u8>,
    /// Free-form detail line
    pub info: String,
    /// Captured standard error
    pub stderr: String,
    /// Captured standard output
    pub stdout: String,
    /// Sender (client frames) or addressee (server frames) identity
    pub identity: String,
    /// Job content fingerprint, empty outside job traffic
    pub job_sha: String,
}

impl FramePayload {
    /// Create a payload with the given control and everything else empty
    pub fn control(message_id: Uuid, control: Control) -> Self {
        Self {
            message_id,
            control,
            command: String::new(),
            data: Vec::new(),
            info: String::new(),
            stderr: String::new(),
            stdout: String::new(),
            identity: String::new(),
            job_sha: String::new(),
        }
    }

    /// Builder-style identity assignment
    pub fn with_identity(mut self, identity: impl Into<String>) -> Self {
        self.identity = identity.into();
        self
    }

    /// Builder-style data assignment
    pub fn with_data(mut self, data: Vec<u8>) -> Self {
        self.data = data;
        self
    }

    /// Builder-style info assignment
    pub fn with_info(mut self, info: impl Into<String>) -> Self {
        self.info = info.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_roundtrip() {
        for channel in Channel::all() {
            let byte = channel.as_u8();
            let recovered = Channel::from_u8(byte).unwrap();
            assert_eq!(recovered, channel);
        }
    }

    #[test]
    fn test_channel_unknown() {
        assert!(Channel::from_u8(0x00).is_none());
        assert!(Channel::from_u8(0x05).is_none());
        assert!(Channel::from_u8(0xFF).is_none());
    }

    #[test]
    fn test_control_roundtrip() {
        for control in [
            Control::HeartbeatNotice,
            Control::JobDispatch,
            Control::JobAck,
            Control::JobProcessing,
            Control::JobEnd,
            Control::JobFailed,
            Control::JobTimeout,
            Control::Nack,
            Control::TransferRequest,
            Control::TransferChunk,
            Control::TransferEnd,
            Control::TransferFailed,
        ] {
            let byte = control.as_u8();
            let recovered = Control::from_u8(byte).unwrap();
            assert_eq!(recovered, control);
        }
    }

    #[test]
    fn test_control_terminality() {
        assert!(Control::JobEnd.is_terminal());
        assert!(Control::JobFailed.is_terminal());
        assert!(Control::JobTimeout.is_terminal());
        assert!(Control::Nack.is_terminal());
        assert!(!Control::JobAck.is_terminal());
        assert!(!Control::JobProcessing.is_terminal());
        assert!(!Control::HeartbeatNotice.is_terminal());
    }

    #[test]
    fn test_payload_builder() {
        let id = Uuid::new_v4();
        let payload = FramePayload::control(id, Control::JobAck)
            .with_identity("node1")
            .with_info("queued");

        assert_eq!(payload.message_id, id);
        assert_eq!(payload.identity, "node1");
        assert_eq!(payload.info, "queued");
        assert!(payload.stdout.is_empty());
        assert!(payload.job_sha.is_empty());
    }
}
