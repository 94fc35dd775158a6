//! dird-protocol: Wire protocol for directord messaging
//!
//! This crate defines the binary protocol used for communication between
//! the directord server and client workers: framed messages on four logical
//! channels (heartbeat, job, transfer, return), encoded with a fixed binary
//! header and a bincode payload.

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Frame, FrameCodec};
pub use error::ProtocolError;
pub use frame::{FrameHeader, HEADER_SIZE, MAX_PAYLOAD_SIZE};
pub use message::{Channel, Control, FramePayload, PROTOCOL_VERSION};
