//! Tokio codec for framed protocol messages

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::error::ProtocolError;
use crate::frame::{FrameHeader, MAX_PAYLOAD_SIZE};
use crate::message::{Channel, FramePayload};

/// A complete frame with channel tag and payload
#[derive(Debug, Clone)]
pub struct Frame {
    /// Channel this frame travels on
    pub channel: Channel,
    /// The message payload
    pub payload: FramePayload,
}

impl Frame {
    /// Create a new frame
    pub fn new(channel: Channel, payload: FramePayload) -> Self {
        Self { channel, payload }
    }
}

/// Codec for encoding/decoding protocol frames
#[derive(Debug, Default)]
pub struct FrameCodec {
    /// Current header being decoded (if any)
    pending_header: Option<FrameHeader>,
    /// Outbound frame counter
    next_sequence: u32,
}

impl FrameCodec {
    /// Create a new codec
    pub fn new() -> Self {
        Self {
            pending_header: None,
            next_sequence: 0,
        }
    }
}

impl Decoder for FrameCodec {
    type Item = Frame;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Try to decode header if we don't have one
        let header = match self.pending_header.take() {
            Some(h) => h,
            None => match FrameHeader::decode(src)? {
                Some(h) => h,
                None => return Ok(None), // Need more data
            },
        };

        // Check payload length
        let payload_len = header.payload_length as usize;
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        // Check if we have enough data for the payload
        if src.len() < payload_len {
            // Save header and wait for more data
            self.pending_header = Some(header);
            return Ok(None);
        }

        // Extract payload
        let payload_bytes = src.split_to(payload_len).freeze();

        // Deserialize payload
        let payload: FramePayload = bincode::deserialize(&payload_bytes)?;

        Ok(Some(Frame {
            channel: header.channel,
            payload,
        }))
    }
}

impl Encoder<Frame> for FrameCodec {
    type Error = ProtocolError;

    fn encode(&mut self, frame: Frame, dst: &mut BytesMut) -> Result<(), Self::Error> {
        // Serialize the payload
        let payload = bincode::serialize(&frame.payload)?;
        let payload_len = payload.len();

        // Check payload size
        if payload_len > MAX_PAYLOAD_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_len,
                max: MAX_PAYLOAD_SIZE,
            });
        }

        // Encode header
        let header = FrameHeader::new(self.next_sequence, frame.channel, payload_len as u32);
        self.next_sequence = self.next_sequence.wrapping_add(1);
        header.encode(dst);

        // Append payload
        dst.extend_from_slice(&payload);

        Ok(())
    }
}
