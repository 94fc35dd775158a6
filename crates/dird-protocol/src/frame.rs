//! Frame header encoding/decoding
//!
//! The frame format uses an 8-byte header:
//! - sequence: 4 bytes (u32, big-endian, per-connection counter)
//! - channel: 1 byte (u8)
//! - payload_length: 3 bytes (u24, big-endian, max 16MB)

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::message::Channel;

/// Size of the frame header in bytes
pub const HEADER_SIZE: usize = 8;

/// Maximum payload size (16MB - 1, limited by 24-bit length field)
pub const MAX_PAYLOAD_SIZE: usize = 0x00FF_FFFF;

/// Frame header containing routing and length information
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Per-connection frame counter
    pub sequence: u32,
    /// Channel the payload belongs to
    pub channel: Channel,
    /// Length of the payload in bytes
    pub payload_length: u32,
}

impl FrameHeader {
    /// Create a new frame header
    pub fn new(sequence: u32, channel: Channel, payload_length: u32) -> Self {
        Self {
            sequence,
            channel,
            payload_length,
        }
    }

    /// Encode the header into a byte buffer
    pub fn encode(&self, dst: &mut BytesMut) {
        dst.reserve(HEADER_SIZE);
        // sequence: 4 bytes big-endian
        dst.put_u32(self.sequence);
        // channel: 1 byte
        dst.put_u8(self.channel.as_u8());
        // payload_length: 3 bytes big-endian (24-bit)
        dst.put_u8((self.payload_length >> 16) as u8);
        dst.put_u16(self.payload_length as u16);
    }

    /// Decode a header from a byte buffer
    ///
    /// Returns None if there aren't enough bytes in the buffer.
    /// Returns Err if the header is invalid (unknown channel).
    pub fn decode(src: &mut BytesMut) -> Result<Option<Self>, ProtocolError> {
        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        // Peek at the channel tag first to validate
        let channel_byte = src[4];
        let channel =
            Channel::from_u8(channel_byte).ok_or(ProtocolError::UnknownChannel(channel_byte))?;

        // Now consume the bytes
        let sequence = src.get_u32();
        let _ = src.get_u8(); // channel already parsed
        let len_high = src.get_u8() as u32;
        let len_low = src.get_u16() as u32;
        let payload_length = (len_high << 16) | len_low;

        Ok(Some(Self {
            sequence,
            channel,
            payload_length,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_header_roundtrip() {
        let header = FrameHeader::new(7, Channel::Job, 1024);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        assert_eq!(buf.len(), HEADER_SIZE);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, header);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_header_max_length() {
        let header = FrameHeader::new(0, Channel::Transfer, MAX_PAYLOAD_SIZE as u32);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);

        let decoded = FrameHeader::decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload_length as usize, MAX_PAYLOAD_SIZE);
    }

    #[test]
    fn test_header_incomplete() {
        let header = FrameHeader::new(1, Channel::Return, 16);

        let mut buf = BytesMut::new();
        header.encode(&mut buf);
        let mut partial = buf.split_to(HEADER_SIZE - 1);

        // Not enough bytes: no header, nothing consumed
        assert!(FrameHeader::decode(&mut partial).unwrap().is_none());
        assert_eq!(partial.len(), HEADER_SIZE - 1);
    }

    #[test]
    fn test_header_unknown_channel() {
        let mut buf = BytesMut::new();
        FrameHeader::new(1, Channel::Heartbeat, 0).encode(&mut buf);
        buf[4] = 0x7F; // corrupt the channel tag

        match FrameHeader::decode(&mut buf) {
            Err(ProtocolError::UnknownChannel(0x7F)) => {}
            other => panic!("Expected UnknownChannel, got {:?}", other),
        }
    }
}
