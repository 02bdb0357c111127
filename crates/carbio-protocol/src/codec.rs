//! Tokio codec for sensor frames.
//!
//! The command executor reads frames synchronously, header first. Anything
//! that sees the link as an unstructured byte stream instead (the simulated
//! sensor behind the mock transport, capture tools) uses [`SensorCodec`] to
//! cut that stream into [`Frame`]s.
//!
//! # Resynchronisation
//!
//! Bytes in front of the start code are discarded. A frame that fails
//! validation after its header arrived is reported as an error and its bytes
//! are consumed, so the next call starts at the following frame.
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use tokio_util::codec::{Decoder, Encoder};
//! use carbio_protocol::{Frame, PacketId, SensorCodec};
//!
//! let mut codec = SensorCodec::new(0xFFFF_FFFF);
//! let mut buffer = BytesMut::new();
//!
//! let frame = Frame::new(0xFFFF_FFFF, PacketId::Command, &[0x01]).unwrap();
//! codec.encode(&frame, &mut buffer).unwrap();
//!
//! let decoded = codec.decode(&mut buffer).unwrap().unwrap();
//! assert_eq!(decoded, frame);
//! assert!(buffer.is_empty());
//! ```

use crate::packet::Frame;
use bytes::{Buf, BytesMut};
use carbio_core::{Error, Result, constants::*};
use tokio_util::codec::{Decoder, Encoder};

const START_BYTES: [u8; 2] = START_CODE.to_be_bytes();

/// Frame codec bound to one device address.
#[derive(Debug, Clone)]
pub struct SensorCodec {
    address: u32,
}

impl SensorCodec {
    pub fn new(address: u32) -> Self {
        Self { address }
    }

    pub fn address(&self) -> u32 {
        self.address
    }
}

impl Default for SensorCodec {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

impl Decoder for SensorCodec {
    type Item = Frame;
    type Error = Error;

    /// Extract the next frame from `src`.
    ///
    /// Returns `Ok(None)` until a whole frame is buffered.
    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Frame>> {
        // Drop leading garbage, keeping a trailing 0xEF that may start a frame.
        match src.windows(2).position(|w| w == START_BYTES) {
            Some(0) => {}
            Some(offset) => src.advance(offset),
            None => {
                let keep = usize::from(src.last() == Some(&START_BYTES[0]));
                src.advance(src.len() - keep);
                return Ok(None);
            }
        }

        if src.len() < HEADER_SIZE {
            return Ok(None);
        }

        let length = u16::from_be_bytes([src[LENGTH_OFFSET], src[LENGTH_OFFSET + 1]]) as usize;
        if length > MAX_PAYLOAD_SIZE + CHECKSUM_SIZE {
            src.advance(START_BYTES.len());
            return Err(carbio_core::StatusCode::BadPacket.into());
        }

        let total = HEADER_SIZE + length;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }

        let raw = src.split_to(total);
        Frame::decode(&raw, self.address).map(Some)
    }
}

impl Encoder<&Frame> for SensorCodec {
    type Error = Error;

    fn encode(&mut self, item: &Frame, dst: &mut BytesMut) -> Result<()> {
        dst.reserve(item.encoded_len());
        item.encode_to(dst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PacketId;
    use carbio_core::StatusCode;

    fn frame(payload: &[u8]) -> Frame {
        Frame::new(DEFAULT_ADDRESS, PacketId::Command, payload).unwrap()
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = SensorCodec::default();
        let bytes = frame(&[0x01, 0x02]).to_bytes();

        let mut buffer = BytesMut::from(&bytes[..5]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());

        buffer.extend_from_slice(&bytes[5..]);
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap(), frame(&[0x01, 0x02]));
    }

    #[test]
    fn test_decode_multiple_frames_in_buffer() {
        let mut codec = SensorCodec::default();
        let mut buffer = BytesMut::new();
        codec.encode(&frame(&[0x01]), &mut buffer).unwrap();
        codec.encode(&frame(&[0x1D]), &mut buffer).unwrap();

        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().payload(), &[0x01]);
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().payload(), &[0x1D]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
    }

    #[test]
    fn test_decode_with_garbage_before_start_code() {
        let mut codec = SensorCodec::default();
        let mut buffer = BytesMut::from(&b"\x00\x13\x37"[..]);
        buffer.extend_from_slice(&frame(&[0x0F]).to_bytes());

        let decoded = codec.decode(&mut buffer).unwrap().unwrap();
        assert_eq!(decoded.payload(), &[0x0F]);
    }

    #[test]
    fn test_decode_garbage_only_keeps_possible_start() {
        let mut codec = SensorCodec::default();
        let mut buffer = BytesMut::from(&b"\x10\x20\xEF"[..]);
        assert!(codec.decode(&mut buffer).unwrap().is_none());
        assert_eq!(&buffer[..], &[0xEF]);
    }

    #[test]
    fn test_decode_corrupt_frame_is_consumed() {
        let mut codec = SensorCodec::default();
        let mut bytes = frame(&[0x01]).to_bytes().to_vec();
        bytes[9] ^= 0xFF;
        let mut buffer = BytesMut::from(&bytes[..]);
        buffer.extend_from_slice(&frame(&[0x02]).to_bytes());

        let err = codec.decode(&mut buffer).unwrap_err();
        assert!(err.is(StatusCode::BadPacket));
        assert_eq!(codec.decode(&mut buffer).unwrap().unwrap().payload(), &[0x02]);
    }
}
