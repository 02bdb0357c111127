//! Frame-level protocol logic between typed commands and raw bytes.
//!
//! [`ProtocolHandler`] knows the device address and the negotiated data
//! packet length. It builds command frames, validates acknowledgements and
//! splits or reassembles bulk transfers. It performs no I/O.
//!
//! # Bulk transfers
//!
//! Templates and images move as a run of `Data` frames closed by one
//! `EndData` frame. Receivers stop on the `EndData` marker, never on a byte
//! count:
//!
//! ```
//! use carbio_protocol::{PacketId, ProtocolHandler};
//!
//! let mut handler = ProtocolHandler::new(0xFFFF_FFFF);
//! handler.set_packet_length(64);
//!
//! let frames = handler.construct_data_packets(&[0x5A; 150]).unwrap();
//! assert_eq!(frames.len(), 3);
//! assert_eq!(frames[0].id(), PacketId::Data);
//! assert_eq!(frames[2].id(), PacketId::EndData);
//! assert_eq!(frames[2].payload().len(), 22);
//!
//! let data = handler.parse_data_packets(&frames).unwrap();
//! assert_eq!(data.as_slice(), &[0x5A; 150][..]);
//! ```

use crate::commands::CommandCode;
use crate::packet::{Frame, PacketId};
use carbio_core::{Error, Result, SecureBuffer, StatusCode, constants::*};
use tracing::trace;

#[derive(Debug, Clone)]
pub struct ProtocolHandler {
    address: u32,
    packet_length: usize,
}

impl ProtocolHandler {
    pub fn new(address: u32) -> Self {
        Self {
            address,
            packet_length: DEFAULT_PACKET_LENGTH,
        }
    }

    #[inline]
    pub fn address(&self) -> u32 {
        self.address
    }

    pub fn set_address(&mut self, address: u32) {
        self.address = address;
    }

    #[inline]
    pub fn packet_length(&self) -> usize {
        self.packet_length
    }

    /// Set the data chunk size. Values above [`MAX_PAYLOAD_SIZE`] are capped;
    /// zero restores the default.
    pub fn set_packet_length(&mut self, length: usize) {
        self.packet_length = match length {
            0 => DEFAULT_PACKET_LENGTH,
            n => n.min(MAX_PAYLOAD_SIZE),
        };
    }

    /// Build a command frame whose payload is `[code, data...]`.
    pub fn construct_command_packet(&self, code: CommandCode, data: &[u8]) -> Result<Frame> {
        if data.len() + 1 > MAX_PAYLOAD_SIZE {
            return Err(Error::invalid_argument(format!(
                "{} parameters too long: {} bytes",
                code.as_str(),
                data.len()
            )));
        }

        let mut payload = [0u8; MAX_PAYLOAD_SIZE];
        payload[0] = code.as_u8();
        payload[1..=data.len()].copy_from_slice(data);
        let frame = Frame::new(self.address, PacketId::Command, &payload[..=data.len()]);
        zeroize::Zeroize::zeroize(&mut payload);
        frame
    }

    /// Decode raw bytes as a frame addressed to this device.
    pub fn decode(&self, bytes: &[u8]) -> Result<Frame> {
        Frame::decode(bytes, self.address)
    }

    /// Validate an acknowledge frame and return the bytes after its status.
    ///
    /// A non-acknowledge or empty frame yields `NoFrame`. A non-success status
    /// byte is returned as that exact status.
    pub fn parse_acknowledge_packet(&self, bytes: &[u8]) -> Result<SecureBuffer> {
        let frame = self.decode(bytes)?;
        self.parse_acknowledge_frame(&frame)
    }

    pub fn parse_acknowledge_frame(&self, frame: &Frame) -> Result<SecureBuffer> {
        if frame.id() != PacketId::Acknowledge || frame.payload().is_empty() {
            return Err(StatusCode::NoFrame.into());
        }

        let status = StatusCode::from_u8(frame.payload()[0]);
        if !status.is_success() {
            trace!(status = status.name(), "device rejected command");
            return Err(status.into());
        }
        Ok(SecureBuffer::from(&frame.payload()[1..]))
    }

    /// Split `data` into chunks of at most the negotiated packet length.
    ///
    /// Every chunk but the last is tagged `Data`; the last is `EndData`.
    pub fn construct_data_packets(&self, data: &[u8]) -> Result<Vec<Frame>> {
        if data.is_empty() {
            return Err(Error::invalid_argument("bulk transfer of zero bytes"));
        }

        let chunk_size = self.packet_length.min(MAX_PAYLOAD_SIZE);
        let total = data.len().div_ceil(chunk_size);
        data.chunks(chunk_size)
            .enumerate()
            .map(|(i, chunk)| {
                let id = if i + 1 == total {
                    PacketId::EndData
                } else {
                    PacketId::Data
                };
                Frame::new(self.address, id, chunk)
            })
            .collect()
    }

    /// Append one bulk-transfer frame to `out`.
    ///
    /// Returns `Ok(true)` once the `EndData` frame has been consumed. Any
    /// other frame type aborts with `NoFrame`.
    pub fn parse_data_packet(&self, frame: &Frame, out: &mut SecureBuffer) -> Result<bool> {
        match frame.id() {
            PacketId::Data => {
                out.extend_from_slice(frame.payload());
                Ok(false)
            }
            PacketId::EndData => {
                out.extend_from_slice(frame.payload());
                Ok(true)
            }
            _ => Err(StatusCode::NoFrame.into()),
        }
    }

    /// Concatenate frames up to and including the first `EndData`.
    ///
    /// Frames after the `EndData` marker are ignored; a run with no marker at
    /// all yields `NoFrame`.
    pub fn parse_data_packets(&self, frames: &[Frame]) -> Result<SecureBuffer> {
        let mut out = SecureBuffer::with_capacity(frames.len() * self.packet_length);
        for frame in frames {
            if self.parse_data_packet(frame, &mut out)? {
                return Ok(out);
            }
        }
        Err(StatusCode::NoFrame.into())
    }
}

impl Default for ProtocolHandler {
    fn default() -> Self {
        Self::new(DEFAULT_ADDRESS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn ack(payload: &[u8]) -> Vec<u8> {
        Frame::new(DEFAULT_ADDRESS, PacketId::Acknowledge, payload)
            .unwrap()
            .to_bytes()
            .to_vec()
    }

    #[test]
    fn test_command_packet_prepends_code() {
        let handler = ProtocolHandler::default();
        let frame = handler
            .construct_command_packet(CommandCode::StoreModel, &[0x01, 0x00, 0x05])
            .unwrap();
        assert_eq!(frame.id(), PacketId::Command);
        assert_eq!(frame.payload(), &[0x06, 0x01, 0x00, 0x05]);
    }

    #[test]
    fn test_command_packet_too_long() {
        let handler = ProtocolHandler::default();
        let result = handler.construct_command_packet(CommandCode::UploadImage, &[0u8; 256]);
        assert!(matches!(result, Err(Error::InvalidArgument(_))));
    }

    #[test]
    fn test_ack_success_returns_data() {
        let handler = ProtocolHandler::default();
        let data = handler.parse_acknowledge_packet(&ack(&[0x00, 0x00, 0x0C])).unwrap();
        assert_eq!(data.as_slice(), &[0x00, 0x0C]);
    }

    #[rstest]
    #[case(StatusCode::NoFinger)]
    #[case(StatusCode::NotFound)]
    #[case(StatusCode::PermissionDenied)]
    #[case(StatusCode::HardwareFault)]
    fn test_ack_status_surfaces_exact_code(#[case] status: StatusCode) {
        let handler = ProtocolHandler::default();
        let err = handler.parse_acknowledge_packet(&ack(&[status.as_u8()])).unwrap_err();
        assert_eq!(err.status(), Some(status));
    }

    #[test]
    fn test_ack_wrong_type_is_no_frame() {
        let handler = ProtocolHandler::default();
        let bytes = Frame::new(DEFAULT_ADDRESS, PacketId::Data, &[0x00])
            .unwrap()
            .to_bytes();
        let err = handler.parse_acknowledge_packet(&bytes).unwrap_err();
        assert!(err.is(StatusCode::NoFrame));
    }

    #[test]
    fn test_ack_empty_is_no_frame() {
        let handler = ProtocolHandler::default();
        let err = handler.parse_acknowledge_packet(&ack(&[])).unwrap_err();
        assert!(err.is(StatusCode::NoFrame));
    }

    #[test]
    fn test_ack_other_address() {
        let handler = ProtocolHandler::new(0x1234_5678);
        let err = handler.parse_acknowledge_packet(&ack(&[0x00])).unwrap_err();
        assert!(err.is(StatusCode::IllegalDeviceAddress));
    }

    #[rstest]
    #[case(32, 512, 16)]
    #[case(128, 512, 4)]
    #[case(128, 513, 5)]
    #[case(256, 100, 1)]
    #[case(1024, 600, 3)]
    fn test_chunk_count(#[case] packet_length: usize, #[case] size: usize, #[case] frames: usize) {
        let mut handler = ProtocolHandler::default();
        handler.set_packet_length(packet_length);
        let packets = handler.construct_data_packets(&vec![1u8; size]).unwrap();

        assert_eq!(packets.len(), frames);
        let (last, rest) = packets.split_last().unwrap();
        assert_eq!(last.id(), PacketId::EndData);
        assert!(rest.iter().all(|f| f.id() == PacketId::Data));
    }

    #[test]
    fn test_empty_transfer_rejected() {
        let handler = ProtocolHandler::default();
        assert!(handler.construct_data_packets(&[]).is_err());
    }

    #[test]
    fn test_parse_stops_at_end_data() {
        let handler = ProtocolHandler::default();
        let frames = vec![
            Frame::new(DEFAULT_ADDRESS, PacketId::Data, &[1, 2]).unwrap(),
            Frame::new(DEFAULT_ADDRESS, PacketId::EndData, &[3]).unwrap(),
            Frame::new(DEFAULT_ADDRESS, PacketId::Data, &[9, 9]).unwrap(),
        ];
        assert_eq!(handler.parse_data_packets(&frames).unwrap().as_slice(), &[1, 2, 3]);
    }

    #[test]
    fn test_parse_wrong_type_aborts() {
        let handler = ProtocolHandler::default();
        let frames = vec![
            Frame::new(DEFAULT_ADDRESS, PacketId::Data, &[1]).unwrap(),
            Frame::new(DEFAULT_ADDRESS, PacketId::Acknowledge, &[0]).unwrap(),
        ];
        let err = handler.parse_data_packets(&frames).unwrap_err();
        assert!(err.is(StatusCode::NoFrame));
    }

    #[test]
    fn test_parse_without_end_marker() {
        let handler = ProtocolHandler::default();
        let frames = vec![Frame::new(DEFAULT_ADDRESS, PacketId::Data, &[1]).unwrap()];
        assert!(handler.parse_data_packets(&frames).unwrap_err().is(StatusCode::NoFrame));
    }

    #[test]
    fn test_packet_length_clamped() {
        let mut handler = ProtocolHandler::default();
        handler.set_packet_length(4096);
        assert_eq!(handler.packet_length(), 256);
        handler.set_packet_length(0);
        assert_eq!(handler.packet_length(), 128);
    }
}
