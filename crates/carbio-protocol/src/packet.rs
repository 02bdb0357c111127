use bytes::{Buf, BufMut, Bytes, BytesMut};
use carbio_core::{Error, Result, StatusCode, constants::*};
use std::fmt;
use zeroize::Zeroize;

/// Frame type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PacketId {
    /// Host to sensor command.
    Command = 0x01,
    /// Bulk transfer chunk, more to follow.
    Data = 0x02,
    /// Sensor reply to a command, payload starts with a status byte.
    Acknowledge = 0x07,
    /// Final chunk of a bulk transfer.
    EndData = 0x08,
}

impl PacketId {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x01 => Some(Self::Command),
            0x02 => Some(Self::Data),
            0x07 => Some(Self::Acknowledge),
            0x08 => Some(Self::EndData),
            _ => None,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for PacketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command => write!(f, "command"),
            Self::Data => write!(f, "data"),
            Self::Acknowledge => write!(f, "acknowledge"),
            Self::EndData => write!(f, "end-data"),
        }
    }
}

/// One wire frame.
///
/// The payload lives in a fixed [`MAX_PAYLOAD_SIZE`] array next to an explicit
/// length, so a frame never allocates. Payload bytes can hold match scores or
/// template chunks and are wiped when the frame drops.
///
/// # Wire Format
///
/// ```text
/// | EF 01 | address (4) | type (1) | length (2) | payload | checksum (2) |
/// ```
///
/// `length` counts the payload plus the checksum. All integers are big-endian.
///
/// # Examples
///
/// ```
/// use carbio_protocol::{Frame, PacketId};
///
/// let frame = Frame::new(0xFFFF_FFFF, PacketId::Command, &[0x01]).unwrap();
/// assert_eq!(
///     frame.to_bytes().as_ref(),
///     &[0xEF, 0x01, 0xFF, 0xFF, 0xFF, 0xFF, 0x01, 0x00, 0x03, 0x01, 0x00, 0x05]
/// );
///
/// let decoded = Frame::decode(&frame.to_bytes(), 0xFFFF_FFFF).unwrap();
/// assert_eq!(decoded, frame);
/// ```
#[derive(Clone)]
pub struct Frame {
    address: u32,
    id: PacketId,
    len: usize,
    payload: [u8; MAX_PAYLOAD_SIZE],
}

impl Frame {
    /// Build a frame. Fails if `payload` exceeds [`MAX_PAYLOAD_SIZE`].
    pub fn new(address: u32, id: PacketId, payload: &[u8]) -> Result<Self> {
        if payload.len() > MAX_PAYLOAD_SIZE {
            return Err(Error::invalid_argument(format!(
                "payload of {} bytes exceeds {MAX_PAYLOAD_SIZE}",
                payload.len()
            )));
        }

        let mut frame = Self {
            address,
            id,
            len: payload.len(),
            payload: [0u8; MAX_PAYLOAD_SIZE],
        };
        frame.payload[..payload.len()].copy_from_slice(payload);
        Ok(frame)
    }

    #[inline]
    pub fn tag(&self) -> u16 {
        START_CODE
    }

    #[inline]
    pub fn address(&self) -> u32 {
        self.address
    }

    #[inline]
    pub fn id(&self) -> PacketId {
        self.id
    }

    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.payload[..self.len]
    }

    /// Value of the wire length field: payload plus checksum.
    #[inline]
    pub fn length(&self) -> u16 {
        (self.len + CHECKSUM_SIZE) as u16
    }

    /// Total encoded size in bytes.
    #[inline]
    pub fn encoded_len(&self) -> usize {
        HEADER_SIZE + self.len + CHECKSUM_SIZE
    }

    pub fn checksum(&self) -> u16 {
        checksum(self.id.as_u8(), self.length(), self.payload())
    }

    /// Append the wire encoding to `dst`.
    pub fn encode_to<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16(START_CODE);
        dst.put_u32(self.address);
        dst.put_u8(self.id.as_u8());
        dst.put_u16(self.length());
        dst.put_slice(self.payload());
        dst.put_u16(self.checksum());
    }

    pub fn to_bytes(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_to(&mut buf);
        buf.freeze()
    }

    /// Parse one complete frame from `buf`.
    ///
    /// Decoding is strict; nothing is repaired:
    ///
    /// | Condition | Error |
    /// |-----------|-------|
    /// | fewer than header + checksum bytes | `FrameError` |
    /// | wrong start code | `BadPacket` |
    /// | address differs from `expected_address` | `IllegalDeviceAddress` |
    /// | unknown frame type | `BadPacket` |
    /// | length < 2, length > 258 or buffer too short | `BadPacket` |
    /// | checksum mismatch | `BadPacket` |
    pub fn decode(buf: &[u8], expected_address: u32) -> Result<Self> {
        if buf.len() < MIN_FRAME_SIZE {
            return Err(StatusCode::FrameError.into());
        }

        let mut cursor = buf;
        if cursor.get_u16() != START_CODE {
            return Err(StatusCode::BadPacket.into());
        }
        if cursor.get_u32() != expected_address {
            return Err(StatusCode::IllegalDeviceAddress.into());
        }
        let id = PacketId::from_u8(cursor.get_u8()).ok_or(StatusCode::BadPacket)?;

        let length = cursor.get_u16() as usize;
        if length < CHECKSUM_SIZE || length > MAX_PAYLOAD_SIZE + CHECKSUM_SIZE {
            return Err(StatusCode::BadPacket.into());
        }
        if cursor.remaining() < length {
            return Err(StatusCode::BadPacket.into());
        }

        let payload_len = length - CHECKSUM_SIZE;
        let frame = Self::new(expected_address, id, &cursor[..payload_len])?;
        cursor.advance(payload_len);

        if cursor.get_u16() != frame.checksum() {
            return Err(StatusCode::BadPacket.into());
        }
        Ok(frame)
    }
}

/// `type + length_hi + length_lo + sum(payload)`, wrapping at 16 bits.
pub fn checksum(id: u8, length: u16, payload: &[u8]) -> u16 {
    let [hi, lo] = length.to_be_bytes();
    payload.iter().fold(
        (id as u16).wrapping_add(hi as u16).wrapping_add(lo as u16),
        |sum, b| sum.wrapping_add(*b as u16),
    )
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address && self.id == other.id && self.payload() == other.payload()
    }
}

impl Eq for Frame {}

impl Drop for Frame {
    fn drop(&mut self) {
        self.payload.zeroize();
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("address", &format_args!("{:#010X}", self.address))
            .field("id", &self.id)
            .field("length", &self.length())
            .finish()
    }
}
