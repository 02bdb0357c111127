//! Sensor register values and the system parameter block.

use bytes::Buf;
use carbio_core::{Error, Result, StatusCode, constants::*};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Writable system register, used with `write_system_parameter`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum DeviceSettingIndex {
    BaudRate = 4,
    SecurityLevel = 5,
    PacketLength = 6,
}

/// UART speed, stored by the sensor as a multiple of 9600 bps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum BaudRate {
    B9600 = 0x01,
    B19200 = 0x02,
    B28800 = 0x03,
    B38400 = 0x04,
    B48000 = 0x05,
    B57600 = 0x06,
    B67200 = 0x07,
    B76800 = 0x08,
    B86400 = 0x09,
    B96000 = 0x0A,
    B105600 = 0x0B,
    B115200 = 0x0C,
}

impl BaudRate {
    /// Line speed in bits per second.
    #[inline]
    pub fn bps(self) -> u32 {
        self as u32 * BAUD_RATE_UNIT
    }

    /// Inverse of [`BaudRate::bps`].
    pub fn from_bps(bps: u32) -> Result<Self> {
        if bps % BAUD_RATE_UNIT != 0 {
            return Err(Error::invalid_argument(format!("unsupported baud rate {bps}")));
        }
        u8::try_from(bps / BAUD_RATE_UNIT)
            .map_err(|_| Error::invalid_argument(format!("unsupported baud rate {bps}")))
            .and_then(Self::try_from)
    }
}

impl TryFrom<u8> for BaudRate {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Self::B9600,
            0x02 => Self::B19200,
            0x03 => Self::B28800,
            0x04 => Self::B38400,
            0x05 => Self::B48000,
            0x06 => Self::B57600,
            0x07 => Self::B67200,
            0x08 => Self::B76800,
            0x09 => Self::B86400,
            0x0A => Self::B96000,
            0x0B => Self::B105600,
            0x0C => Self::B115200,
            _ => return Err(Error::invalid_argument(format!("baud rate code {value} not in 1..=12"))),
        })
    }
}

impl fmt::Display for BaudRate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bps", self.bps())
    }
}

/// Matching strictness. Higher levels lower the false accept rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum SecurityLevel {
    Lowest = 0x01,
    Low = 0x02,
    Balanced = 0x03,
    High = 0x04,
    Highest = 0x05,
}

impl TryFrom<u8> for SecurityLevel {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Self::Lowest,
            0x02 => Self::Low,
            0x03 => Self::Balanced,
            0x04 => Self::High,
            0x05 => Self::Highest,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "security level {value} not in 1..=5"
                )));
            }
        })
    }
}

impl fmt::Display for SecurityLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Lowest => "lowest",
            Self::Low => "low",
            Self::Balanced => "balanced",
            Self::High => "high",
            Self::Highest => "highest",
        };
        write!(f, "{name}")
    }
}

/// Data packet size used for bulk transfers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PacketLength {
    Bytes32 = 0x00,
    Bytes64 = 0x01,
    Bytes128 = 0x02,
    Bytes256 = 0x03,
}

impl PacketLength {
    #[inline]
    pub fn bytes(self) -> usize {
        32 << (self as u8)
    }
}

impl TryFrom<u8> for PacketLength {
    type Error = Error;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0x00 => Self::Bytes32,
            0x01 => Self::Bytes64,
            0x02 => Self::Bytes128,
            0x03 => Self::Bytes256,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "packet length code {value} not in 0..=3"
                )));
            }
        })
    }
}

impl fmt::Display for PacketLength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} bytes", self.bytes())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedMode {
    Breathing = 0x01,
    Flashing = 0x02,
    SteadyOn = 0x03,
    SteadyOff = 0x04,
    GradualOn = 0x05,
    GradualOff = 0x06,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LedColor {
    Red = 0x01,
    Blue = 0x02,
    Purple = 0x03,
    Green = 0x04,
    Yellow = 0x05,
    Cyan = 0x06,
    White = 0x07,
}

/// The 16-byte system parameter block returned by `read_system_parameter`.
///
/// `packet_length` and `baud_rate` hold the raw register codes; use
/// [`DeviceSettings::packet_size`] and [`DeviceSettings::baud_bps`] for the
/// decoded values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceSettings {
    pub status: u16,
    pub system_id: u16,
    pub capacity: u16,
    pub security_level: u16,
    pub address: u32,
    pub packet_length: u16,
    pub baud_rate: u16,
}

impl Default for DeviceSettings {
    fn default() -> Self {
        Self {
            status: 0,
            system_id: 0,
            capacity: DEFAULT_CAPACITY,
            security_level: SecurityLevel::Balanced as u16,
            address: DEFAULT_ADDRESS,
            packet_length: PacketLength::Bytes128 as u16,
            baud_rate: BaudRate::B57600 as u16,
        }
    }
}

impl DeviceSettings {
    /// Parse the parameter block. Fewer than 16 bytes is a `BadPacket`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < SYSTEM_PARAMETER_SIZE {
            return Err(StatusCode::BadPacket.into());
        }
        let mut cursor = data;
        Ok(Self {
            status: cursor.get_u16(),
            system_id: cursor.get_u16(),
            capacity: cursor.get_u16(),
            security_level: cursor.get_u16(),
            address: cursor.get_u32(),
            packet_length: cursor.get_u16(),
            baud_rate: cursor.get_u16(),
        })
    }

    /// Data packet size in bytes. Unknown codes fall back to the default.
    pub fn packet_size(&self) -> usize {
        u8::try_from(self.packet_length)
            .ok()
            .and_then(|code| PacketLength::try_from(code).ok())
            .map_or(DEFAULT_PACKET_LENGTH, PacketLength::bytes)
    }

    /// Line speed in bits per second.
    pub fn baud_bps(&self) -> u32 {
        self.baud_rate as u32 * BAUD_RATE_UNIT
    }
}

impl fmt::Display for DeviceSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "status={:#06X} id={:#06X} capacity={} security={} address={:#010X} packet={}B baud={}",
            self.status,
            self.system_id,
            self.capacity,
            self.security_level,
            self.address,
            self.packet_size(),
            self.baud_bps()
        )
    }
}
