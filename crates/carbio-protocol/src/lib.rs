//! Wire protocol for the fingerprint sensor.
//!
//! Layers, leaves first:
//!
//! - [`packet`]: the fixed binary frame and its checksum
//! - [`commands`]: typed request/response pairs per command code
//! - [`settings`]: register values and the system parameter block
//! - [`handler`]: command frames, acknowledgements and chunked transfers
//! - [`codec`]: stream framing for byte-oriented consumers

pub mod codec;
pub mod commands;
pub mod handler;
pub mod packet;
pub mod settings;

pub use codec::SensorCodec;
pub use commands::{Command, CommandCode, IndexTable, MatchResult, SearchResult, Template};
pub use handler::ProtocolHandler;
pub use packet::{Frame, PacketId, checksum};
pub use settings::{
    BaudRate, DeviceSettingIndex, DeviceSettings, LedColor, LedMode, PacketLength, SecurityLevel,
};
