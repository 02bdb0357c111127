//! Typed sensor commands.
//!
//! Each command is a request type implementing [`Command`]. The trait pins the
//! command code and the response type at compile time, so a request can only
//! ever be decoded into its own response shape:
//!
//! ```
//! use carbio_protocol::commands::{Command, CommandCode, FastSearchModel, SearchResult};
//!
//! let request = FastSearchModel { buffer_id: 1, start_page: 0, count: 127 };
//! let mut payload = Vec::new();
//! request.serialize_request(&mut payload);
//! assert_eq!(payload, [0x01, 0x00, 0x00, 0x00, 0x7F]);
//! assert_eq!(FastSearchModel::CODE, CommandCode::FastSearchModel);
//!
//! let result: SearchResult = FastSearchModel::deserialize_response(&[0x00, 0x05, 0x00, 0x96]).unwrap();
//! assert_eq!(result, SearchResult { index: 5, confidence: 150 });
//! ```
//!
//! Serialization and deserialization are pure; nothing here knows about the
//! transport or threads.

use crate::settings::{DeviceSettingIndex, DeviceSettings, LedColor, LedMode};
use bytes::{Buf, BufMut};
use carbio_core::{Error, Result, SecureBuffer, Sensitive, StatusCode, constants::*};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instruction byte placed first in every command frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum CommandCode {
    CaptureImage = 0x01,
    ExtractFeatures = 0x02,
    MatchModel = 0x03,
    SearchModel = 0x04,
    CreateModel = 0x05,
    StoreModel = 0x06,
    LoadModel = 0x07,
    UploadModel = 0x08,
    DownloadModel = 0x09,
    UploadImage = 0x0A,
    DownloadImage = 0x0B,
    EraseModel = 0x0C,
    ClearDatabase = 0x0D,
    WriteSystemParameter = 0x0E,
    ReadSystemParameter = 0x0F,
    SetDevicePassword = 0x12,
    VerifyDevicePassword = 0x13,
    FastSearchModel = 0x1B,
    CountModel = 0x1D,
    ReadIndexTable = 0x1F,
    SetLedConfig = 0x35,
    SoftReset = 0x3D,
    LedOn = 0x50,
    LedOff = 0x51,
}

impl CommandCode {
    pub fn from_u8(value: u8) -> Result<Self> {
        Ok(match value {
            0x01 => Self::CaptureImage,
            0x02 => Self::ExtractFeatures,
            0x03 => Self::MatchModel,
            0x04 => Self::SearchModel,
            0x05 => Self::CreateModel,
            0x06 => Self::StoreModel,
            0x07 => Self::LoadModel,
            0x08 => Self::UploadModel,
            0x09 => Self::DownloadModel,
            0x0A => Self::UploadImage,
            0x0B => Self::DownloadImage,
            0x0C => Self::EraseModel,
            0x0D => Self::ClearDatabase,
            0x0E => Self::WriteSystemParameter,
            0x0F => Self::ReadSystemParameter,
            0x12 => Self::SetDevicePassword,
            0x13 => Self::VerifyDevicePassword,
            0x1B => Self::FastSearchModel,
            0x1D => Self::CountModel,
            0x1F => Self::ReadIndexTable,
            0x35 => Self::SetLedConfig,
            0x3D => Self::SoftReset,
            0x50 => Self::LedOn,
            0x51 => Self::LedOff,
            _ => {
                return Err(Error::invalid_argument(format!(
                    "unknown command code {value:#04X}"
                )));
            }
        })
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CaptureImage => "capture_image",
            Self::ExtractFeatures => "extract_features",
            Self::MatchModel => "match_model",
            Self::SearchModel => "search_model",
            Self::CreateModel => "create_model",
            Self::StoreModel => "store_model",
            Self::LoadModel => "load_model",
            Self::UploadModel => "upload_model",
            Self::DownloadModel => "download_model",
            Self::UploadImage => "upload_image",
            Self::DownloadImage => "download_image",
            Self::EraseModel => "erase_model",
            Self::ClearDatabase => "clear_database",
            Self::WriteSystemParameter => "write_system_parameter",
            Self::ReadSystemParameter => "read_system_parameter",
            Self::SetDevicePassword => "set_device_password",
            Self::VerifyDevicePassword => "verify_device_password",
            Self::FastSearchModel => "fast_search_model",
            Self::CountModel => "count_model",
            Self::ReadIndexTable => "read_index_table",
            Self::SetLedConfig => "set_led_config",
            Self::SoftReset => "soft_reset",
            Self::LedOn => "led_on",
            Self::LedOff => "led_off",
        }
    }

    /// Returns `true` if the acknowledge is followed by a bulk data phase.
    #[inline]
    pub fn is_data_transfer(&self) -> bool {
        matches!(
            self,
            Self::UploadModel | Self::DownloadModel | Self::UploadImage | Self::DownloadImage
        )
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:#04X})", self.as_str(), self.as_u8())
    }
}

/// A request with a fixed command code and response shape.
pub trait Command {
    const CODE: CommandCode;

    type Response;

    /// Write the request parameters (without the command byte).
    fn serialize_request<B: BufMut>(&self, dst: &mut B);

    /// Decode the acknowledge payload that follows the status byte.
    fn deserialize_response(payload: &[u8]) -> Result<Self::Response>;
}

fn require(payload: &[u8], len: usize) -> Result<()> {
    if payload.len() < len {
        return Err(StatusCode::BadPacket.into());
    }
    Ok(())
}

// ============================================================================
// Responses
// ============================================================================

/// Result of comparing the two character buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MatchResult {
    pub confidence: u16,
}

/// Result of a library search.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchResult {
    /// Page ID of the matching template.
    pub index: u16,
    pub confidence: u16,
}

/// One page of the template occupancy bitmap.
///
/// Bit `id % 8` of byte `id / 8` is set when template `id` is stored.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct IndexTable([u8; INDEX_TABLE_SIZE]);

impl IndexTable {
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        require(data, INDEX_TABLE_SIZE)?;
        let mut table = [0u8; INDEX_TABLE_SIZE];
        table.copy_from_slice(&data[..INDEX_TABLE_SIZE]);
        Ok(Self(table))
    }

    /// Returns `true` if slot `id` (relative to this page) is occupied.
    pub fn contains(&self, id: u16) -> bool {
        let byte = (id / 8) as usize;
        byte < INDEX_TABLE_SIZE && self.0[byte] & (1 << (id % 8)) != 0
    }

    /// Number of occupied slots on this page.
    pub fn count(&self) -> u32 {
        self.0.iter().map(|b| b.count_ones()).sum()
    }

    /// Occupied slot IDs, ascending.
    pub fn occupied(&self) -> impl Iterator<Item = u16> + '_ {
        (0..(INDEX_TABLE_SIZE * 8) as u16).filter(|id| self.contains(*id))
    }

    pub fn as_bytes(&self) -> &[u8; INDEX_TABLE_SIZE] {
        &self.0
    }
}

impl fmt::Debug for IndexTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndexTable").field("count", &self.count()).finish()
    }
}

/// A character file moved through the bulk data phase.
///
/// Exactly [`TEMPLATE_SIZE`] bytes, zeroed on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct Template(SecureBuffer);

impl Template {
    /// Take the first 512 bytes of a reassembled transfer; shorter input is a
    /// `BadPacket`.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        require(data, TEMPLATE_SIZE)?;
        Ok(Self(SecureBuffer::from(&data[..TEMPLATE_SIZE])))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_slice()
    }
}

impl fmt::Debug for Template {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Template(<512 bytes>)")
    }
}

// ============================================================================
// Requests
// ============================================================================

macro_rules! unit_command {
    ($(#[$meta:meta])* $name:ident => $code:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl Command for $name {
            const CODE: CommandCode = CommandCode::$code;
            type Response = ();

            fn serialize_request<B: BufMut>(&self, _dst: &mut B) {}

            fn deserialize_response(_payload: &[u8]) -> Result<()> {
                Ok(())
            }
        }
    };
}

unit_command!(
    /// Scan the finger into the image buffer. Fails with `NoFinger` when the
    /// window is empty.
    CaptureImage => CaptureImage
);
unit_command!(
    /// Merge character buffers 1 and 2 into a template.
    CreateModel => CreateModel
);
unit_command!(
    /// Announce an image upload (host to sensor); data packets follow.
    UploadImage => UploadImage
);
unit_command!(
    /// Request the image buffer (sensor to host); data packets follow the ack.
    DownloadImage => DownloadImage
);
unit_command!(ClearDatabase => ClearDatabase);
unit_command!(SoftReset => SoftReset);
unit_command!(LedOn => LedOn);
unit_command!(LedOff => LedOff);

/// Generate a character file from the image buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExtractFeatures {
    pub buffer_id: u8,
}

impl Command for ExtractFeatures {
    const CODE: CommandCode = CommandCode::ExtractFeatures;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Compare character buffers 1 and 2.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchModel;

impl Command for MatchModel {
    const CODE: CommandCode = CommandCode::MatchModel;
    type Response = MatchResult;

    fn serialize_request<B: BufMut>(&self, _dst: &mut B) {}

    fn deserialize_response(mut payload: &[u8]) -> Result<MatchResult> {
        require(payload, 2)?;
        Ok(MatchResult {
            confidence: payload.get_u16(),
        })
    }
}

fn search_response(mut payload: &[u8]) -> Result<SearchResult> {
    require(payload, 4)?;
    Ok(SearchResult {
        index: payload.get_u16(),
        confidence: payload.get_u16(),
    })
}

/// Search `count` library pages from `start_page` for the buffer's finger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SearchModel {
    pub buffer_id: u8,
    pub start_page: u16,
    pub count: u16,
}

impl Command for SearchModel {
    const CODE: CommandCode = CommandCode::SearchModel;
    type Response = SearchResult;

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
        dst.put_u16(self.start_page);
        dst.put_u16(self.count);
    }

    fn deserialize_response(payload: &[u8]) -> Result<SearchResult> {
        search_response(payload)
    }
}

/// High-speed variant of [`SearchModel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FastSearchModel {
    pub buffer_id: u8,
    pub start_page: u16,
    pub count: u16,
}

impl Command for FastSearchModel {
    const CODE: CommandCode = CommandCode::FastSearchModel;
    type Response = SearchResult;

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
        dst.put_u16(self.start_page);
        dst.put_u16(self.count);
    }

    fn deserialize_response(payload: &[u8]) -> Result<SearchResult> {
        search_response(payload)
    }
}

/// Write a character buffer to library page `page_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreModel {
    pub buffer_id: u8,
    pub page_id: u16,
}

impl Command for StoreModel {
    const CODE: CommandCode = CommandCode::StoreModel;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
        dst.put_u16(self.page_id);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Read library page `page_id` into a character buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadModel {
    pub buffer_id: u8,
    pub page_id: u16,
}

impl Command for LoadModel {
    const CODE: CommandCode = CommandCode::LoadModel;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
        dst.put_u16(self.page_id);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Announce a template upload into a character buffer; data packets follow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UploadModel {
    pub buffer_id: u8,
}

impl Command for UploadModel {
    const CODE: CommandCode = CommandCode::UploadModel;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Request a character buffer; the template arrives as data packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadModel {
    pub buffer_id: u8,
}

impl Command for DownloadModel {
    const CODE: CommandCode = CommandCode::DownloadModel;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.buffer_id);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// Delete `count` templates starting at `page_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EraseModel {
    pub page_id: u16,
    pub count: u16,
}

impl Command for EraseModel {
    const CODE: CommandCode = CommandCode::EraseModel;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u16(self.page_id);
        dst.put_u16(self.count);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WriteSystemParameter {
    pub index: DeviceSettingIndex,
    pub value: u8,
}

impl Command for WriteSystemParameter {
    const CODE: CommandCode = CommandCode::WriteSystemParameter;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.index as u8);
        dst.put_u8(self.value);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadSystemParameter;

impl Command for ReadSystemParameter {
    const CODE: CommandCode = CommandCode::ReadSystemParameter;
    type Response = DeviceSettings;

    fn serialize_request<B: BufMut>(&self, _dst: &mut B) {}

    fn deserialize_response(payload: &[u8]) -> Result<DeviceSettings> {
        DeviceSettings::from_bytes(payload)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetDevicePassword {
    pub password: Sensitive<u32>,
}

impl Command for SetDevicePassword {
    const CODE: CommandCode = CommandCode::SetDevicePassword;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32(self.password.value());
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifyDevicePassword {
    pub password: Sensitive<u32>,
}

impl Command for VerifyDevicePassword {
    const CODE: CommandCode = CommandCode::VerifyDevicePassword;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u32(self.password.value());
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CountModel;

impl Command for CountModel {
    const CODE: CommandCode = CommandCode::CountModel;
    type Response = u16;

    fn serialize_request<B: BufMut>(&self, _dst: &mut B) {}

    fn deserialize_response(mut payload: &[u8]) -> Result<u16> {
        require(payload, 2)?;
        Ok(payload.get_u16())
    }
}

/// Read one page of the occupancy bitmap.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReadIndexTable {
    pub page: u8,
}

impl Command for ReadIndexTable {
    const CODE: CommandCode = CommandCode::ReadIndexTable;
    type Response = IndexTable;

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.page);
    }

    fn deserialize_response(payload: &[u8]) -> Result<IndexTable> {
        IndexTable::from_bytes(payload)
    }
}

/// Configure the ring LED. `cycles == 0` repeats forever.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetLedConfig {
    pub mode: LedMode,
    pub speed: u8,
    pub color: LedColor,
    pub cycles: u8,
}

impl Command for SetLedConfig {
    const CODE: CommandCode = CommandCode::SetLedConfig;
    type Response = ();

    fn serialize_request<B: BufMut>(&self, dst: &mut B) {
        dst.put_u8(self.mode as u8);
        dst.put_u8(self.speed);
        dst.put_u8(self.color as u8);
        dst.put_u8(self.cycles);
    }

    fn deserialize_response(_payload: &[u8]) -> Result<()> {
        Ok(())
    }
}
