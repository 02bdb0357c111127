//! Error types shared by every Carbio crate.
//!
//! Failures fall into two groups. Anything that the sensor protocol itself can
//! express (a device NACK, a malformed frame, a short read) is carried as a
//! [`StatusCode`] inside [`Error::Status`], so callers can match on the exact
//! code regardless of which layer produced it. Everything else (OS serial
//! errors, bad arguments, configuration problems) gets its own variant.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Status byte reported by the sensor in an acknowledge frame.
///
/// The last two codes never appear on the wire: `BadPacket` and `Timeout`
/// are produced on the host when a frame is malformed or an I/O call runs
/// out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum StatusCode {
    Success = 0x00,
    FrameError = 0x01,
    NoFinger = 0x02,
    ImageCaptureError = 0x03,
    ImageTooFaint = 0x04,
    ImageTooBlurry = 0x05,
    ImageTooDistorted = 0x06,
    ImageTooFewFeatures = 0x07,
    NoMatch = 0x08,
    NotFound = 0x09,
    EnrollmentMismatch = 0x0A,
    IndexOutOfRange = 0x0B,
    DatabaseAccessError = 0x0C,
    FeatureUploadFailed = 0x0D,
    NoFrame = 0x0E,
    ImageUploadFailed = 0x0F,
    EraseFailed = 0x10,
    DatabaseClearFailed = 0x11,
    CannotEnterLowPowerMode = 0x12,
    PermissionDenied = 0x13,
    InvalidImageFormat = 0x15,
    FlashWriteError = 0x18,
    UnknownError = 0x19,
    IllegalDeviceRegister = 0x1A,
    InvalidDeviceConfiguration = 0x1B,
    CommunicationError = 0x1D,
    DatabaseFull = 0x1F,
    IllegalDeviceAddress = 0x20,
    DeviceAuthorizationRequired = 0x21,
    HardwareFault = 0x29,
    BadPacket = 0xFE,
    Timeout = 0xFF,
}

impl StatusCode {
    /// Decode a status byte. Bytes the sensor is not documented to send map
    /// to [`StatusCode::UnknownError`].
    pub fn from_u8(value: u8) -> Self {
        match value {
            0x00 => Self::Success,
            0x01 => Self::FrameError,
            0x02 => Self::NoFinger,
            0x03 => Self::ImageCaptureError,
            0x04 => Self::ImageTooFaint,
            0x05 => Self::ImageTooBlurry,
            0x06 => Self::ImageTooDistorted,
            0x07 => Self::ImageTooFewFeatures,
            0x08 => Self::NoMatch,
            0x09 => Self::NotFound,
            0x0A => Self::EnrollmentMismatch,
            0x0B => Self::IndexOutOfRange,
            0x0C => Self::DatabaseAccessError,
            0x0D => Self::FeatureUploadFailed,
            0x0E => Self::NoFrame,
            0x0F => Self::ImageUploadFailed,
            0x10 => Self::EraseFailed,
            0x11 => Self::DatabaseClearFailed,
            0x12 => Self::CannotEnterLowPowerMode,
            0x13 => Self::PermissionDenied,
            0x15 => Self::InvalidImageFormat,
            0x18 => Self::FlashWriteError,
            0x1A => Self::IllegalDeviceRegister,
            0x1B => Self::InvalidDeviceConfiguration,
            0x1D => Self::CommunicationError,
            0x1F => Self::DatabaseFull,
            0x20 => Self::IllegalDeviceAddress,
            0x21 => Self::DeviceAuthorizationRequired,
            0x29 => Self::HardwareFault,
            0xFE => Self::BadPacket,
            0xFF => Self::Timeout,
            _ => Self::UnknownError,
        }
    }

    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    #[inline]
    pub fn is_success(self) -> bool {
        self == Self::Success
    }

    /// Returns `true` for conditions a polling loop should shrug off and retry
    /// on the next tick: link noise and poor-quality images.
    ///
    /// `NoFinger` is deliberately absent; pollers handle it as the idle case.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::FrameError
                | Self::Timeout
                | Self::BadPacket
                | Self::CommunicationError
                | Self::HardwareFault
                | Self::ImageCaptureError
                | Self::ImageTooFaint
                | Self::ImageTooBlurry
                | Self::ImageTooDistorted
                | Self::ImageTooFewFeatures
        )
    }

    /// Returns `true` if the sensor looked at a finger and found nobody.
    pub fn is_unrecognized(self) -> bool {
        matches!(self, Self::NoMatch | Self::NotFound)
    }

    /// Short snake_case name, handy for logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::FrameError => "frame_error",
            Self::NoFinger => "no_finger",
            Self::ImageCaptureError => "image_capture_error",
            Self::ImageTooFaint => "image_too_faint",
            Self::ImageTooBlurry => "image_too_blurry",
            Self::ImageTooDistorted => "image_too_distorted",
            Self::ImageTooFewFeatures => "image_too_few_features",
            Self::NoMatch => "no_match",
            Self::NotFound => "not_found",
            Self::EnrollmentMismatch => "enrollment_mismatch",
            Self::IndexOutOfRange => "index_out_of_range",
            Self::DatabaseAccessError => "database_access_error",
            Self::FeatureUploadFailed => "feature_upload_failed",
            Self::NoFrame => "no_frame",
            Self::ImageUploadFailed => "image_upload_failed",
            Self::EraseFailed => "erase_failed",
            Self::DatabaseClearFailed => "database_clear_failed",
            Self::CannotEnterLowPowerMode => "cannot_enter_low_power_mode",
            Self::PermissionDenied => "permission_denied",
            Self::InvalidImageFormat => "invalid_image_format",
            Self::FlashWriteError => "flash_write_error",
            Self::UnknownError => "unknown_error",
            Self::IllegalDeviceRegister => "illegal_device_register",
            Self::InvalidDeviceConfiguration => "invalid_device_configuration",
            Self::CommunicationError => "communication_error",
            Self::DatabaseFull => "database_full",
            Self::IllegalDeviceAddress => "illegal_device_address",
            Self::DeviceAuthorizationRequired => "device_authorization_required",
            Self::HardwareFault => "hardware_fault",
            Self::BadPacket => "bad_packet",
            Self::Timeout => "timeout",
        }
    }

    /// Human-readable description.
    pub fn message(self) -> &'static str {
        match self {
            Self::Success => "Command completed",
            Self::FrameError => "Error receiving data frame",
            Self::NoFinger => "No finger on the sensor",
            Self::ImageCaptureError => "Failed to capture fingerprint image",
            Self::ImageTooFaint => "Fingerprint image too faint",
            Self::ImageTooBlurry => "Fingerprint image too blurry",
            Self::ImageTooDistorted => "Fingerprint image too distorted",
            Self::ImageTooFewFeatures => "Fingerprint image has too few features",
            Self::NoMatch => "Fingerprints do not match",
            Self::NotFound => "No matching fingerprint found",
            Self::EnrollmentMismatch => "Failed to combine character files",
            Self::IndexOutOfRange => "Page ID beyond the fingerprint library",
            Self::DatabaseAccessError => "Error reading template from library",
            Self::FeatureUploadFailed => "Error uploading template",
            Self::NoFrame => "Cannot receive the following data packet",
            Self::ImageUploadFailed => "Error uploading image",
            Self::EraseFailed => "Failed to delete template",
            Self::DatabaseClearFailed => "Failed to clear fingerprint library",
            Self::CannotEnterLowPowerMode => "Cannot enter low power mode",
            Self::PermissionDenied => "Wrong password",
            Self::InvalidImageFormat => "No valid primary image in buffer",
            Self::FlashWriteError => "Error writing flash",
            Self::UnknownError => "Unknown error",
            Self::IllegalDeviceRegister => "Invalid register number",
            Self::InvalidDeviceConfiguration => "Incorrect register configuration",
            Self::CommunicationError => "Communication port failure",
            Self::DatabaseFull => "Fingerprint library is full",
            Self::IllegalDeviceAddress => "Device address mismatch",
            Self::DeviceAuthorizationRequired => "Password must be verified",
            Self::HardwareFault => "Sensor hardware fault",
            Self::BadPacket => "Malformed packet",
            Self::Timeout => "Operation timed out",
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (0x{:02X})", self.message(), self.as_u8())
    }
}

impl From<StatusCode> for u8 {
    fn from(code: StatusCode) -> Self {
        code.as_u8()
    }
}

#[derive(Error, Debug)]
pub enum Error {
    /// Sensor-protocol failure: device NACK, malformed frame or I/O timeout.
    #[error("{0}")]
    Status(StatusCode),

    #[error("Serial port error: {0}")]
    Serial(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Device not open")]
    NotOpen,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a new invalid argument error.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }

    /// Create a new serial port error.
    pub fn serial(message: impl Into<String>) -> Self {
        Self::Serial(message.into())
    }

    /// The protocol status carried by this error, if any.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Status(code) => Some(*code),
            _ => None,
        }
    }

    /// Returns `true` if this error carries exactly `code`.
    pub fn is(&self, code: StatusCode) -> bool {
        self.status() == Some(code)
    }

    /// Returns `true` if a polling loop may retry after this error.
    pub fn is_transient(&self) -> bool {
        self.status().is_some_and(StatusCode::is_transient)
    }
}

impl From<StatusCode> for Error {
    fn from(code: StatusCode) -> Self {
        Self::Status(code)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x00, StatusCode::Success)]
    #[case(0x02, StatusCode::NoFinger)]
    #[case(0x09, StatusCode::NotFound)]
    #[case(0x20, StatusCode::IllegalDeviceAddress)]
    #[case(0x29, StatusCode::HardwareFault)]
    #[case(0xFE, StatusCode::BadPacket)]
    #[case(0xFF, StatusCode::Timeout)]
    fn test_status_from_u8(#[case] byte: u8, #[case] expected: StatusCode) {
        assert_eq!(StatusCode::from_u8(byte), expected);
        assert_eq!(expected.as_u8(), byte);
    }

    #[rstest]
    #[case(0x14)]
    #[case(0x16)]
    #[case(0x80)]
    fn test_undocumented_status_is_unknown(#[case] byte: u8) {
        assert_eq!(StatusCode::from_u8(byte), StatusCode::UnknownError);
    }

    #[test]
    fn test_every_code_roundtrips() {
        for byte in 0..=u8::MAX {
            let code = StatusCode::from_u8(byte);
            if code != StatusCode::UnknownError {
                assert_eq!(code.as_u8(), byte);
            }
        }
    }

    #[rstest]
    #[case(StatusCode::Timeout, true)]
    #[case(StatusCode::ImageTooBlurry, true)]
    #[case(StatusCode::HardwareFault, true)]
    #[case(StatusCode::NoFinger, false)]
    #[case(StatusCode::NoMatch, false)]
    #[case(StatusCode::PermissionDenied, false)]
    fn test_transient_classification(#[case] code: StatusCode, #[case] transient: bool) {
        assert_eq!(code.is_transient(), transient);
        assert_eq!(Error::from(code).is_transient(), transient);
    }

    #[test]
    fn test_error_display() {
        let err = Error::from(StatusCode::Timeout);
        assert_eq!(err.to_string(), "Operation timed out (0xFF)");

        let err = Error::invalid_argument("page id out of range");
        assert_eq!(err.to_string(), "Invalid argument: page id out of range");
    }

    #[test]
    fn test_error_status_accessor() {
        assert!(Error::from(StatusCode::BadPacket).is(StatusCode::BadPacket));
        assert_eq!(Error::NotOpen.status(), None);
        assert!(!Error::serial("gone").is_transient());
    }
}
