//! Core constants for the fingerprint sensor protocol.
//!
//! This module defines the wire-level constants used by every Carbio crate:
//! frame layout, payload limits, fixed response sizes and the defaults the
//! sensor ships with.
//!
//! # Frame Structure
//!
//! Every exchange with the sensor uses the same big-endian frame:
//!
//! ```text
//! | tag (2) | address (4) | type (1) | length (2) | payload (length - 2) | checksum (2) |
//!   EF 01     FF FF FF FF    01         00 03        01                    00 05
//! ```
//!
//! Where:
//! - `tag` - Start code, always [`START_CODE`]
//! - `address` - Device address, [`DEFAULT_ADDRESS`] out of the box
//! - `type` - Frame type (command, data, acknowledge, end-data)
//! - `length` - Payload length plus the two checksum bytes
//! - `checksum` - `type + length_hi + length_lo + sum(payload)`, modulo 2^16
//!
//! # Usage
//!
//! ```
//! use carbio_core::constants::*;
//!
//! // Smallest well-formed frame: header, no payload, checksum
//! assert_eq!(MIN_FRAME_SIZE, HEADER_SIZE + CHECKSUM_SIZE);
//!
//! // Largest frame the codec will build
//! assert_eq!(MAX_FRAME_SIZE, HEADER_SIZE + MAX_PAYLOAD_SIZE + CHECKSUM_SIZE);
//! ```

// ============================================================================
// Frame Layout
// ============================================================================

/// Start code that opens every frame.
pub const START_CODE: u16 = 0xEF01;

/// Address every sensor answers to until reprogrammed.
pub const DEFAULT_ADDRESS: u32 = 0xFFFF_FFFF;

/// Bytes before the payload: tag, address, type and length.
pub const HEADER_SIZE: usize = 9;

/// Trailing checksum size in bytes.
pub const CHECKSUM_SIZE: usize = 2;

/// Offset of the big-endian length field inside the header.
pub const LENGTH_OFFSET: usize = 7;

/// Smallest buffer that can hold a frame.
pub const MIN_FRAME_SIZE: usize = HEADER_SIZE + CHECKSUM_SIZE;

/// Largest payload a single frame can carry.
pub const MAX_PAYLOAD_SIZE: usize = 256;

/// Largest encoded frame.
pub const MAX_FRAME_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_SIZE + CHECKSUM_SIZE;

// ============================================================================
// Fixed Response Sizes
// ============================================================================

/// Size of a character file / template in bytes.
pub const TEMPLATE_SIZE: usize = 512;

/// Size of one page of the template index bitmap.
pub const INDEX_TABLE_SIZE: usize = 32;

/// Size of the system parameter block returned by `read_system_parameter`.
pub const SYSTEM_PARAMETER_SIZE: usize = 16;

// ============================================================================
// Device Defaults
// ============================================================================

/// Default template library capacity.
pub const DEFAULT_CAPACITY: u16 = 127;

/// Default data packet length in bytes.
pub const DEFAULT_PACKET_LENGTH: usize = 128;

/// Default UART baud rate.
pub const DEFAULT_BAUD_RATE: u32 = 57_600;

/// Factory handshake password.
pub const DEFAULT_PASSWORD: u32 = 0;

/// Baud rate step; the sensor stores rates as multiples of this value.
pub const BAUD_RATE_UNIT: u32 = 9_600;

/// Order in which baud rates are probed when opening the sensor.
///
/// The factory default comes first, then the fastest rate, then the
/// remaining multiples of [`BAUD_RATE_UNIT`] in ascending order.
pub const BAUD_PROBE_ORDER: [u32; 12] = [
    57_600, 115_200, 9_600, 19_200, 28_800, 38_400, 48_000, 67_200, 76_800, 86_400, 96_000,
    105_600,
];

// ============================================================================
// Timing
// ============================================================================

/// Default per-I/O timeout in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 1000;

/// Delay after switching the line speed before talking to the sensor.
pub const BAUD_SETTLE_MS: u64 = 100;

// ============================================================================
// Environment
// ============================================================================

/// Serial device used when nothing else is configured.
pub const DEFAULT_SERIAL_PATH: &str = "/dev/ttyAMA0";

/// Environment variable that overrides [`DEFAULT_SERIAL_PATH`].
pub const SERIAL_PATH_ENV: &str = "CARBIO_SERIAL_PATH";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_bounds() {
        assert_eq!(MIN_FRAME_SIZE, 11);
        assert_eq!(MAX_FRAME_SIZE, 267);
        assert!(LENGTH_OFFSET + 2 == HEADER_SIZE);
    }

    #[test]
    fn test_probe_order_is_unique_multiples() {
        let mut seen = BAUD_PROBE_ORDER.to_vec();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), BAUD_PROBE_ORDER.len());
        assert!(BAUD_PROBE_ORDER.iter().all(|b| b % BAUD_RATE_UNIT == 0));
        assert_eq!(BAUD_PROBE_ORDER[0], DEFAULT_BAUD_RATE);
    }
}
