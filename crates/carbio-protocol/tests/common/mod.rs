//! Shared strategies and helpers for the protocol integration tests.

#![allow(dead_code)]

use carbio_protocol::{Frame, PacketId};
use proptest::prelude::*;

/// Any of the four frame types.
pub fn packet_id() -> impl Strategy<Value = PacketId> {
    prop_oneof![
        Just(PacketId::Command),
        Just(PacketId::Data),
        Just(PacketId::Acknowledge),
        Just(PacketId::EndData),
    ]
}

/// Payloads from empty up to the 256-byte frame limit.
pub fn payload() -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=256)
}

/// The four packet lengths the sensor can negotiate.
pub fn packet_length() -> impl Strategy<Value = usize> {
    prop_oneof![Just(32usize), Just(64), Just(128), Just(256)]
}

/// Encode frames back to back into one byte stream.
pub fn encode_all(frames: &[Frame]) -> Vec<u8> {
    frames.iter().flat_map(|f| f.to_bytes().to_vec()).collect()
}
