//! Sensor I/O for the Carbio fingerprint subsystem.
//!
//! This crate turns the pure protocol types into blocking exchanges with a
//! real device:
//!
//! - [`Transport`]: the byte-level, timeout-bounded contract
//! - [`SerialTransport`]: the POSIX UART implementation (`select(2)` on a
//!   non-blocking descriptor)
//! - [`CommandExecutor`]: one synchronous `execute` per typed command, plus
//!   the chunked data phase of template and image transfers
//! - [`FingerprintSensor`]: one method per sensor operation, with auto-baud
//!   detection on open
//!
//! # Design Philosophy
//!
//! - **Synchronous**: everything here blocks the calling thread for at most
//!   the configured per-call timeout. The worker thread is the only caller.
//! - **Short counts, not errors**: transports report how many bytes moved;
//!   the executor turns short counts into `Timeout` or `FrameError`.
//! - **No retries**: every failure aborts the current command only. Retry
//!   policy belongs to the scheduler.
//!
//! # Mock Implementations
//!
//! With the `mock` feature (on by default) the [`mock`] module provides a
//! scriptable in-memory transport and a simulated sensor that can stand in
//! for the hardware in tests and demos.

pub mod executor;
#[cfg(feature = "mock")]
pub mod mock;
pub mod sensor;
#[cfg(unix)]
pub mod serial;
pub mod transport;

pub use executor::{CommandExecutor, MAX_TRANSFER_SIZE};
pub use sensor::FingerprintSensor;
#[cfg(unix)]
pub use serial::SerialTransport;
pub use transport::Transport;
