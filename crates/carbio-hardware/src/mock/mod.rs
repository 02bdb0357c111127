//! Mock transports for testing and development.
//!
//! This module provides an in-memory replacement for the serial line and a
//! simulated sensor that answers on it, so the whole stack above the
//! transport can run without hardware.

pub mod sensor;
pub mod transport;

pub use sensor::{LedState, SimulatedSensor, SimulatedSensorHandle};
pub use transport::{MockDevice, MockTransport, MockTransportHandle};
