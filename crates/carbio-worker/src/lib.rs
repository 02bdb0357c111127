//! Real-time command scheduling for a fingerprint sensor.
//!
//! A single worker thread owns the sensor. Callers submit prioritised
//! commands through a [`SensorHandle`] and get results back through lock-free
//! buffers, a blocking enrollment queue and an async event channel.

pub mod command;
pub mod config;
pub mod events;
pub mod polling;
pub mod queue;
pub mod results;
pub mod scheduler;
pub mod sync;

pub use command::{CommandKind, Priority, SensorAction, SensorCommand};
pub use config::{AdminPolicy, PollingConfig, WorkerConfig};
pub use events::SensorEvent;
pub use polling::{AdaptivePoller, PollingMode};
pub use queue::PriorityCommandQueue;
pub use results::{AdminResult, AuthResult, EnrollmentStageResult, ScanResult, VerifyResult};
pub use scheduler::{SensorHandle, SensorWorker};
