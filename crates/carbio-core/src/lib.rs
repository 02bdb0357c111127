pub mod config;
pub mod constants;
pub mod error;
pub mod secure;

pub use config::SensorConfig;
pub use error::{Error, Result, StatusCode};
pub use secure::{SecureBuffer, Sensitive};

/// Version info
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
