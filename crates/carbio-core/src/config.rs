//! Sensor connection settings.

use crate::constants::{
    BAUD_PROBE_ORDER, BAUD_SETTLE_MS, DEFAULT_ADDRESS, DEFAULT_PASSWORD, DEFAULT_SERIAL_PATH,
    DEFAULT_TIMEOUT_MS, SERIAL_PATH_ENV,
};
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// How to reach the sensor.
///
/// # Examples
///
/// ```
/// use carbio_core::SensorConfig;
/// use std::time::Duration;
///
/// let config = SensorConfig::default()
///     .with_path("/dev/ttyUSB0")
///     .with_timeout(Duration::from_millis(250));
///
/// assert_eq!(config.path, "/dev/ttyUSB0");
/// assert_eq!(config.timeout(), Duration::from_millis(250));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Serial device node.
    pub path: String,

    /// Address placed in outgoing frames and expected in replies.
    pub address: u32,

    /// Handshake password verified while probing.
    pub password: u32,

    /// Timeout applied to every single read or write call.
    pub timeout_ms: u64,

    /// Pause after changing the line speed.
    pub settle_ms: u64,

    /// Baud rates tried, in order, when opening the sensor.
    pub baud_rates: Vec<u32>,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            path: DEFAULT_SERIAL_PATH.to_string(),
            address: DEFAULT_ADDRESS,
            password: DEFAULT_PASSWORD,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            settle_ms: BAUD_SETTLE_MS,
            baud_rates: BAUD_PROBE_ORDER.to_vec(),
        }
    }
}

impl SensorConfig {
    /// Defaults, with the device path taken from `CARBIO_SERIAL_PATH` when set.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Ok(path) = std::env::var(SERIAL_PATH_ENV)
            && !path.trim().is_empty()
        {
            config.path = path;
        }
        config
    }

    /// Load a JSON config file. Missing keys fall back to defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.path.is_empty() {
            return Err(Error::Config("serial path is empty".to_string()));
        }
        if self.timeout_ms == 0 {
            return Err(Error::Config("timeout_ms must be positive".to_string()));
        }
        if self.baud_rates.is_empty() {
            return Err(Error::Config("baud_rates is empty".to_string()));
        }
        Ok(())
    }

    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    pub fn with_address(mut self, address: u32) -> Self {
        self.address = address;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_settle_delay(mut self, delay: Duration) -> Self {
        self.settle_ms = delay.as_millis() as u64;
        self
    }

    pub fn with_baud_rates(mut self, rates: impl Into<Vec<u32>>) -> Self {
        self.baud_rates = rates.into();
        self
    }

    #[inline]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    #[inline]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SensorConfig::default();
        assert_eq!(config.path, "/dev/ttyAMA0");
        assert_eq!(config.address, 0xFFFF_FFFF);
        assert_eq!(config.timeout(), Duration::from_secs(1));
        assert_eq!(config.baud_rates[0], 57_600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = SensorConfig::from_json(r#"{"path": "/dev/ttyS1", "timeout_ms": 50}"#).unwrap();
        assert_eq!(config.path, "/dev/ttyS1");
        assert_eq!(config.timeout_ms, 50);
        assert_eq!(config.settle_ms, 100);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let err = SensorConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = SensorConfig::from_json(r#"{"baud_rates": []}"#).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
