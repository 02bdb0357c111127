//! Worker tuning: tick rate, polling intervals and admin policy.
//!
//! Every duration is stored in milliseconds so the config reads naturally as
//! JSON. Accessors convert to [`Duration`].

use carbio_core::{Error, Result, constants::DEFAULT_CAPACITY};
use serde::{Deserialize, Serialize};
use std::ops::RangeInclusive;
use std::path::Path;
use std::time::Duration;

/// Adaptive authentication polling intervals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Standby interval.
    pub normal_ms: u64,
    /// Interval right after a failed attempt.
    pub burst_ms: u64,
    /// Interval once the burst window has elapsed without success.
    pub fast_ms: u64,
    /// How long burst mode lasts after a failure.
    pub burst_window_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            normal_ms: 5,
            burst_ms: 1,
            fast_ms: 3,
            burst_window_ms: 2000,
        }
    }
}

impl PollingConfig {
    pub fn normal(&self) -> Duration {
        Duration::from_millis(self.normal_ms)
    }

    pub fn burst(&self) -> Duration {
        Duration::from_millis(self.burst_ms)
    }

    pub fn fast(&self) -> Duration {
        Duration::from_millis(self.fast_ms)
    }

    pub fn burst_window(&self) -> Duration {
        Duration::from_millis(self.burst_window_ms)
    }
}

/// Which matches count as an administrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminPolicy {
    pub min_id: u16,
    pub max_id: u16,
    pub min_confidence: u16,
}

impl Default for AdminPolicy {
    fn default() -> Self {
        Self {
            min_id: 0,
            max_id: 2,
            min_confidence: 150,
        }
    }
}

impl AdminPolicy {
    pub fn ids(&self) -> RangeInclusive<u16> {
        self.min_id..=self.max_id
    }

    /// Returns `true` if a match on `id` with `confidence` grants admin access.
    pub fn accepts(&self, id: u16, confidence: u16) -> bool {
        self.ids().contains(&id) && confidence >= self.min_confidence
    }
}

/// Configuration for [`SensorWorker`](crate::SensorWorker).
///
/// # Examples
///
/// ```
/// use carbio_worker::WorkerConfig;
/// use std::time::Duration;
///
/// let config = WorkerConfig::default().with_admin_deadline(Duration::from_secs(5));
/// assert_eq!(config.polling.normal(), Duration::from_millis(5));
/// assert_eq!(config.admin_poll_deadline(), Duration::from_secs(5));
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Command processor tick.
    pub tick_ms: u64,
    pub polling: PollingConfig,
    /// Capture interval for enroll, find, identify and verify.
    pub operation_poll_ms: u64,
    pub admin_poll_ms: u64,
    /// Admin polling stops on its own after this long without a finger.
    pub admin_poll_deadline_ms: u64,
    pub admin: AdminPolicy,
    /// Highest template ID accepted by enroll and delete.
    pub max_template_id: u16,
    /// Bound on undelivered events before new ones are dropped.
    pub event_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            tick_ms: 1,
            polling: PollingConfig::default(),
            operation_poll_ms: 3,
            admin_poll_ms: 3,
            admin_poll_deadline_ms: 10_000,
            admin: AdminPolicy::default(),
            max_template_id: DEFAULT_CAPACITY,
            event_capacity: 256,
        }
    }
}

impl WorkerConfig {
    pub fn from_json(raw: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(raw).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.tick_ms == 0 {
            return Err(Error::Config("tick_ms must be positive".into()));
        }
        if self.polling.normal_ms == 0 || self.polling.burst_ms == 0 || self.polling.fast_ms == 0 {
            return Err(Error::Config("polling intervals must be positive".into()));
        }
        if self.admin.min_id > self.admin.max_id {
            return Err(Error::Config("admin id range is empty".into()));
        }
        if self.max_template_id == 0 {
            return Err(Error::Config("max_template_id must be positive".into()));
        }
        if self.event_capacity == 0 {
            return Err(Error::Config("event_capacity must be positive".into()));
        }
        Ok(())
    }

    pub fn with_polling(mut self, polling: PollingConfig) -> Self {
        self.polling = polling;
        self
    }

    pub fn with_admin_policy(mut self, admin: AdminPolicy) -> Self {
        self.admin = admin;
        self
    }

    pub fn with_admin_deadline(mut self, deadline: Duration) -> Self {
        self.admin_poll_deadline_ms = deadline.as_millis() as u64;
        self
    }

    pub fn with_max_template_id(mut self, id: u16) -> Self {
        self.max_template_id = id;
        self
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn operation_poll_interval(&self) -> Duration {
        Duration::from_millis(self.operation_poll_ms)
    }

    pub fn admin_poll_interval(&self) -> Duration {
        Duration::from_millis(self.admin_poll_ms)
    }

    pub fn admin_poll_deadline(&self) -> Duration {
        Duration::from_millis(self.admin_poll_deadline_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::default();
        assert_eq!(config.tick(), Duration::from_millis(1));
        assert_eq!(config.polling.burst_window(), Duration::from_secs(2));
        assert_eq!(config.operation_poll_interval(), Duration::from_millis(3));
        assert_eq!(config.max_template_id, 127);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let config = WorkerConfig::from_json(r#"{"polling": {"burst_ms": 2}, "max_template_id": 50}"#)
            .unwrap();
        assert_eq!(config.polling.burst_ms, 2);
        assert_eq!(config.polling.normal_ms, 5);
        assert_eq!(config.max_template_id, 50);
    }

    #[rstest]
    #[case(r#"{"tick_ms": 0}"#)]
    #[case(r#"{"polling": {"fast_ms": 0}}"#)]
    #[case(r#"{"admin": {"min_id": 5, "max_id": 1}}"#)]
    #[case(r#"{"max_template_id": 0}"#)]
    #[case("not json")]
    fn test_rejects_bad_config(#[case] raw: &str) {
        assert!(matches!(WorkerConfig::from_json(raw), Err(Error::Config(_))));
    }

    #[rstest]
    #[case(0, 150, true)]
    #[case(2, 200, true)]
    #[case(3, 200, false)]
    #[case(1, 149, false)]
    fn test_admin_policy(#[case] id: u16, #[case] confidence: u16, #[case] accepted: bool) {
        assert_eq!(AdminPolicy::default().accepts(id, confidence), accepted);
    }
}
