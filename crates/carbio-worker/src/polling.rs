//! Adaptive authentication polling interval.
//!
//! ```text
//!            failure                 window elapsed
//!  Normal ─────────────► Burst ─────────────────────► Fast
//!    ▲                     │ failure (restart window)   │
//!    │                     ▼                            │
//!    └──────────── success or stop ◄────────────────────┘
//! ```
//!
//! Time is passed in rather than read from the clock so the transitions can
//! be tested without sleeping.

use crate::config::PollingConfig;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PollingMode {
    Normal,
    Burst,
    Fast,
}

#[derive(Debug, Clone)]
pub struct AdaptivePoller {
    config: PollingConfig,
    last_failure: Option<Instant>,
}

impl AdaptivePoller {
    pub fn new(config: PollingConfig) -> Self {
        Self {
            config,
            last_failure: None,
        }
    }

    /// Record a failed attempt at `now`. Restarts the burst window.
    pub fn record_failure(&mut self, now: Instant) {
        self.last_failure = Some(now);
    }

    /// Back to standby after a success or an explicit stop.
    pub fn reset(&mut self) {
        self.last_failure = None;
    }

    pub fn mode(&self, now: Instant) -> PollingMode {
        match self.last_failure {
            None => PollingMode::Normal,
            Some(at) if now.saturating_duration_since(at) < self.config.burst_window() => {
                PollingMode::Burst
            }
            Some(_) => PollingMode::Fast,
        }
    }

    pub fn interval(&self, now: Instant) -> Duration {
        match self.mode(now) {
            PollingMode::Normal => self.config.normal(),
            PollingMode::Burst => self.config.burst(),
            PollingMode::Fast => self.config.fast(),
        }
    }
}
