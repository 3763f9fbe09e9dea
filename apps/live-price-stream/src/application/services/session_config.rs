//! Session Configuration
//!
//! Library-level settings shared by every session a manager creates.

use std::time::Duration;

use super::heartbeat::HeartbeatConfig;
use super::throttle::{DEFAULT_MAX_UPDATE_HZ, window_for_hz};
use crate::domain::session::machine::DEFAULT_TERMINAL_CODE;
use crate::domain::session::{ErrorPolicy, ReconnectConfig};

/// Settings for live-price sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Keepalive and idle detection.
    pub heartbeat: HeartbeatConfig,
    /// Automatic reconnect schedule.
    pub reconnect: ReconnectConfig,
    /// Maximum callback frequency (0 disables coalescing).
    pub max_update_hz: u32,
    /// Backend error codes that halt automatic reconnects.
    pub terminal_error_codes: Vec<String>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            reconnect: ReconnectConfig::default(),
            max_update_hz: DEFAULT_MAX_UPDATE_HZ,
            terminal_error_codes: vec![DEFAULT_TERMINAL_CODE.to_string()],
        }
    }
}

impl SessionConfig {
    /// Use a custom heartbeat.
    #[must_use]
    pub fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Use a custom reconnect schedule.
    #[must_use]
    pub fn with_reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Use a fixed reconnect delay.
    #[must_use]
    pub fn with_reconnect_delay(self, delay: Duration) -> Self {
        self.with_reconnect(ReconnectConfig::fixed(delay))
    }

    /// Cap callback frequency.
    #[must_use]
    pub const fn with_max_update_hz(mut self, max_update_hz: u32) -> Self {
        self.max_update_hz = max_update_hz;
        self
    }

    /// Replace the terminal error codes.
    #[must_use]
    pub fn with_terminal_error_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.terminal_error_codes = codes.into_iter().map(Into::into).collect();
        self
    }

    /// Error classification for these settings.
    #[must_use]
    pub fn error_policy(&self) -> ErrorPolicy {
        ErrorPolicy::new(self.terminal_error_codes.iter().cloned())
    }

    /// Rate-limit window.
    #[must_use]
    pub fn throttle_window(&self) -> Duration {
        window_for_hz(self.max_update_hz)
    }
}
