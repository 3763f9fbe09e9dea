//! Heartbeat
//!
//! Keepalive scheduling and idle detection for a connected session. The
//! controller installs one heartbeat interval per connected stream; on each
//! tick it asks [`HeartbeatState::check`] whether to send a keepalive frame or
//! to treat the stream as silently dead.

use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::Instant;

/// Default keepalive period.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Default idle timeout. Zero leaves idle detection off; backends that never
/// answer keepalives would otherwise be reconnected on every quiet stretch.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::ZERO;

/// Default keepalive frame.
pub const DEFAULT_KEEPALIVE_FRAME: &str = "ping";

/// Configuration for heartbeat behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Interval between keepalive frames.
    pub interval: Duration,
    /// Maximum silence before the stream is considered dead (zero disables).
    pub idle_timeout: Duration,
    /// Text frame sent as keepalive.
    pub keepalive_frame: String,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_HEARTBEAT_INTERVAL,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            keepalive_frame: DEFAULT_KEEPALIVE_FRAME.to_string(),
        }
    }
}

impl HeartbeatConfig {
    /// Create a new configuration with custom timings.
    #[must_use]
    pub fn new(interval: Duration, idle_timeout: Duration) -> Self {
        Self {
            interval,
            idle_timeout,
            ..Self::default()
        }
    }

    /// Use a custom keepalive frame.
    #[must_use]
    pub fn with_keepalive_frame(mut self, frame: impl Into<String>) -> Self {
        self.keepalive_frame = frame.into();
        self
    }
}

/// Action for one heartbeat tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatAction {
    /// Send a keepalive frame.
    SendKeepalive,
    /// No inbound frame within the idle timeout.
    IdleTimeout,
}

/// Inbound activity tracking for one stream.
#[derive(Debug)]
pub struct HeartbeatState {
    last_inbound: RwLock<Instant>,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self::new()
    }
}

impl HeartbeatState {
    /// Create new heartbeat state, counting from now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_inbound: RwLock::new(Instant::now()),
        }
    }

    /// Record that an inbound frame arrived.
    pub fn record_inbound(&self) {
        *self.last_inbound.write() = Instant::now();
    }

    /// Time since the last inbound frame.
    #[must_use]
    pub fn time_since_inbound(&self) -> Duration {
        self.last_inbound.read().elapsed()
    }

    /// Decide what a tick should do.
    #[must_use]
    pub fn check(&self, config: &HeartbeatConfig) -> HeartbeatAction {
        if !config.idle_timeout.is_zero() && self.time_since_inbound() > config.idle_timeout {
            HeartbeatAction::IdleTimeout
        } else {
            HeartbeatAction::SendKeepalive
        }
    }
}
