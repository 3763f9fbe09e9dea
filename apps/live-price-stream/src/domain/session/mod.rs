//! Session Domain Types
//!
//! Core types for one live-price session: the monotonically issued session
//! token, connection state, price direction and the immutable price event
//! delivered to subscribers.
//!
//! # Modules
//!
//! - `guard`: Staleness guard comparing captured tokens to the current one
//! - `frame`: Inbound wire frames (`connected`, `price`, `error`)
//! - `machine`: Pure connection state machine returning effects
//! - `reconnect`: Reconnect delay policy

pub mod frame;
pub mod guard;
pub mod machine;
pub mod reconnect;

use std::fmt;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use uuid::Uuid;

pub use frame::{ErrorFrame, FrameError, InboundFrame, PriceFrame};
pub use guard::StalenessGuard;
pub use machine::{Effect, ErrorClass, ErrorPolicy, SessionInput, SessionMachine};
pub use reconnect::{ReconnectConfig, ReconnectPolicy};

// =============================================================================
// Identity
// =============================================================================

/// Token identifying one connect attempt.
///
/// Tokens are issued in strictly increasing order per subscriber, so a late
/// event carrying an older token can always be recognised as stale.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionToken(u64);

impl SessionToken {
    pub(crate) const fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw token value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Identity of one logical subscriber (for example, one chart cell).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    /// Generate a fresh random subscriber id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =============================================================================
// State
// =============================================================================

/// Connection state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    /// Not connected (initial, after stop, or waiting to reconnect).
    #[default]
    Disconnected,
    /// Transport is being opened.
    Connecting,
    /// Transport is open and the session is current.
    Connected,
    /// Transport error or terminal backend error.
    Error,
}

impl ConnectionState {
    /// Lowercase state name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price movement relative to the previous accepted price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Price rose.
    Up,
    /// Price fell.
    Down,
    /// Price unchanged, or no previous price.
    #[default]
    Unchanged,
}

impl Direction {
    /// Compare a new price to the previous one.
    #[must_use]
    pub fn between(previous: Option<Decimal>, current: Decimal) -> Self {
        match previous {
            Some(prev) if current > prev => Self::Up,
            Some(prev) if current < prev => Self::Down,
            _ => Self::Unchanged,
        }
    }
}

// =============================================================================
// Price Event
// =============================================================================

/// Validated price update delivered to a subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[non_exhaustive]
pub struct PriceEvent {
    /// Instrument symbol of the session that produced the event.
    pub symbol: String,
    /// Last traded price.
    pub price: Decimal,
    /// Absolute change versus previous close.
    pub change: Option<Decimal>,
    /// Percentage change versus previous close.
    pub change_percent: Option<Decimal>,
    /// Session high.
    pub high: Option<Decimal>,
    /// Session low.
    pub low: Option<Decimal>,
    /// Session open.
    pub open: Option<Decimal>,
    /// Session volume.
    pub volume: Option<Decimal>,
    /// Previous session close.
    pub previous_close: Option<Decimal>,
    /// Event time (receipt time if the frame carried none).
    pub timestamp: DateTime<Utc>,
    /// Movement versus the previous accepted price.
    pub direction: Direction,
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SessionStatus {
    /// Instrument symbol.
    pub symbol: String,
    /// Market / venue.
    pub market: String,
    /// Connection state.
    pub state: ConnectionState,
    /// Last surfaced error, if any.
    pub last_error: Option<String>,
    /// Last accepted price.
    pub last_price: Option<Decimal>,
    /// Direction of the last accepted price.
    pub direction: Direction,
    /// Reconnects scheduled since the last successful open.
    pub reconnect_attempts: u32,
}
