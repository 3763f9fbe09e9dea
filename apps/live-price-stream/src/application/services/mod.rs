//! Application Services
//!
//! Services that drive the session state machine against the transport.
//!
//! - `SessionManager`: One-session-per-subscriber facade
//! - `ConnectionController`: Executes session effects (stream, heartbeat, reconnect)
//! - `PriceDispatcher`: Leading+trailing rate-limited delivery
//! - `HeartbeatConfig`: Keepalive and idle detection

pub mod controller;
pub mod heartbeat;
pub mod manager;
pub mod session_config;
pub mod throttle;

pub use controller::ConnectionController;
pub use heartbeat::{HeartbeatAction, HeartbeatConfig, HeartbeatState};
pub use manager::{SessionManager, SubscribeOptions, SubscriptionHandle};
pub use session_config::SessionConfig;
pub use throttle::{Offer, PriceCallback, PriceDispatcher, Throttle};
