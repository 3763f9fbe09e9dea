#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements,
        clippy::future_not_send
    )
)]

//! Live Price Stream - Subscription Lifecycle Manager
//!
//! Opens, maintains and tears down live price streams for logical
//! subscribers. Each subscriber holds at most one session; switching symbols
//! fully tears the previous session down before the next one opens, and
//! events from superseded sessions are discarded by token comparison.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Pure lifecycle logic
//!   - `registry`: Tracks every live resource so teardown is total
//!   - `session`: Tokens, staleness guard, frames, state machine, reconnect policy
//!
//! - **Application**: Use cases and port definitions
//!   - `ports`: Transport interface for price streams
//!   - `services`: Connection controller, session manager, heartbeat, throttle
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `websocket`: tokio-tungstenite transport
//!   - `config`: Environment configuration
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`, `telemetry`: Observability
//!
//! # Data Flow
//!
//! ```text
//! Backend WS ──► Transport ──► ConnectionController ──► SessionMachine
//!                                    │                       │
//!                                    │◄────── effects ───────┘
//!                                    ▼
//!                          PriceDispatcher (throttle) ──► subscriber callback
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Lifecycle types with no I/O.
pub mod domain;

/// Application layer - Use cases and port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::registry::{
    Registration, RegistrationInfo, Release, ResourceKind, SubscriptionRegistry,
};
pub use domain::session::{
    ConnectionState, Direction, ErrorClass, ErrorPolicy, PriceEvent, ReconnectConfig,
    SessionStatus, SessionToken, StalenessGuard, SubscriberId,
};

// Ports
pub use application::ports::{
    StreamConnection, StreamRequest, Transport, TransportError, TransportEvent,
};

// Services
pub use application::services::{
    ConnectionController, HeartbeatConfig, SessionConfig, SessionManager, SubscribeOptions,
    SubscriptionHandle,
};

// Infrastructure config
pub use infrastructure::config::{ConfigError, StreamConfig, SymbolSubscription};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// WebSocket transport
pub use infrastructure::websocket::WebSocketTransport;

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
