//! Application Layer - Use cases and port definitions.
//!
//! This layer drives the domain state machine against the transport port:
//! it opens streams, installs heartbeats, schedules reconnects and
//! rate-limits delivery to subscribers.

/// Port interfaces for external systems (price stream transport).
pub mod ports;

/// Session controller, session manager and dispatch services.
pub mod services;
