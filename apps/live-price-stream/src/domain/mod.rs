//! Domain Layer - Subscription bookkeeping and session logic.
//!
//! This layer contains the registry of releasable resources and the pure
//! session types (tokens, state machine, frames). Nothing here performs I/O
//! or spawns tasks.

/// Keyed table of cleanup handles.
pub mod registry;

/// Session tokens, state machine and price events.
pub mod session;
