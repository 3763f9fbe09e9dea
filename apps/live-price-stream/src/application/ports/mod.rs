//! Port Interfaces
//!
//! Defines the interfaces (ports) for external systems following
//! the Hexagonal Architecture pattern. These are the contracts that
//! infrastructure adapters must implement.
//!
//! ## Driven Ports (Outbound)
//!
//! - `Transport`: One bidirectional message stream per (symbol, market)

mod transport_port;

pub use transport_port::{
    StreamConnection, StreamRequest, Transport, TransportError, TransportEvent,
};
