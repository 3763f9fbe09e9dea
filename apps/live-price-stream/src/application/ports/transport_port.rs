//! Transport Port (Driven Port)
//!
//! Interface for opening one live price stream. A successful `connect` is
//! the open signal; afterwards the session talks to the stream only through
//! the returned channel pair.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

/// Address of one price stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StreamRequest {
    /// Instrument symbol (e.g., "AAPL", "BTC/USD").
    pub symbol: String,
    /// Market / venue (e.g., "US").
    pub market: String,
}

impl StreamRequest {
    /// Create a new stream request.
    pub fn new(symbol: impl Into<String>, market: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            market: market.into(),
        }
    }
}

impl fmt::Display for StreamRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.symbol, self.market)
    }
}

/// Event produced by an open stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// Text frame, undecoded.
    Frame(String),
    /// Socket-level error. A `Closed` event follows.
    Error(String),
    /// The stream closed.
    Closed,
}

/// An open stream.
///
/// Dropping both channel ends closes the underlying connection.
#[derive(Debug)]
pub struct StreamConnection {
    /// Outbound frames (keepalives).
    pub outbound: mpsc::Sender<String>,
    /// Inbound events.
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Transport error.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The endpoint could not be built for the request.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Connection could not be established.
    #[error("connection failed: {0}")]
    Connect(String),

    /// Connection was not established in time.
    #[error("connection timed out after {0:?}")]
    Timeout(Duration),

    /// The handshake or protocol failed.
    #[error("websocket error: {0}")]
    WebSocket(String),
}

/// Port for opening live price streams.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Open the stream addressed by `request`.
    async fn connect(&self, request: &StreamRequest) -> Result<StreamConnection, TransportError>;
}
