//! WebSocket Transport
//!
//! [`Transport`] adapter over `tokio-tungstenite`. Each `connect` opens one
//! socket for one (symbol, market) stream and spawns a pump task bridging it
//! to the session's channels.

mod client;
mod endpoint;

use std::time::{Duration, Instant};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Error as WsError;
use url::Url;

pub use endpoint::stream_url;

use crate::application::ports::{StreamConnection, StreamRequest, Transport, TransportError};
use crate::infrastructure::metrics;

/// Default path under the base URL.
pub const DEFAULT_STREAM_PATH: &str = "ws/prices";

/// Default connect timeout.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

const INBOUND_CAPACITY: usize = 1024;
const OUTBOUND_CAPACITY: usize = 16;

/// WebSocket implementation of the [`Transport`] port.
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    base_url: Url,
    stream_path: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    /// Create a transport rooted at `base_url`.
    #[must_use]
    pub fn new(base_url: Url) -> Self {
        Self {
            base_url,
            stream_path: DEFAULT_STREAM_PATH.to_string(),
            connect_timeout: DEFAULT_CONNECT_TIMEOUT,
        }
    }

    /// Use a custom stream path.
    #[must_use]
    pub fn with_stream_path(mut self, stream_path: impl Into<String>) -> Self {
        self.stream_path = stream_path.into();
        self
    }

    /// Use a custom connect timeout.
    #[must_use]
    pub const fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    /// URL a request would connect to.
    ///
    /// # Errors
    ///
    /// Returns `TransportError::InvalidEndpoint` for an unusable request.
    pub fn endpoint(&self, request: &StreamRequest) -> Result<Url, TransportError> {
        stream_url(&self.base_url, &self.stream_path, request)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, request: &StreamRequest) -> Result<StreamConnection, TransportError> {
        let url = self.endpoint(request)?;
        tracing::debug!(url = %url, "Connecting to price stream");

        let started = Instant::now();
        let (ws, _response) = tokio::time::timeout(
            self.connect_timeout,
            tokio_tungstenite::connect_async(url.as_str()),
        )
        .await
        .map_err(|_| TransportError::Timeout(self.connect_timeout))?
        .map_err(map_connect_error)?;
        metrics::record_connect_duration(started.elapsed());

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (inbound_tx, inbound_rx) = mpsc::channel(INBOUND_CAPACITY);
        tokio::spawn(client::pump(ws, outbound_rx, inbound_tx, request.to_string()));

        Ok(StreamConnection {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

fn map_connect_error(error: WsError) -> TransportError {
    match error {
        WsError::Io(e) => TransportError::Connect(e.to_string()),
        other => TransportError::WebSocket(other.to_string()),
    }
}
