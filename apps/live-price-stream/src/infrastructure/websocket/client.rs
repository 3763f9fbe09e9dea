//! WebSocket Pump
//!
//! Bridges an open WebSocket to the session's channel pair. The pump
//! forwards text frames inbound, writes outbound frames, answers pings, and
//! closes the socket once the session drops either channel end.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::application::ports::TransportEvent;

/// Open WebSocket stream as returned by `connect_async`.
pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Run until the socket ends or the session releases the stream.
pub async fn pump(
    ws: WsStream,
    mut outbound: mpsc::Receiver<String>,
    inbound: mpsc::Sender<TransportEvent>,
    label: String,
) {
    let (mut write, mut read) = ws.split();

    loop {
        tokio::select! {
            () = inbound.closed() => {
                tracing::debug!(stream = %label, "Session released stream, closing socket");
                let _ = write.send(Message::Close(None)).await;
                return;
            }
            frame = outbound.recv() => {
                let Some(text) = frame else {
                    tracing::debug!(stream = %label, "Outbound channel closed, closing socket");
                    let _ = write.send(Message::Close(None)).await;
                    return;
                };
                if let Err(e) = write.send(Message::Text(text.into())).await {
                    let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                    break;
                }
            }
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if inbound.send(TransportEvent::Frame(text.as_str().to_string())).await.is_err() {
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Binary(bytes))) => {
                        // Some backends send JSON as binary frames.
                        let Ok(text) = std::str::from_utf8(&bytes) else {
                            continue;
                        };
                        if inbound.send(TransportEvent::Frame(text.to_string())).await.is_err() {
                            let _ = write.send(Message::Close(None)).await;
                            return;
                        }
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if let Err(e) = write.send(Message::Pong(data)).await {
                            let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                            break;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(stream = %label, frame = ?frame, "Server sent close frame");
                        break;
                    }
                    Some(Ok(_)) => {
                        // Pong and raw frames
                    }
                    Some(Err(e)) => {
                        tracing::warn!(stream = %label, error = %e, "WebSocket error");
                        let _ = inbound.send(TransportEvent::Error(e.to_string())).await;
                        break;
                    }
                    None => {
                        tracing::info!(stream = %label, "WebSocket stream ended");
                        break;
                    }
                }
            }
        }
    }

    let _ = inbound.send(TransportEvent::Closed).await;
}
