//! Shared helpers for integration tests.

#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use live_price_stream::{
    PriceEvent, StreamConnection, StreamRequest, Transport, TransportError, TransportEvent,
};
use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};

/// Server side of one fake stream.
pub struct ServerEnd {
    pub request: StreamRequest,
    pub to_client: mpsc::Sender<TransportEvent>,
    pub from_client: mpsc::Receiver<String>,
}

impl ServerEnd {
    pub async fn send(&self, frame: impl Into<String>) {
        // The client may already have gone away.
        let _ = self.to_client.send(TransportEvent::Frame(frame.into())).await;
    }

    pub async fn send_price(&self, price: &str) {
        self.send(price_frame(price)).await;
    }

    pub async fn send_error(&self, message: &str, code: &str) {
        self.send(format!(
            r#"{{"type":"error","message":"{message}","code":"{code}"}}"#
        ))
        .await;
    }

    /// Close the stream from the server side.
    pub fn close(self) {
        drop(self);
    }
}

pub fn price_frame(price: &str) -> String {
    format!(r#"{{"type":"price","price":"{price}"}}"#)
}

/// Channel-backed transport recording every connect.
#[derive(Default)]
pub struct FakeTransport {
    connects: AtomicUsize,
    failing: AtomicBool,
    servers: Mutex<VecDeque<ServerEnd>>,
    held: Mutex<HashMap<String, Arc<Notify>>>,
}

impl FakeTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connect_count(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Oldest stream not yet taken by the test.
    pub fn next_server(&self) -> ServerEnd {
        self.servers
            .lock()
            .pop_front()
            .expect("no stream was opened")
    }

    pub fn pending_servers(&self) -> usize {
        self.servers.lock().len()
    }

    /// Keep connects for `symbol` pending until [`Self::release`].
    ///
    /// The server end is queued immediately so the test can still push
    /// frames into a stream whose connect has not returned.
    pub fn hold(&self, symbol: &str) {
        self.held
            .lock()
            .insert(symbol.to_string(), Arc::new(Notify::new()));
    }

    /// Let a held connect for `symbol` return.
    pub fn release(&self, symbol: &str) {
        if let Some(gate) = self.held.lock().remove(symbol) {
            gate.notify_one();
        }
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, request: &StreamRequest) -> Result<StreamConnection, TransportError> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.failing.load(Ordering::SeqCst) {
            return Err(TransportError::Connect("connection refused".to_string()));
        }

        let (to_client, inbound) = mpsc::channel(64);
        let (outbound, from_client) = mpsc::channel(64);
        self.servers.lock().push_back(ServerEnd {
            request: request.clone(),
            to_client,
            from_client,
        });

        let gate = self.held.lock().get(&request.symbol).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(StreamConnection { outbound, inbound })
    }
}

/// Callback sink collecting delivered events.
#[derive(Clone, Default)]
pub struct Collected(Arc<Mutex<Vec<PriceEvent>>>);

impl Collected {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(PriceEvent) + Send + Sync + 'static {
        let events = Arc::clone(&self.0);
        move |event| events.lock().push(event)
    }

    pub fn events(&self) -> Vec<PriceEvent> {
        self.0.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.0.lock().len()
    }
}

/// Let spawned tasks run without advancing the paused clock.
pub async fn settle() {
    for _ in 0..20 {
        tokio::task::yield_now().await;
    }
}

/// Advance the paused clock, then let woken tasks run.
pub async fn advance(duration: Duration) {
    tokio::time::advance(duration).await;
    settle().await;
}
