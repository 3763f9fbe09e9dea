//! Connect failures surfaced through a mocked transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{advance, settle};
use live_price_stream::{
    ConnectionState, SessionConfig, SessionManager, StreamConnection, StreamRequest,
    SubscribeOptions, SubscriptionRegistry, Transport, TransportError,
};
use mockall::mock;
use mockall::predicate::function;

mock! {
    pub Feed {}

    #[async_trait]
    impl Transport for Feed {
        async fn connect(&self, request: &StreamRequest) -> Result<StreamConnection, TransportError>;
    }
}

fn manager(feed: MockFeed) -> (SessionManager, Arc<SubscriptionRegistry>) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let manager = SessionManager::new(
        Arc::clone(&registry),
        Arc::new(feed),
        SessionConfig::default().with_reconnect_delay(Duration::from_secs(1)),
    );
    (manager, registry)
}

#[tokio::test(start_paused = true)]
async fn connect_failure_surfaces_error_and_retries() {
    let mut feed = MockFeed::new();
    feed.expect_connect()
        .with(function(|r: &StreamRequest| r.symbol == "AAPL" && r.market == "US"))
        .times(2)
        .returning(|_| Err(TransportError::Connect("connection refused".to_string())));

    let (manager, _registry) = manager(feed);
    let handle = manager.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    settle().await;

    let status = handle.status();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.reconnect_attempts, 1);
    assert_eq!(
        status.last_error.as_deref(),
        Some("connection failed: connection refused")
    );

    advance(Duration::from_secs(1)).await;
    assert_eq!(handle.status().reconnect_attempts, 2);

    // Stopping before the next retry keeps the call count at two.
    handle.unsubscribe();
    advance(Duration::from_secs(5)).await;
}

#[tokio::test(start_paused = true)]
async fn timeout_is_reported() {
    let mut feed = MockFeed::new();
    feed.expect_connect()
        .times(1)
        .returning(|_| Err(TransportError::Timeout(Duration::from_secs(10))));

    let (manager, registry) = manager(feed);
    let handle = manager.subscribe("MSFT", "US", |_| {}, SubscribeOptions::default());
    settle().await;

    assert_eq!(
        handle.status().last_error.as_deref(),
        Some("connection timed out after 10s")
    );

    manager.unsubscribe();
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn invalid_endpoint_is_retried_like_any_failure() {
    let mut feed = MockFeed::new();
    feed.expect_connect()
        .times(1)
        .returning(|_| Err(TransportError::InvalidEndpoint("empty symbol".to_string())));

    let (manager, registry) = manager(feed);
    manager.subscribe(" ", "US", |_| {}, SubscribeOptions::default());
    settle().await;

    let status = manager.status().unwrap();
    assert_eq!(status.state, ConnectionState::Disconnected);
    assert_eq!(status.last_error.as_deref(), Some("invalid endpoint: empty symbol"));

    // Cleanup entry and the pending reconnect timer.
    assert_eq!(registry.len(), 2);
    drop(manager);
    assert!(registry.is_empty());
}
