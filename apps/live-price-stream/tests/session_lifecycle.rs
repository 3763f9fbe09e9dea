//! Subscribe, switch and unsubscribe against a channel-backed transport.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::{Arc, OnceLock};

use common::{Collected, FakeTransport, settle};
use live_price_stream::{
    ConnectionState, Direction, SessionConfig, SessionManager, SubscribeOptions,
    SubscriptionHandle, SubscriptionRegistry,
};
use rust_decimal::Decimal;
use tokio_test::{assert_err, assert_ok};

fn manager(transport: &Arc<FakeTransport>) -> (SessionManager, Arc<SubscriptionRegistry>) {
    let registry = Arc::new(SubscriptionRegistry::new());
    let manager = SessionManager::new(
        Arc::clone(&registry),
        Arc::clone(transport) as _,
        SessionConfig::default().with_max_update_hz(0),
    );
    (manager, registry)
}

#[tokio::test(start_paused = true)]
async fn subscribe_connects_and_delivers() {
    let transport = FakeTransport::new();
    let (manager, registry) = manager(&transport);
    let collected = Collected::new();

    let handle = manager.subscribe("AAPL", "US", collected.callback(), SubscribeOptions::default());
    settle().await;

    assert_eq!(transport.connect_count(), 1);
    assert_eq!(handle.status().state, ConnectionState::Connected);
    assert!(manager.is_active());

    let server = transport.next_server();
    assert_eq!(server.request.symbol, "AAPL");
    assert_eq!(server.request.market, "US");

    server.send(r#"{"type":"connected"}"#).await;
    server.send_price("101.5").await;
    settle().await;

    let events = collected.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].symbol, "AAPL");
    assert_eq!(events[0].price, Decimal::new(1015, 1));
    assert_eq!(handle.status().last_price, Some(Decimal::new(1015, 1)));

    // Session cleanup, stream and heartbeat.
    assert_eq!(registry.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn switching_symbols_never_leaks_old_events() {
    let transport = FakeTransport::new();
    let (manager, _registry) = manager(&transport);
    let collected = Collected::new();

    manager.subscribe("AAPL", "US", collected.callback(), SubscribeOptions::default());
    settle().await;
    let old = transport.next_server();

    manager.subscribe("MSFT", "US", collected.callback(), SubscribeOptions::default());
    settle().await;
    let new = transport.next_server();
    assert_eq!(new.request.symbol, "MSFT");

    old.send_price("150").await;
    new.send_price("400").await;
    old.send_price("151").await;
    settle().await;

    let events = collected.events();
    assert_eq!(events.len(), 1);
    assert!(events.iter().all(|e| e.symbol == "MSFT"));
    assert_eq!(manager.status().unwrap().symbol, "MSFT");
}

#[tokio::test(start_paused = true)]
async fn switching_before_connect_completes_never_leaks_old_events() {
    let transport = FakeTransport::new();
    let (manager, _registry) = manager(&transport);
    let collected = Collected::new();

    transport.hold("AAPL");
    manager.subscribe("AAPL", "US", collected.callback(), SubscribeOptions::default());
    settle().await;
    assert_eq!(manager.status().unwrap().state, ConnectionState::Connecting);

    manager.subscribe("MSFT", "US", collected.callback(), SubscribeOptions::default());
    settle().await;
    transport.release("AAPL");
    settle().await;

    let old = transport.next_server();
    let new = transport.next_server();
    assert_eq!(old.request.symbol, "AAPL");
    assert_eq!(new.request.symbol, "MSFT");
    assert_eq!(transport.connect_count(), 2);

    old.send_price("150").await;
    new.send_price("400").await;
    old.send_price("151").await;
    settle().await;

    let events = collected.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].symbol, "MSFT");
    assert_eq!(events[0].price, Decimal::from(400));
    assert!(old.to_client.is_closed());

    let status = manager.status().unwrap();
    assert_eq!(status.symbol, "MSFT");
    assert_eq!(status.state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn old_stream_is_closed_on_switch() {
    let transport = FakeTransport::new();
    let (manager, _registry) = manager(&transport);

    manager.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    settle().await;
    let old = transport.next_server();

    manager.subscribe("MSFT", "US", |_| {}, SubscribeOptions::default());
    settle().await;

    assert!(old.to_client.is_closed());
    assert_err!(old.to_client.try_send(live_price_stream::TransportEvent::Closed));
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_is_idempotent_and_releases_everything() {
    let transport = FakeTransport::new();
    let (manager, registry) = manager(&transport);
    let collected = Collected::new();

    let handle = manager.subscribe("AAPL", "US", collected.callback(), SubscribeOptions::default());
    settle().await;
    let server = transport.next_server();
    assert!(!registry.is_empty());

    handle.unsubscribe();
    handle.unsubscribe();
    manager.unsubscribe();
    settle().await;

    assert!(registry.is_empty());
    assert!(handle.is_stopped());
    assert_eq!(handle.status().state, ConnectionState::Disconnected);
    assert!(manager.status().is_none());

    server.send_price("101").await;
    settle().await;
    assert_eq!(collected.len(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_handle_does_not_tear_down_current_session() {
    let transport = FakeTransport::new();
    let (manager, _registry) = manager(&transport);

    let first = manager.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    let second = manager.subscribe("MSFT", "US", |_| {}, SubscribeOptions::default());
    settle().await;

    first.unsubscribe();
    settle().await;

    assert!(first.is_stopped());
    assert!(!second.is_stopped());
    assert_eq!(manager.status().unwrap().symbol, "MSFT");
    assert_eq!(second.status().state, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
async fn direction_follows_price_sequence() {
    let transport = FakeTransport::new();
    let (manager, _registry) = manager(&transport);
    let collected = Collected::new();

    manager.subscribe("AAPL", "US", collected.callback(), SubscribeOptions::default());
    settle().await;
    let server = transport.next_server();

    for price in ["100", "105", "105", "98"] {
        server.send_price(price).await;
    }
    settle().await;

    let directions: Vec<Direction> = collected.events().iter().map(|e| e.direction).collect();
    assert_eq!(
        directions,
        vec![
            Direction::Unchanged,
            Direction::Up,
            Direction::Unchanged,
            Direction::Down
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn disabled_subscription_never_connects() {
    let transport = FakeTransport::new();
    let (manager, registry) = manager(&transport);

    let handle = manager.subscribe("AAPL", "US", |_| {}, SubscribeOptions::disabled());
    handle.reconnect();
    settle().await;

    assert_eq!(transport.connect_count(), 0);
    assert!(!handle.is_enabled());
    assert!(!manager.is_active());
    assert_eq!(handle.status().state, ConnectionState::Disconnected);

    // Only the cleanup entry.
    assert_eq!(registry.len(), 1);
    handle.unsubscribe();
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn callback_may_unsubscribe_from_inside() {
    let transport = FakeTransport::new();
    let (manager, registry) = manager(&transport);
    let collected = Collected::new();
    let slot: Arc<OnceLock<SubscriptionHandle>> = Arc::new(OnceLock::new());

    let sink = collected.callback();
    let handle_slot = Arc::clone(&slot);
    let handle = manager.subscribe(
        "AAPL",
        "US",
        move |event| {
            sink(event);
            if let Some(handle) = handle_slot.get() {
                handle.unsubscribe();
            }
        },
        SubscribeOptions::default(),
    );
    assert_ok!(slot.set(handle.clone()));
    settle().await;

    let server = transport.next_server();
    server.send_price("100").await;
    server.send_price("101").await;
    settle().await;

    assert_eq!(collected.len(), 1);
    assert!(handle.is_stopped());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropping_manager_stops_session() {
    let transport = FakeTransport::new();
    let (manager, registry) = manager(&transport);

    let handle = manager.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    settle().await;
    drop(manager);
    settle().await;

    assert!(handle.is_stopped());
    assert!(registry.is_empty());

    // Still safe after the manager is gone.
    handle.unsubscribe();
}

#[tokio::test(start_paused = true)]
async fn registry_clear_all_stops_sessions() {
    let transport = FakeTransport::new();
    let (manager, registry) = manager(&transport);

    let handle = manager.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    settle().await;

    registry.clear_all();
    settle().await;

    assert!(handle.is_stopped());
    assert!(registry.is_empty());
}

#[tokio::test(start_paused = true)]
async fn independent_managers_share_registry() {
    let transport = FakeTransport::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let first = SessionManager::new(
        Arc::clone(&registry),
        Arc::clone(&transport) as _,
        SessionConfig::default(),
    );
    let second = SessionManager::new(
        Arc::clone(&registry),
        Arc::clone(&transport) as _,
        SessionConfig::default(),
    );

    first.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    second.subscribe("AAPL", "US", |_| {}, SubscribeOptions::default());
    settle().await;
    assert_eq!(transport.connect_count(), 2);
    let total = registry.len();

    first.unsubscribe();
    settle().await;

    assert_eq!(registry.len(), total / 2);
    assert!(second.is_active());
    assert_eq!(second.status().unwrap().state, ConnectionState::Connected);
}
