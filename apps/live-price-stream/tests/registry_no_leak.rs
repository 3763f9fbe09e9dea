//! Arbitrary subscribe/switch/reconnect/close sequences never leak registrations.

#![allow(clippy::unwrap_used, clippy::expect_used)]

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{FakeTransport, ServerEnd, advance, settle};
use live_price_stream::{SessionConfig, SessionManager, SubscribeOptions, SubscriptionRegistry};
use proptest::prelude::*;

#[derive(Debug, Clone)]
enum Op {
    Subscribe { symbol: usize, enabled: bool },
    Unsubscribe,
    Reconnect,
    CloseStream,
    Price(u32),
    Wait(u64),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..3, any::<bool>()).prop_map(|(symbol, enabled)| Op::Subscribe { symbol, enabled }),
        Just(Op::Unsubscribe),
        Just(Op::Reconnect),
        Just(Op::CloseStream),
        (1u32..1000).prop_map(Op::Price),
        (1u64..5000).prop_map(Op::Wait),
    ]
}

const SYMBOLS: [&str; 3] = ["AAPL", "MSFT", "BTC/USD"];

async fn run(ops: Vec<Op>) -> (usize, usize) {
    let transport = FakeTransport::new();
    let registry = Arc::new(SubscriptionRegistry::new());
    let manager = SessionManager::new(
        Arc::clone(&registry),
        Arc::clone(&transport) as _,
        SessionConfig::default().with_reconnect_delay(Duration::from_millis(500)),
    );
    let mut handle = None;
    let mut open: Vec<ServerEnd> = Vec::new();

    for op in ops {
        match op {
            Op::Subscribe { symbol, enabled } => {
                let options = if enabled {
                    SubscribeOptions::default()
                } else {
                    SubscribeOptions::disabled()
                };
                handle = Some(manager.subscribe(SYMBOLS[symbol], "US", |_| {}, options));
            }
            Op::Unsubscribe => {
                if let Some(handle) = &handle {
                    handle.unsubscribe();
                }
            }
            Op::Reconnect => {
                if let Some(handle) = &handle {
                    handle.reconnect();
                }
            }
            Op::CloseStream => open.clear(),
            Op::Price(value) => {
                if let Some(server) = open.last() {
                    server.send_price(&value.to_string()).await;
                }
            }
            Op::Wait(ms) => advance(Duration::from_millis(ms)).await,
        }
        settle().await;
        while transport.pending_servers() > 0 {
            open.push(transport.next_server());
        }
    }

    let live_before_teardown = registry.len();
    manager.unsubscribe();
    settle().await;
    (live_before_teardown, registry.len())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn teardown_releases_every_registration(ops in proptest::collection::vec(op(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (_, remaining) = runtime.block_on(run(ops));
        prop_assert_eq!(remaining, 0);
    }

    #[test]
    fn at_most_one_stream_per_subscriber(ops in proptest::collection::vec(op(), 1..24)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .start_paused(true)
            .build()
            .unwrap();

        let (live, _) = runtime.block_on(run(ops));
        // Cleanup, stream or reconnect timer, heartbeat, throttle timer.
        prop_assert!(live <= 4);
    }
}
