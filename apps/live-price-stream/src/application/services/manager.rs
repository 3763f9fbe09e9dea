//! Session Manager
//!
//! Public facade for one logical subscriber (for example, one chart cell).
//! A manager holds at most one session at a time: subscribing again tears
//! the previous session down before the new one starts, so the caller never
//! observes interleaved events from two symbols.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use live_price_stream::{
//!     SessionConfig, SessionManager, SubscribeOptions, SubscriptionRegistry,
//!     WebSocketTransport,
//! };
//!
//! # async fn example() -> anyhow::Result<()> {
//! let registry = Arc::new(SubscriptionRegistry::new());
//! let transport = Arc::new(WebSocketTransport::new("wss://example.com".parse()?));
//! let manager = SessionManager::new(registry, transport, SessionConfig::default());
//!
//! let handle = manager.subscribe(
//!     "AAPL",
//!     "US",
//!     |event| println!("{} {}", event.symbol, event.price),
//!     SubscribeOptions::default(),
//! );
//!
//! // Switching symbols tears down the AAPL session first.
//! let handle = manager.subscribe("MSFT", "US", |_| {}, SubscribeOptions::default());
//! handle.unsubscribe();
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use super::controller::ConnectionController;
use super::session_config::SessionConfig;
use crate::application::ports::{StreamRequest, Transport};
use crate::domain::registry::{Registration, ResourceKind, SubscriptionRegistry};
use crate::domain::session::{PriceEvent, SessionStatus, StalenessGuard, SubscriberId};

/// Options for [`SessionManager::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscribeOptions {
    /// Open the stream immediately. A disabled subscription stays
    /// `Disconnected` and ignores `reconnect`.
    pub enabled: bool,
}

impl Default for SubscribeOptions {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl SubscribeOptions {
    /// Options for a subscription that does not connect.
    #[must_use]
    pub const fn disabled() -> Self {
        Self { enabled: false }
    }
}

/// One-session-per-subscriber facade.
pub struct SessionManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    id: SubscriberId,
    registry: Arc<SubscriptionRegistry>,
    transport: Arc<dyn Transport>,
    config: SessionConfig,
    guard: Arc<StalenessGuard>,
    current: Mutex<Option<Slot>>,
}

struct Slot {
    controller: ConnectionController,
    enabled: bool,
}

impl SessionManager {
    /// Create a manager with a fresh subscriber identity.
    #[must_use]
    pub fn new(
        registry: Arc<SubscriptionRegistry>,
        transport: Arc<dyn Transport>,
        config: SessionConfig,
    ) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                id: SubscriberId::new(),
                registry,
                transport,
                config,
                guard: Arc::new(StalenessGuard::new()),
                current: Mutex::new(None),
            }),
        }
    }

    /// Subscribe to live prices for `symbol` on `market`.
    ///
    /// Any previous session of this manager is fully torn down first.
    /// `on_update` receives rate-limited price events; it may call back into
    /// the manager or the returned handle.
    ///
    /// # Panics
    ///
    /// Panics if an enabled subscription is created outside a Tokio runtime.
    pub fn subscribe<F>(
        &self,
        symbol: impl Into<String>,
        market: impl Into<String>,
        on_update: F,
        options: SubscribeOptions,
    ) -> SubscriptionHandle
    where
        F: Fn(PriceEvent) + Send + Sync + 'static,
    {
        let inner = &self.inner;
        let request = StreamRequest::new(symbol, market);

        inner.guard.exclusive(|| {
            inner.teardown();

            let controller = ConnectionController::new(
                inner.id,
                request,
                Arc::new(on_update),
                inner.config.clone(),
                Arc::clone(&inner.transport),
                Arc::clone(&inner.registry),
                Arc::clone(&inner.guard),
            );
            inner.registry.register(
                Registration::new(
                    format!("{}:session:{}", inner.id, controller.request().symbol),
                    ResourceKind::Cleanup,
                    controller.stop_release(),
                )
                .for_symbol(controller.request().symbol.clone())
                .owned_by(inner.id.to_string()),
            );

            tracing::info!(
                subscriber = %inner.id,
                symbol = %controller.request().symbol,
                market = %controller.request().market,
                enabled = options.enabled,
                "Subscribed"
            );

            *inner.current.lock() = Some(Slot {
                controller: controller.clone(),
                enabled: options.enabled,
            });
            if options.enabled {
                controller.start();
            }

            SubscriptionHandle {
                manager: Arc::downgrade(inner),
                controller,
                enabled: options.enabled,
            }
        })
    }

    /// Tear down the current session, if any.
    pub fn unsubscribe(&self) {
        let inner = &self.inner;
        inner.guard.exclusive(|| inner.teardown());
    }

    /// Status of the current session.
    #[must_use]
    pub fn status(&self) -> Option<SessionStatus> {
        self.inner
            .current
            .lock()
            .as_ref()
            .map(|slot| slot.controller.status())
    }

    /// Whether an enabled session is current.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner
            .current
            .lock()
            .as_ref()
            .is_some_and(|slot| slot.enabled)
    }

    /// Subscriber identity (owner tag of every registration).
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.inner.id
    }

    /// Shared registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.inner.registry
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl ManagerInner {
    /// Stop the current session and release everything this subscriber owns.
    /// Caller holds the guard.
    fn teardown(&self) {
        let previous = self.current.lock().take();
        if let Some(slot) = previous {
            slot.controller.stop();
        }
        self.registry.clear_for_owner(&self.id.to_string());
    }

    /// Tear down `controller` if it is still the current session.
    fn release(&self, controller: &ConnectionController) {
        self.guard.exclusive(|| {
            let is_current = self
                .current
                .lock()
                .as_ref()
                .is_some_and(|slot| slot.controller.ptr_eq(controller));
            if is_current {
                self.teardown();
            } else {
                controller.stop();
            }
        });
    }
}

/// Caller's handle to one subscription.
///
/// Dropping the handle does not unsubscribe; the session lives until
/// [`unsubscribe`](Self::unsubscribe), the next `subscribe` on the same
/// manager, or the manager being dropped.
#[derive(Debug, Clone)]
pub struct SubscriptionHandle {
    manager: Weak<ManagerInner>,
    controller: ConnectionController,
    enabled: bool,
}

impl SubscriptionHandle {
    /// Tear the subscription down. Safe to call repeatedly, and after the
    /// session has already been replaced or the manager dropped.
    pub fn unsubscribe(&self) {
        match self.manager.upgrade() {
            Some(manager) => manager.release(&self.controller),
            None => self.controller.stop(),
        }
    }

    /// Reconnect now, without waiting for the backoff timer.
    ///
    /// No-op for a disabled or ended subscription.
    pub fn reconnect(&self) {
        if self.enabled {
            self.controller.reconnect();
        }
    }

    /// Snapshot of the session.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.controller.status()
    }

    /// Whether the subscription was created enabled.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Whether the session has ended.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.controller.is_stopped()
    }
}
