//! Rate-Limited Dispatch
//!
//! Leading+trailing coalescing of price events. The first event in a burst
//! is delivered immediately; later events inside the window replace each
//! other and the last one is delivered at the window boundary. Events are
//! never reordered.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::domain::registry::{Registration, Release, ResourceKind, SubscriptionRegistry};
use crate::domain::session::{PriceEvent, SessionToken, StalenessGuard};
use crate::infrastructure::metrics;

/// Default maximum delivery frequency.
pub const DEFAULT_MAX_UPDATE_HZ: u32 = 60;

/// Subscriber callback receiving price events.
pub type PriceCallback = Arc<dyn Fn(PriceEvent) + Send + Sync>;

/// Window length for a maximum frequency (zero disables coalescing).
#[must_use]
pub fn window_for_hz(max_update_hz: u32) -> Duration {
    if max_update_hz == 0 {
        Duration::ZERO
    } else {
        Duration::from_secs_f64(1.0 / f64::from(max_update_hz))
    }
}

/// Outcome of offering an event to the throttle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Offer {
    /// Deliver now.
    Emit(PriceEvent),
    /// Held as the pending trailing event.
    Coalesce {
        /// Deadline for a trailing flush that must be armed, if none is armed yet.
        arm_at: Option<Instant>,
    },
}

/// Pure leading+trailing throttle state.
#[derive(Debug, Clone)]
pub struct Throttle {
    window: Duration,
    last_emit: Option<Instant>,
    pending: Option<PriceEvent>,
    armed: bool,
}

impl Throttle {
    /// Create a throttle with the given window.
    #[must_use]
    pub const fn new(window: Duration) -> Self {
        Self {
            window,
            last_emit: None,
            pending: None,
            armed: false,
        }
    }

    /// Window length.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.window
    }

    /// Offer an event at `now`.
    pub fn offer(&mut self, event: PriceEvent, now: Instant) -> Offer {
        if self.window.is_zero() {
            return Offer::Emit(event);
        }

        match self.last_emit {
            Some(last) if now < last + self.window => {
                self.pending = Some(event);
                if self.armed {
                    Offer::Coalesce { arm_at: None }
                } else {
                    self.armed = true;
                    Offer::Coalesce {
                        arm_at: Some(last + self.window),
                    }
                }
            }
            _ => {
                // A late trailing flush is superseded by the newer event.
                self.pending = None;
                self.last_emit = Some(now);
                Offer::Emit(event)
            }
        }
    }

    /// Take the trailing event at the window boundary.
    pub fn flush(&mut self, now: Instant) -> Option<PriceEvent> {
        self.armed = false;
        let event = self.pending.take()?;
        self.last_emit = Some(now);
        Some(event)
    }

    /// Forget all state (new session).
    pub fn reset(&mut self) {
        self.last_emit = None;
        self.pending = None;
        self.armed = false;
    }

    /// Whether an event is waiting for the trailing flush.
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}

/// Delivers price events to a subscriber callback through a [`Throttle`].
///
/// Deliveries run while the caller holds the staleness guard; the trailing
/// flush re-validates its session token before delivering.
#[derive(Clone)]
pub struct PriceDispatcher {
    inner: Arc<DispatcherInner>,
}

struct DispatcherInner {
    callback: PriceCallback,
    throttle: Mutex<Throttle>,
    registry: Arc<SubscriptionRegistry>,
    guard: Arc<StalenessGuard>,
    timer_id: String,
    symbol: String,
    owner: String,
}

impl PriceDispatcher {
    /// Create a dispatcher for one session.
    #[must_use]
    pub fn new(
        callback: PriceCallback,
        window: Duration,
        registry: Arc<SubscriptionRegistry>,
        guard: Arc<StalenessGuard>,
        symbol: &str,
        owner: &str,
    ) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                callback,
                throttle: Mutex::new(Throttle::new(window)),
                registry,
                guard,
                timer_id: format!("{owner}:throttle:{symbol}"),
                symbol: symbol.to_string(),
                owner: owner.to_string(),
            }),
        }
    }

    /// Registry id of the trailing flush timer.
    #[must_use]
    pub fn timer_id(&self) -> &str {
        &self.inner.timer_id
    }

    /// Offer an event produced under `token`.
    ///
    /// Must be called while holding the staleness guard for `token`.
    pub fn dispatch(&self, token: SessionToken, event: PriceEvent) {
        let offer = self.inner.throttle.lock().offer(event, Instant::now());
        match offer {
            Offer::Emit(event) => self.inner.deliver(event),
            Offer::Coalesce { arm_at } => {
                metrics::record_price_coalesced(&self.inner.symbol);
                if let Some(deadline) = arm_at {
                    self.arm(token, deadline);
                }
            }
        }
    }

    /// Drop any pending event and release the trailing timer.
    pub fn reset(&self) {
        self.inner.throttle.lock().reset();
        self.inner.registry.unregister(&self.inner.timer_id);
    }

    fn arm(&self, token: SessionToken, deadline: Instant) {
        let cancel = CancellationToken::new();
        self.inner.registry.register(
            Registration::new(
                self.inner.timer_id.clone(),
                ResourceKind::Timer,
                Release::cancel(cancel.clone()),
            )
            .for_symbol(self.inner.symbol.clone())
            .owned_by(self.inner.owner.clone()),
        );

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep_until(deadline) => {
                    let guard = Arc::clone(&inner.guard);
                    guard.run_if_current(token, || inner.flush());
                }
            }
        });
    }
}

impl DispatcherInner {
    fn deliver(&self, event: PriceEvent) {
        metrics::record_price_delivered(&self.symbol);
        (self.callback)(event);
    }

    fn flush(&self) {
        self.registry.unregister(&self.timer_id);
        let event = self.throttle.lock().flush(Instant::now());
        if let Some(event) = event {
            self.deliver(event);
        }
    }
}

impl std::fmt::Debug for PriceDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PriceDispatcher")
            .field("timer_id", &self.inner.timer_id)
            .field("window", &self.inner.throttle.lock().window())
            .finish_non_exhaustive()
    }
}
