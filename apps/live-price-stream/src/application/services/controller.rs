//! Connection Controller
//!
//! Owns one live session for a (symbol, market) pair. The controller feeds
//! inputs into the pure [`SessionMachine`] and performs the returned effects:
//! opening the stream, installing the heartbeat, scheduling reconnects and
//! releasing registrations.
//!
//! # Locking
//!
//! Every input is applied while holding the subscriber's [`StalenessGuard`].
//! The machine lock is held only for the transition itself; effects (registry
//! calls, task spawns, callbacks) run after it is released. Lock order is
//! guard, then machine, never the reverse.
//!
//! # Tasks
//!
//! Each background task (stream pump, heartbeat interval, reconnect timer)
//! is registered in the registry with a cancellation release before it is
//! spawned, and checks its captured token before acting.

use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use super::heartbeat::{HeartbeatAction, HeartbeatState};
use super::session_config::SessionConfig;
use super::throttle::{PriceCallback, PriceDispatcher};
use crate::application::ports::{StreamConnection, StreamRequest, Transport, TransportEvent};
use crate::domain::registry::{Registration, Release, ResourceKind, SubscriptionRegistry};
use crate::domain::session::{
    ConnectionState, Effect, InboundFrame, SessionInput, SessionMachine, SessionStatus,
    SessionToken, StalenessGuard, SubscriberId,
};
use crate::infrastructure::metrics::{self, DropReason};

/// Controller for one (symbol, market) session.
///
/// Cloning yields another handle to the same session.
#[derive(Clone)]
pub struct ConnectionController {
    inner: Arc<ControllerInner>,
}

struct ControllerInner {
    owner: String,
    request: StreamRequest,
    config: SessionConfig,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    guard: Arc<StalenessGuard>,
    dispatcher: PriceDispatcher,
    machine: Mutex<SessionMachine>,
    live: Mutex<Option<LiveStream>>,
    ids: RegistrationIds,
}

/// Channel end and activity tracker of the open stream.
struct LiveStream {
    outbound: mpsc::Sender<String>,
    activity: Arc<HeartbeatState>,
}

struct RegistrationIds {
    stream: String,
    heartbeat: String,
    reconnect: String,
}

impl RegistrationIds {
    fn new(owner: &str, symbol: &str) -> Self {
        Self {
            stream: format!("{owner}:stream:{symbol}"),
            heartbeat: format!("{owner}:heartbeat:{symbol}"),
            reconnect: format!("{owner}:reconnect:{symbol}"),
        }
    }
}

impl ConnectionController {
    /// Create an idle controller. Nothing is opened until [`start`](Self::start).
    #[allow(clippy::too_many_arguments)]
    #[must_use]
    pub fn new(
        subscriber: SubscriberId,
        request: StreamRequest,
        on_update: PriceCallback,
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<SubscriptionRegistry>,
        guard: Arc<StalenessGuard>,
    ) -> Self {
        let owner = subscriber.to_string();
        let dispatcher = PriceDispatcher::new(
            on_update,
            config.throttle_window(),
            Arc::clone(&registry),
            Arc::clone(&guard),
            &request.symbol,
            &owner,
        );
        let machine = SessionMachine::new(
            request.symbol.clone(),
            request.market.clone(),
            config.reconnect.clone(),
            config.error_policy(),
        );

        Self {
            inner: Arc::new(ControllerInner {
                ids: RegistrationIds::new(&owner, &request.symbol),
                owner,
                request,
                config,
                transport,
                registry,
                guard,
                dispatcher,
                machine: Mutex::new(machine),
                live: Mutex::new(None),
            }),
        }
    }

    /// Begin connecting under a freshly issued token.
    ///
    /// # Panics
    ///
    /// Panics if called outside a Tokio runtime.
    pub fn start(&self) {
        let inner = &self.inner;
        inner.guard.exclusive(|| {
            let token = inner.guard.issue();
            inner.apply(SessionInput::Start { token });
        });
    }

    /// Stop the session.
    ///
    /// On return every registration owned by the subscriber is released and
    /// no further callback invocation can occur. Stopping twice is a no-op.
    pub fn stop(&self) {
        self.inner.stop();
    }

    /// Restart immediately, clearing a terminal fault and the backoff.
    ///
    /// Ignored once stopped or if the session was never started.
    pub fn reconnect(&self) {
        let inner = &self.inner;
        inner.guard.exclusive(|| inner.apply(SessionInput::Reconnect));
    }

    /// Snapshot of the session.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        self.inner.machine.lock().status()
    }

    /// Whether `stop` has been applied.
    #[must_use]
    pub fn is_stopped(&self) -> bool {
        self.inner.machine.lock().is_stopped()
    }

    /// Stream address.
    #[must_use]
    pub fn request(&self) -> &StreamRequest {
        &self.inner.request
    }

    /// Whether both handles refer to the same session.
    #[must_use]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Release that stops this session without keeping it alive.
    pub(crate) fn stop_release(&self) -> Release {
        let weak: Weak<ControllerInner> = Arc::downgrade(&self.inner);
        Release::new(move || {
            if let Some(inner) = weak.upgrade() {
                inner.stop();
            }
        })
    }
}

impl std::fmt::Debug for ConnectionController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionController")
            .field("owner", &self.inner.owner)
            .field("request", &self.inner.request)
            .field("state", &self.inner.machine.lock().state())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Transitions and Effects
// =============================================================================

impl ControllerInner {
    fn stop(self: &Arc<Self>) {
        self.guard.exclusive(|| {
            if self.machine.lock().is_stopped() {
                return;
            }
            self.guard.invalidate();
            self.apply(SessionInput::Stop);
            tracing::info!(
                subscriber = %self.owner,
                symbol = %self.request.symbol,
                "Session stopped"
            );
        });
    }

    /// Apply an input and perform its effects. Caller holds the guard.
    fn apply(self: &Arc<Self>, input: SessionInput) {
        let (effects, before, after, halted, last_error) = {
            let mut machine = self.machine.lock();
            let before = (machine.state(), machine.is_halted());
            let effects = machine.handle(input);
            let halted = !before.1 && machine.is_halted();
            (effects, before.0, machine.state(), halted, machine.status().last_error)
        };

        if before != after {
            tracing::debug!(
                symbol = %self.request.symbol,
                from = %before,
                to = %after,
                "Session state changed"
            );
        }
        if after == ConnectionState::Error && before != ConnectionState::Error {
            tracing::warn!(
                symbol = %self.request.symbol,
                error = last_error.as_deref().unwrap_or_default(),
                "Session error"
            );
        }
        if halted {
            metrics::record_terminal_error(&self.request.symbol);
        }

        for effect in effects {
            self.perform(effect);
        }
        metrics::set_registry_entries(self.registry.len());
    }

    fn perform(self: &Arc<Self>, effect: Effect) {
        match effect {
            Effect::OpenStream { token } => {
                self.dispatcher.reset();
                self.open_stream(token);
            }
            Effect::InstallHeartbeat { token } => self.install_heartbeat(token),
            Effect::ReleaseHeartbeat => self.registry.unregister(&self.ids.heartbeat),
            Effect::ReleaseStream => {
                self.registry.unregister(&self.ids.stream);
                self.live.lock().take();
            }
            Effect::ScheduleReconnect { token, delay } => self.schedule_reconnect(token, delay),
            Effect::CancelReconnect => self.registry.unregister(&self.ids.reconnect),
            Effect::Restart => {
                let token = self.guard.issue();
                self.apply(SessionInput::Start { token });
            }
            Effect::Deliver(event) => {
                let token = self.machine.lock().token();
                if let Some(token) = token {
                    self.dispatcher.dispatch(token, event);
                }
            }
            Effect::ReleaseAll => {
                self.live.lock().take();
                self.registry.clear_for_owner(&self.owner);
            }
        }
    }

    // =========================================================================
    // Stream
    // =========================================================================

    fn open_stream(self: &Arc<Self>, token: SessionToken) {
        let cancel = CancellationToken::new();
        self.registry.register(
            Registration::new(
                self.ids.stream.clone(),
                ResourceKind::Stream,
                Release::cancel(cancel.clone()),
            )
            .for_symbol(self.request.symbol.clone())
            .owned_by(self.owner.clone()),
        );
        metrics::record_session_started(&self.request.symbol);
        tracing::info!(
            symbol = %self.request.symbol,
            market = %self.request.market,
            token = %token,
            "Opening price stream"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move { inner.run_stream(token, cancel).await });
    }

    async fn run_stream(self: Arc<Self>, token: SessionToken, cancel: CancellationToken) {
        let connected = tokio::select! {
            () = cancel.cancelled() => return,
            result = self.transport.connect(&self.request) => result,
        };

        let StreamConnection {
            outbound,
            mut inbound,
        } = match connected {
            Ok(connection) => connection,
            Err(e) => {
                tracing::warn!(
                    symbol = %self.request.symbol,
                    token = %token,
                    error = %e,
                    "Failed to open price stream"
                );
                self.guard.run_if_current(token, || {
                    self.apply(SessionInput::TransportError {
                        token,
                        message: e.to_string(),
                    });
                    self.apply(SessionInput::Closed { token });
                });
                return;
            }
        };

        let activity = Arc::new(HeartbeatState::new());
        let opened = self.guard.run_if_current(token, || {
            *self.live.lock() = Some(LiveStream {
                outbound,
                activity: Arc::clone(&activity),
            });
            self.apply(SessionInput::Opened { token });
        });
        if opened.is_none() {
            return;
        }

        loop {
            let event = tokio::select! {
                () = cancel.cancelled() => break,
                event = inbound.recv() => event.unwrap_or(TransportEvent::Closed),
            };
            activity.record_inbound();

            let input = match event {
                TransportEvent::Frame(text) => match InboundFrame::decode(&text) {
                    Ok(InboundFrame::Error(error)) => {
                        tracing::debug!(
                            symbol = %self.request.symbol,
                            code = error.code.as_deref().unwrap_or_default(),
                            message = %error.message,
                            "Backend error frame"
                        );
                        SessionInput::Frame {
                            token,
                            frame: InboundFrame::Error(error),
                        }
                    }
                    Ok(frame) => SessionInput::Frame { token, frame },
                    Err(e) => {
                        tracing::trace!(symbol = %self.request.symbol, error = %e, "Dropping frame");
                        metrics::record_frame_dropped(DropReason::Undecodable);
                        continue;
                    }
                },
                TransportEvent::Error(message) => SessionInput::TransportError { token, message },
                TransportEvent::Closed => SessionInput::Closed { token },
            };
            let closed = matches!(input, SessionInput::Closed { .. });

            if self.guard.run_if_current(token, || self.apply(input)).is_none() {
                metrics::record_frame_dropped(DropReason::Stale);
                break;
            }
            if closed {
                break;
            }
        }
    }

    // =========================================================================
    // Heartbeat
    // =========================================================================

    fn install_heartbeat(self: &Arc<Self>, token: SessionToken) {
        let period = self.config.heartbeat.interval;
        if period.is_zero() {
            return;
        }
        let Some(activity) = self
            .live
            .lock()
            .as_ref()
            .map(|live| Arc::clone(&live.activity))
        else {
            return;
        };

        let cancel = CancellationToken::new();
        self.registry.register(
            Registration::new(
                self.ids.heartbeat.clone(),
                ResourceKind::Interval,
                Release::cancel(cancel.clone()),
            )
            .for_symbol(self.request.symbol.clone())
            .owned_by(self.owner.clone()),
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        let action = activity.check(&inner.config.heartbeat);
                        let keep_running = inner.guard.run_if_current(token, || match action {
                            HeartbeatAction::SendKeepalive => {
                                inner.send_keepalive();
                                true
                            }
                            HeartbeatAction::IdleTimeout => {
                                tracing::warn!(
                                    symbol = %inner.request.symbol,
                                    idle_secs = activity.time_since_inbound().as_secs(),
                                    "Price stream idle, reconnecting"
                                );
                                inner.apply(SessionInput::IdleTimeout { token });
                                false
                            }
                        });
                        if keep_running != Some(true) {
                            break;
                        }
                    }
                }
            }
        });
    }

    fn send_keepalive(&self) {
        let live = self.live.lock();
        let Some(live) = live.as_ref() else {
            return;
        };
        match live
            .outbound
            .try_send(self.config.heartbeat.keepalive_frame.clone())
        {
            Ok(()) => metrics::record_keepalive_sent(&self.request.symbol),
            Err(e) => {
                tracing::debug!(symbol = %self.request.symbol, error = %e, "Keepalive not sent");
            }
        }
    }

    // =========================================================================
    // Reconnect
    // =========================================================================

    fn schedule_reconnect(self: &Arc<Self>, token: SessionToken, delay: Duration) {
        let cancel = CancellationToken::new();
        self.registry.register(
            Registration::new(
                self.ids.reconnect.clone(),
                ResourceKind::Timer,
                Release::cancel(cancel.clone()),
            )
            .for_symbol(self.request.symbol.clone())
            .owned_by(self.owner.clone()),
        );
        metrics::record_reconnect_scheduled(&self.request.symbol);

        #[allow(clippy::cast_possible_truncation)]
        let delay_ms = delay.as_millis() as u64;
        tracing::info!(
            symbol = %self.request.symbol,
            token = %token,
            delay_ms,
            "Reconnect scheduled"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::select! {
                () = cancel.cancelled() => {}
                () = tokio::time::sleep(delay) => {
                    inner.guard.run_if_current(token, || {
                        inner.registry.unregister(&inner.ids.reconnect);
                        inner.apply(SessionInput::ReconnectDue { token });
                    });
                }
            }
        });
    }
}
