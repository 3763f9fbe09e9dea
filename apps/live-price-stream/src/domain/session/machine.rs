//! Session State Machine
//!
//! Pure transition function for one live-price session. The machine owns the
//! session's status, reconnect bookkeeping and last accepted price; it never
//! touches timers, sockets or callbacks. Each input returns the list of
//! [`Effect`]s the controller must perform, in order.
//!
//! # Transitions
//!
//! | From | Input | To | Effects |
//! |------|-------|----|---------|
//! | any | `Start` | Connecting | release heartbeat/stream, cancel reconnect, open stream |
//! | Connecting | `Opened` / `connected` frame | Connected | install heartbeat |
//! | Connecting/Connected | terminal `error` frame | Error | release heartbeat/stream, cancel reconnect |
//! | Connecting/Connected | `TransportError` | Error | none (a close follows) |
//! | any live | `Closed` / `IdleTimeout` | Disconnected | release heartbeat/stream, schedule reconnect |
//! | Disconnected | `ReconnectDue` | (restart) | restart under a fresh token |
//! | any | `Stop` | Disconnected | release everything |
//!
//! Inputs carrying a token that is not the current one are ignored.

use std::time::Duration;

use rust_decimal::Decimal;

use super::{
    ConnectionState, Direction, ErrorFrame, InboundFrame, PriceEvent, ReconnectConfig,
    ReconnectPolicy, SessionStatus, SessionToken,
};

/// Default terminal error code.
pub const DEFAULT_TERMINAL_CODE: &str = "NOT_CONFIGURED";

// =============================================================================
// Error Classification
// =============================================================================

/// Classification of a backend-reported error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Configuration fault; automatic reconnects stop until a manual reconnect.
    Terminal,
    /// Surfaced in status while the normal close/reconnect path continues.
    Transient,
}

/// Maps backend error codes to an [`ErrorClass`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorPolicy {
    terminal_codes: Vec<String>,
}

impl Default for ErrorPolicy {
    fn default() -> Self {
        Self::new([DEFAULT_TERMINAL_CODE])
    }
}

impl ErrorPolicy {
    /// Create a policy treating `terminal_codes` as terminal.
    pub fn new<I, S>(terminal_codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            terminal_codes: terminal_codes
                .into_iter()
                .map(Into::into)
                .map(|code| code.trim().to_string())
                .filter(|code| !code.is_empty())
                .collect(),
        }
    }

    /// Codes treated as terminal.
    #[must_use]
    pub fn terminal_codes(&self) -> &[String] {
        &self.terminal_codes
    }

    /// Classify an error code. Errors without a code are transient.
    #[must_use]
    pub fn classify(&self, code: Option<&str>) -> ErrorClass {
        match code {
            Some(code)
                if self
                    .terminal_codes
                    .iter()
                    .any(|terminal| terminal.eq_ignore_ascii_case(code.trim())) =>
            {
                ErrorClass::Terminal
            }
            _ => ErrorClass::Transient,
        }
    }
}

// =============================================================================
// Inputs and Effects
// =============================================================================

/// Discrete event driving the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionInput {
    /// Begin a connect attempt under `token`.
    Start {
        /// Freshly issued token.
        token: SessionToken,
    },
    /// The transport opened.
    Opened {
        /// Token captured when the open was initiated.
        token: SessionToken,
    },
    /// A decoded inbound frame.
    Frame {
        /// Token of the stream that produced the frame.
        token: SessionToken,
        /// The frame.
        frame: InboundFrame,
    },
    /// Transport-level error (connect failure or socket error).
    TransportError {
        /// Token of the failing stream.
        token: SessionToken,
        /// Error description.
        message: String,
    },
    /// The transport closed.
    Closed {
        /// Token of the closed stream.
        token: SessionToken,
    },
    /// No inbound frame within the idle timeout.
    IdleTimeout {
        /// Token of the silent stream.
        token: SessionToken,
    },
    /// The reconnect timer fired.
    ReconnectDue {
        /// Token the timer was scheduled under.
        token: SessionToken,
    },
    /// Manual reconnect requested by the caller.
    Reconnect,
    /// Explicit stop.
    Stop,
}

/// Side effect requested by the machine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Open the transport stream under `token`.
    OpenStream {
        /// Token to capture in the stream's callbacks.
        token: SessionToken,
    },
    /// Install the heartbeat interval under `token`.
    InstallHeartbeat {
        /// Token to capture in the heartbeat.
        token: SessionToken,
    },
    /// Release the heartbeat registration.
    ReleaseHeartbeat,
    /// Release the stream registration.
    ReleaseStream,
    /// Schedule a reconnect timer.
    ScheduleReconnect {
        /// Token the timer must re-validate when it fires.
        token: SessionToken,
        /// Delay before firing.
        delay: Duration,
    },
    /// Release a pending reconnect timer.
    CancelReconnect,
    /// Issue a fresh token and feed `Start` back into the machine.
    Restart,
    /// Hand a price event to the dispatcher.
    Deliver(PriceEvent),
    /// Release every registration owned by the session.
    ReleaseAll,
}

// =============================================================================
// Machine
// =============================================================================

/// Connection state machine for one (symbol, market) session.
#[derive(Debug, Clone)]
pub struct SessionMachine {
    symbol: String,
    market: String,
    state: ConnectionState,
    token: Option<SessionToken>,
    stopped: bool,
    halted: bool,
    reconnect_pending: bool,
    last_error: Option<String>,
    last_price: Option<Decimal>,
    direction: Direction,
    reconnect: ReconnectPolicy,
    errors: ErrorPolicy,
}

impl SessionMachine {
    /// Create an idle machine for `symbol` on `market`.
    pub fn new(
        symbol: impl Into<String>,
        market: impl Into<String>,
        reconnect: ReconnectConfig,
        errors: ErrorPolicy,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            market: market.into(),
            state: ConnectionState::Disconnected,
            token: None,
            stopped: false,
            halted: false,
            reconnect_pending: false,
            last_error: None,
            last_price: None,
            direction: Direction::Unchanged,
            reconnect: ReconnectPolicy::new(reconnect),
            errors,
        }
    }

    /// Apply one input and return the effects to perform.
    pub fn handle(&mut self, input: SessionInput) -> Vec<Effect> {
        match input {
            SessionInput::Start { token } => self.on_start(token),
            SessionInput::Opened { token } if self.is_live(token) => self.on_opened(token),
            SessionInput::Frame { token, frame } if self.is_live(token) => {
                self.on_frame(token, frame)
            }
            SessionInput::TransportError { token, message } if self.is_live(token) => {
                self.state = ConnectionState::Error;
                self.last_error = Some(message);
                Vec::new()
            }
            SessionInput::Closed { token } | SessionInput::IdleTimeout { token }
                if self.is_live(token) =>
            {
                self.on_closed(token)
            }
            SessionInput::ReconnectDue { token }
                if self.is_live(token) && self.reconnect_pending =>
            {
                self.reconnect_pending = false;
                vec![Effect::Restart]
            }
            SessionInput::Reconnect => self.on_manual_reconnect(),
            SessionInput::Stop => self.on_stop(),
            _ => Vec::new(),
        }
    }

    fn on_start(&mut self, token: SessionToken) -> Vec<Effect> {
        if self.stopped {
            return Vec::new();
        }
        self.token = Some(token);
        self.state = ConnectionState::Connecting;
        // Every attempt is a fresh session: its first price has no predecessor.
        self.last_price = None;
        self.direction = Direction::Unchanged;
        self.halted = false;
        self.reconnect_pending = false;
        vec![
            Effect::ReleaseHeartbeat,
            Effect::ReleaseStream,
            Effect::CancelReconnect,
            Effect::OpenStream { token },
        ]
    }

    fn on_opened(&mut self, token: SessionToken) -> Vec<Effect> {
        if self.state != ConnectionState::Connecting {
            return Vec::new();
        }
        self.state = ConnectionState::Connected;
        self.last_error = None;
        self.reconnect.reset();
        vec![Effect::InstallHeartbeat { token }]
    }

    fn on_frame(&mut self, token: SessionToken, frame: InboundFrame) -> Vec<Effect> {
        match frame {
            InboundFrame::Connected => self.on_opened(token),
            InboundFrame::Price(price) => {
                let direction = Direction::between(self.last_price, price.price);
                self.last_price = Some(price.price);
                self.direction = direction;
                vec![Effect::Deliver(price.into_event(&self.symbol, direction))]
            }
            InboundFrame::Error(error) => self.on_error_frame(error),
            InboundFrame::Other => Vec::new(),
        }
    }

    fn on_error_frame(&mut self, error: ErrorFrame) -> Vec<Effect> {
        let message = if error.message.is_empty() {
            error.code.clone().unwrap_or_else(|| "unknown error".to_string())
        } else {
            error.message
        };
        self.last_error = Some(message);

        match self.errors.classify(error.code.as_deref()) {
            ErrorClass::Transient => Vec::new(),
            ErrorClass::Terminal => {
                self.state = ConnectionState::Error;
                self.halted = true;
                self.reconnect_pending = false;
                vec![
                    Effect::ReleaseHeartbeat,
                    Effect::ReleaseStream,
                    Effect::CancelReconnect,
                ]
            }
        }
    }

    fn on_closed(&mut self, token: SessionToken) -> Vec<Effect> {
        if self.reconnect_pending {
            return Vec::new();
        }
        match self.reconnect.next_delay() {
            Some(delay) => {
                self.state = ConnectionState::Disconnected;
                self.reconnect_pending = true;
                vec![
                    Effect::ReleaseHeartbeat,
                    Effect::ReleaseStream,
                    Effect::ScheduleReconnect { token, delay },
                ]
            }
            None => {
                self.state = ConnectionState::Error;
                self.halted = true;
                self.last_error = Some(format!(
                    "maximum reconnection attempts ({}) exceeded",
                    self.reconnect.max_attempts()
                ));
                vec![Effect::ReleaseHeartbeat, Effect::ReleaseStream]
            }
        }
    }

    fn on_manual_reconnect(&mut self) -> Vec<Effect> {
        if self.stopped || self.token.is_none() {
            return Vec::new();
        }
        self.halted = false;
        self.reconnect_pending = false;
        self.reconnect.reset();
        vec![Effect::Restart]
    }

    fn on_stop(&mut self) -> Vec<Effect> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        self.state = ConnectionState::Disconnected;
        self.token = None;
        self.reconnect_pending = false;
        vec![Effect::ReleaseAll]
    }

    /// Current token, stopped and not halted by a terminal fault.
    fn is_live(&self, token: SessionToken) -> bool {
        !self.stopped && !self.halted && self.token == Some(token)
    }

    /// Snapshot of the session.
    #[must_use]
    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            symbol: self.symbol.clone(),
            market: self.market.clone(),
            state: self.state,
            last_error: self.last_error.clone(),
            last_price: self.last_price,
            direction: self.direction,
            reconnect_attempts: self.reconnect.attempt_count(),
        }
    }

    /// Connection state.
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Token of the current attempt, if any.
    #[must_use]
    pub const fn token(&self) -> Option<SessionToken> {
        self.token
    }

    /// Whether `stop` has been applied.
    #[must_use]
    pub const fn is_stopped(&self) -> bool {
        self.stopped
    }

    /// Whether a terminal fault suspended automatic reconnects.
    #[must_use]
    pub const fn is_halted(&self) -> bool {
        self.halted
    }

    /// Session symbol.
    #[must_use]
    pub fn symbol(&self) -> &str {
        &self.symbol
    }

    /// Session market.
    #[must_use]
    pub fn market(&self) -> &str {
        &self.market
    }
}
