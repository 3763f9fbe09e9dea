//! Health, Readiness and Metrics over HTTP
//!
//! Reports per-subscriber session state and registry occupancy so an
//! orchestrator can tell a stalled price feed from a healthy one.
//!
//! # Routes
//!
//! | Route      | Body                              | 503 when                         |
//! |------------|-----------------------------------|----------------------------------|
//! | `/health`  | JSON [`HealthResponse`]           | no enabled session is connected  |
//! | `/healthz` | `OK`                              | never                            |
//! | `/readyz`  | `READY` / `NOT READY`             | any enabled session is down      |
//! | `/metrics` | Prometheus text                   | no recorder installed            |

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::application::services::SessionManager;
use crate::domain::registry::SubscriptionRegistry;
use crate::domain::session::{ConnectionState, SessionStatus};
use crate::infrastructure::metrics::get_metrics_handle;

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

// =============================================================================
// Report Types
// =============================================================================

/// Body of `GET /health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Aggregate over enabled sessions.
    pub status: HealthStatus,
    /// Service version.
    pub version: String,
    /// Seconds since the state was created.
    pub uptime_secs: u64,
    /// Time the report was produced.
    pub current_time: DateTime<Utc>,
    /// One entry per subscriber.
    pub sessions: Vec<SessionReport>,
    /// Registry occupancy.
    pub registry: RegistryReport,
}

/// Aggregate session health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Every enabled session is connected.
    Healthy,
    /// At least one, but not every, enabled session is connected.
    Degraded,
    /// No enabled session is connected.
    Unhealthy,
}

impl HealthStatus {
    /// Aggregate a set of session reports. Disabled subscribers are ignored.
    #[must_use]
    pub fn from_sessions(sessions: &[SessionReport]) -> Self {
        let (enabled, connected) = sessions
            .iter()
            .filter(|s| s.active)
            .fold((0usize, 0usize), |(enabled, connected), s| {
                (enabled + 1, connected + usize::from(s.is_connected()))
            });

        match connected {
            c if c == enabled => Self::Healthy,
            0 => Self::Unhealthy,
            _ => Self::Degraded,
        }
    }

    const fn http_status(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

/// One subscriber in the health report.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    /// Subscriber id.
    pub subscriber: String,
    /// Whether the subscriber holds an enabled subscription.
    pub active: bool,
    /// Current session, if subscribed.
    pub session: Option<SessionStatus>,
}

impl SessionReport {
    fn is_connected(&self) -> bool {
        self.session
            .as_ref()
            .is_some_and(|s| s.state == ConnectionState::Connected)
    }
}

/// Registry occupancy in the health report.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryReport {
    /// Live registrations.
    pub entries: usize,
    /// Live registrations by resource kind.
    pub by_kind: BTreeMap<&'static str, usize>,
}

// =============================================================================
// State
// =============================================================================

/// What the health routes observe.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    registry: Arc<SubscriptionRegistry>,
    managers: Vec<Arc<SessionManager>>,
}

impl HealthServerState {
    /// Observe `managers` and the registry they share.
    #[must_use]
    pub fn new(
        version: String,
        registry: Arc<SubscriptionRegistry>,
        managers: Vec<Arc<SessionManager>>,
    ) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            registry,
            managers,
        }
    }

    /// Current view of every subscriber.
    #[must_use]
    pub fn sessions(&self) -> Vec<SessionReport> {
        self.managers
            .iter()
            .map(|manager| SessionReport {
                subscriber: manager.id().to_string(),
                active: manager.is_active(),
                session: manager.status(),
            })
            .collect()
    }

    /// Whether every enabled session is connected.
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.sessions()
            .iter()
            .filter(|s| s.active)
            .all(SessionReport::is_connected)
    }

    /// Full health report.
    #[must_use]
    pub fn report(&self) -> HealthResponse {
        let sessions = self.sessions();
        let snapshot = self.registry.snapshot();

        let mut by_kind = BTreeMap::new();
        for info in &snapshot {
            *by_kind.entry(info.kind.as_str()).or_default() += 1;
        }

        HealthResponse {
            status: HealthStatus::from_sessions(&sessions),
            version: self.version.clone(),
            uptime_secs: self.started_at.elapsed().as_secs(),
            current_time: Utc::now(),
            sessions,
            registry: RegistryReport {
                entries: snapshot.len(),
                by_kind,
            },
        }
    }
}

// =============================================================================
// Server
// =============================================================================

/// HTTP server for the health routes.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Serve `state` on `port` until `cancel` fires.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Routes over `state`, without binding a socket.
    pub fn router(state: Arc<HealthServerState>) -> Router {
        Router::new()
            .route("/health", get(report))
            .route("/healthz", get(|| async { "OK" }))
            .route("/readyz", get(readiness))
            .route("/metrics", get(prometheus))
            .with_state(state)
    }

    /// Bind and serve until cancelled.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError` if the port cannot be bound or serving
    /// fails.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let addr = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.port));
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| HealthServerError::Bind {
                port: self.port,
                source,
            })?;
        tracing::info!(port = self.port, "Health server listening");

        axum::serve(listener, Self::router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await
            .map_err(HealthServerError::Serve)?;

        tracing::info!("Health server stopped");
        Ok(())
    }
}

async fn report(State(state): State<Arc<HealthServerState>>) -> Response {
    let body = state.report();
    (body.status.http_status(), Json(body)).into_response()
}

async fn readiness(State(state): State<Arc<HealthServerState>>) -> Response {
    if state.is_ready() {
        (StatusCode::OK, "READY").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY").into_response()
    }
}

async fn prometheus() -> Response {
    match get_metrics_handle() {
        Some(handle) => (
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        )
            .into_response(),
        None => (StatusCode::SERVICE_UNAVAILABLE, "Metrics not initialized").into_response(),
    }
}

/// Health server failure.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The port could not be bound.
    #[error("failed to bind health port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Serving stopped with an I/O error.
    #[error("health server failed")]
    Serve(#[source] std::io::Error),
}
