//! Prometheus Metrics Module
//!
//! Exposes session metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Sessions**: Stream opens, scheduled reconnects, terminal errors
//! - **Frames**: Dropped inbound frames by reason
//! - **Delivery**: Price events delivered and coalesced by the rate limiter
//! - **Registry**: Live registration count
//! - **Latency**: Transport connect duration
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Without an
//! installed recorder every `record_*` call is a no-op.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// # Panics
///
/// Panics if another global recorder was already installed.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .expect("failed to install Prometheus recorder");

            register_metrics();
            handle
        })
        .clone()
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    describe_counter!(
        "live_price_sessions_started_total",
        "Total price stream open attempts"
    );
    describe_counter!(
        "live_price_reconnects_total",
        "Total automatic reconnects scheduled"
    );
    describe_counter!(
        "live_price_terminal_errors_total",
        "Total terminal backend errors that halted reconnects"
    );
    describe_counter!(
        "live_price_frames_dropped_total",
        "Total inbound frames dropped by reason"
    );
    describe_counter!(
        "live_price_events_delivered_total",
        "Total price events delivered to subscribers"
    );
    describe_counter!(
        "live_price_events_coalesced_total",
        "Total price events held back by the rate limiter"
    );
    describe_counter!(
        "live_price_keepalives_sent_total",
        "Total keepalive frames sent"
    );
    describe_gauge!(
        "live_price_registry_entries",
        "Number of live registrations in the subscription registry"
    );
    describe_histogram!(
        "live_price_connect_seconds",
        "Time to open a price stream"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reason an inbound frame was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not a decodable frame.
    Undecodable,
    /// Produced by a superseded session.
    Stale,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Undecodable => "undecodable",
            Self::Stale => "stale",
        }
    }
}

/// Record a stream open attempt.
pub fn record_session_started(symbol: &str) {
    counter!(
        "live_price_sessions_started_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a scheduled reconnect.
pub fn record_reconnect_scheduled(symbol: &str) {
    counter!(
        "live_price_reconnects_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a terminal error.
pub fn record_terminal_error(symbol: &str) {
    counter!(
        "live_price_terminal_errors_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a dropped inbound frame.
pub fn record_frame_dropped(reason: DropReason) {
    counter!(
        "live_price_frames_dropped_total",
        "reason" => reason.as_str()
    )
    .increment(1);
}

/// Record a price event handed to a subscriber callback.
pub fn record_price_delivered(symbol: &str) {
    counter!(
        "live_price_events_delivered_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a price event coalesced by the rate limiter.
pub fn record_price_coalesced(symbol: &str) {
    counter!(
        "live_price_events_coalesced_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Record a keepalive frame sent.
pub fn record_keepalive_sent(symbol: &str) {
    counter!(
        "live_price_keepalives_sent_total",
        "symbol" => symbol.to_string()
    )
    .increment(1);
}

/// Update the registry size gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_registry_entries(count: usize) {
    gauge!("live_price_registry_entries").set(count as f64);
}

/// Record transport connect duration.
pub fn record_connect_duration(duration: Duration) {
    histogram!("live_price_connect_seconds").record(duration.as_secs_f64());
}

// =============================================================================
// Tests
// =============================================================================
