//! Service Configuration Settings
//!
//! Configuration for the live price service, loaded from environment
//! variables.

use std::fmt;
use std::time::Duration;

use url::Url;

use crate::application::services::{HeartbeatConfig, SessionConfig};
use crate::domain::session::ReconnectConfig;
use crate::domain::session::reconnect::DEFAULT_RECONNECT_DELAY;
use crate::infrastructure::websocket::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_STREAM_PATH};

/// Default health check HTTP port.
pub const DEFAULT_HEALTH_PORT: u16 = 8083;

/// Market used when a subscription entry omits one.
pub const DEFAULT_MARKET: &str = "US";

/// One configured (symbol, market) subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolSubscription {
    /// Instrument symbol.
    pub symbol: String,
    /// Market / venue.
    pub market: String,
}

impl fmt::Display for SymbolSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.symbol, self.market)
    }
}

impl SymbolSubscription {
    /// Parse a comma-separated `SYMBOL[:MARKET]` list.
    ///
    /// The market is split at the last colon so symbols may contain slashes
    /// (`BTC/USD:CRYPTO`). Blank entries are skipped.
    #[must_use]
    pub fn parse_list(value: &str) -> Vec<Self> {
        value
            .split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .filter_map(|entry| {
                let (symbol, market) = match entry.rsplit_once(':') {
                    Some((symbol, market)) if !market.trim().is_empty() => {
                        (symbol.trim(), market.trim())
                    }
                    Some((symbol, _)) => (symbol.trim(), DEFAULT_MARKET),
                    None => (entry, DEFAULT_MARKET),
                };
                (!symbol.is_empty()).then(|| Self {
                    symbol: symbol.to_string(),
                    market: market.to_string(),
                })
            })
            .collect()
    }
}

/// Complete service configuration.
#[derive(Debug, Clone)]
pub struct StreamConfig {
    /// Base `ws://` or `wss://` URL of the price backend.
    pub ws_url: Url,
    /// Path under the base URL where symbol streams live.
    pub stream_path: String,
    /// Symbols to follow, one independent session each.
    pub subscriptions: Vec<SymbolSubscription>,
    /// Health check HTTP port (0 = disabled).
    pub health_port: u16,
    /// Transport connect timeout.
    pub connect_timeout: Duration,
    /// Per-session settings.
    pub session: SessionConfig,
}

impl StreamConfig {
    /// Create configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing,
    /// empty, or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if required variables are missing, empty, or invalid.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let raw_url = required(&lookup, "LIVE_PRICE_WS_URL")?;
        let ws_url = Url::parse(&raw_url).map_err(|e| ConfigError::InvalidValue {
            key: "LIVE_PRICE_WS_URL".to_string(),
            message: e.to_string(),
        })?;
        if !matches!(ws_url.scheme(), "ws" | "wss") {
            return Err(ConfigError::InvalidValue {
                key: "LIVE_PRICE_WS_URL".to_string(),
                message: format!("unsupported scheme '{}'", ws_url.scheme()),
            });
        }

        let subscriptions =
            SymbolSubscription::parse_list(&required(&lookup, "LIVE_PRICE_SUBSCRIPTIONS")?);
        if subscriptions.is_empty() {
            return Err(ConfigError::EmptyValue("LIVE_PRICE_SUBSCRIPTIONS".to_string()));
        }

        let stream_path = lookup("LIVE_PRICE_STREAM_PATH")
            .map(|v| v.trim().trim_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| DEFAULT_STREAM_PATH.to_string());

        let heartbeat_defaults = HeartbeatConfig::default();
        let heartbeat = HeartbeatConfig {
            interval: parse_duration_secs(
                &lookup,
                "LIVE_PRICE_HEARTBEAT_INTERVAL_SECS",
                heartbeat_defaults.interval,
            ),
            idle_timeout: parse_duration_secs(
                &lookup,
                "LIVE_PRICE_IDLE_TIMEOUT_SECS",
                heartbeat_defaults.idle_timeout,
            ),
            keepalive_frame: heartbeat_defaults.keepalive_frame,
        };

        let initial_delay = parse_duration_millis(
            &lookup,
            "LIVE_PRICE_RECONNECT_DELAY_MS",
            DEFAULT_RECONNECT_DELAY,
        );
        let reconnect = ReconnectConfig::exponential(
            initial_delay,
            parse_duration_millis(&lookup, "LIVE_PRICE_RECONNECT_DELAY_MAX_MS", initial_delay)
                .max(initial_delay),
            parse_f64(&lookup, "LIVE_PRICE_RECONNECT_MULTIPLIER", 1.0).max(1.0),
        )
        .with_max_attempts(parse_u32(&lookup, "LIVE_PRICE_MAX_RECONNECT_ATTEMPTS", 0));

        let defaults = SessionConfig::default();
        let terminal_error_codes = lookup("LIVE_PRICE_TERMINAL_ERROR_CODES")
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|code| !code.is_empty())
                    .map(str::to_string)
                    .collect::<Vec<_>>()
            })
            .filter(|codes| !codes.is_empty())
            .unwrap_or(defaults.terminal_error_codes);

        let session = SessionConfig {
            heartbeat,
            reconnect,
            max_update_hz: parse_u32(&lookup, "LIVE_PRICE_MAX_UPDATE_HZ", defaults.max_update_hz),
            terminal_error_codes,
        };

        Ok(Self {
            ws_url,
            stream_path,
            subscriptions,
            health_port: parse_u16(&lookup, "LIVE_PRICE_HEALTH_PORT", DEFAULT_HEALTH_PORT),
            connect_timeout: parse_duration_secs(
                &lookup,
                "LIVE_PRICE_CONNECT_TIMEOUT_SECS",
                DEFAULT_CONNECT_TIMEOUT,
            ),
            session,
        })
    }
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Required environment variable is missing.
    #[error("missing required environment variable: {0}")]
    MissingEnvVar(String),
    /// Environment variable has empty value.
    #[error("environment variable {0} cannot be empty")]
    EmptyValue(String),
    /// Environment variable could not be interpreted.
    #[error("invalid value for {key}: {message}")]
    InvalidValue {
        /// Variable name.
        key: String,
        /// What was wrong.
        message: String,
    },
}

fn required<F>(lookup: &F, key: &str) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))?;
    if value.trim().is_empty() {
        return Err(ConfigError::EmptyValue(key.to_string()));
    }
    Ok(value.trim().to_string())
}

fn parse_u16<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u16) -> u16 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_u32<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: u32) -> u32 {
    lookup(key)
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn parse_f64<F: Fn(&str) -> Option<String>>(lookup: &F, key: &str, default: f64) -> f64 {
    lookup(key)
        .and_then(|v| v.trim().parse::<f64>().ok())
        .filter(|v| v.is_finite())
        .unwrap_or(default)
}

fn parse_duration_secs<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_secs)
}

fn parse_duration_millis<F: Fn(&str) -> Option<String>>(
    lookup: &F,
    key: &str,
    default: Duration,
) -> Duration {
    lookup(key)
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map_or(default, Duration::from_millis)
}
