//! Inbound Frame Types
//!
//! Wire format for frames arriving on a live price stream. Frames are JSON
//! objects discriminated by a `type` field.
//!
//! # Wire Format (JSON)
//! ```json
//! {"type": "connected"}
//! {"type": "price", "price": 101.25, "change": 1.25, "change_pct": 1.25,
//!  "high": 102.0, "low": 99.5, "open": 100.0, "volume": 120000,
//!  "prev_close": 100.0, "timestamp": "2026-01-02T15:04:05Z"}
//! {"type": "error", "message": "feed not configured", "code": "NOT_CONFIGURED"}
//! ```
//!
//! Any other `type` decodes to [`InboundFrame::Other`]. Text that is not a
//! JSON object with a `type` fails to decode and is dropped by the caller.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::{Direction, PriceEvent};

/// Epoch values above this are milliseconds, below are seconds.
const EPOCH_MILLIS_THRESHOLD: i64 = 100_000_000_000;

/// Frame decoding error.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// Not JSON, or not a recognised frame shape.
    #[error("undecodable frame: {0}")]
    Json(#[from] serde_json::Error),
}

/// A decoded inbound frame.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundFrame {
    /// Handshake acknowledgement.
    Connected,
    /// Price update.
    Price(PriceFrame),
    /// Backend-reported error.
    Error(ErrorFrame),
    /// Anything else (heartbeat acknowledgements and the like).
    #[serde(other)]
    Other,
}

impl InboundFrame {
    /// Decode a text frame.
    ///
    /// # Errors
    ///
    /// Returns `FrameError` if the text is not a JSON frame object.
    pub fn decode(text: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(text.trim())?)
    }

    /// Frame kind label for logs and metrics.
    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Price(_) => "price",
            Self::Error(_) => "error",
            Self::Other => "other",
        }
    }
}

/// Price payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct PriceFrame {
    /// Last traded price.
    pub price: Decimal,
    /// Absolute change.
    #[serde(default)]
    pub change: Option<Decimal>,
    /// Percentage change.
    #[serde(default)]
    pub change_pct: Option<Decimal>,
    /// Session high.
    #[serde(default)]
    pub high: Option<Decimal>,
    /// Session low.
    #[serde(default)]
    pub low: Option<Decimal>,
    /// Session open.
    #[serde(default)]
    pub open: Option<Decimal>,
    /// Session volume.
    #[serde(default)]
    pub volume: Option<Decimal>,
    /// Previous close.
    #[serde(default)]
    pub prev_close: Option<Decimal>,
    /// RFC 3339 string or epoch seconds/milliseconds.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl PriceFrame {
    /// Build the subscriber-facing event for `symbol`.
    #[must_use]
    pub fn into_event(self, symbol: &str, direction: Direction) -> PriceEvent {
        PriceEvent {
            symbol: symbol.to_string(),
            price: self.price,
            change: self.change,
            change_percent: self.change_pct,
            high: self.high,
            low: self.low,
            open: self.open,
            volume: self.volume,
            previous_close: self.prev_close,
            timestamp: self.timestamp.unwrap_or_else(Utc::now),
            direction,
        }
    }
}

/// Error payload.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ErrorFrame {
    /// Human-readable message.
    #[serde(default)]
    pub message: String,
    /// Machine-readable code (string or number on the wire).
    #[serde(default, deserialize_with = "deserialize_code")]
    pub code: Option<String>,
}

fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(parse_timestamp))
}

fn parse_timestamp(value: &Value) -> Option<DateTime<Utc>> {
    match value {
        Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<i64>().ok().and_then(from_epoch)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(truncate))
            .and_then(from_epoch),
        _ => None,
    }
}

#[allow(clippy::cast_possible_truncation)]
fn truncate(value: f64) -> i64 {
    value as i64
}

fn from_epoch(value: i64) -> Option<DateTime<Utc>> {
    if value.abs() >= EPOCH_MILLIS_THRESHOLD {
        Utc.timestamp_millis_opt(value).single()
    } else {
        Utc.timestamp_opt(value, 0).single()
    }
}

fn deserialize_code<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}
