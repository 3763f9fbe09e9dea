//! Reconnection Policy
//!
//! Delay schedule for automatic reconnects after a transient close. The
//! default is a fixed delay; exponential growth and jitter are available
//! through configuration.

use std::time::Duration;

use rand::Rng;

/// Default fixed reconnect delay.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

/// Reconnect delay schedule and attempt limit.
#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectConfig {
    /// Wait before the first reconnect after a drop.
    pub initial_delay: Duration,
    /// Upper bound for any single wait.
    pub max_delay: Duration,
    /// Growth per attempt; 1.0 keeps the wait constant.
    pub multiplier: f64,
    /// Random spread as a fraction of the wait (0.2 spreads by up to 20%).
    pub jitter_factor: f64,
    /// Consecutive reconnects allowed before giving up; 0 never gives up.
    pub max_attempts: u32,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self::fixed(DEFAULT_RECONNECT_DELAY)
    }
}

impl ReconnectConfig {
    /// Fixed delay, no jitter, unlimited attempts.
    #[must_use]
    pub const fn fixed(delay: Duration) -> Self {
        Self {
            initial_delay: delay,
            max_delay: delay,
            multiplier: 1.0,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Exponential backoff between `initial_delay` and `max_delay`.
    #[must_use]
    pub const fn exponential(initial_delay: Duration, max_delay: Duration, multiplier: f64) -> Self {
        Self {
            initial_delay,
            max_delay,
            multiplier,
            jitter_factor: 0.0,
            max_attempts: 0,
        }
    }

    /// Limit the number of consecutive attempts.
    #[must_use]
    pub const fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Randomize each delay by ±`jitter_factor`.
    #[must_use]
    pub const fn with_jitter(mut self, jitter_factor: f64) -> Self {
        self.jitter_factor = jitter_factor;
        self
    }
}

/// Counts consecutive reconnects and hands out the wait before each.
///
/// # Example
///
/// ```rust
/// use std::time::Duration;
/// use live_price_stream::domain::session::{ReconnectConfig, ReconnectPolicy};
///
/// let mut policy = ReconnectPolicy::new(ReconnectConfig::fixed(Duration::from_secs(3)));
///
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
/// assert_eq!(policy.next_delay(), Some(Duration::from_secs(3)));
///
/// // Successful connection
/// policy.reset();
/// assert_eq!(policy.attempt_count(), 0);
/// ```
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    config: ReconnectConfig,
    current_delay: Duration,
    attempt_count: u32,
}

impl ReconnectPolicy {
    /// Start with no attempts made.
    #[must_use]
    pub const fn new(config: ReconnectConfig) -> Self {
        let initial_delay = config.initial_delay;
        Self {
            config,
            current_delay: initial_delay,
            attempt_count: 0,
        }
    }

    /// Record an attempt and return its wait, or `None` when the limit is hit.
    #[must_use]
    pub fn next_delay(&mut self) -> Option<Duration> {
        if !self.should_retry() {
            return None;
        }

        self.attempt_count += 1;
        let wait = self.jittered(self.current_delay);
        self.current_delay =
            scale_millis(self.current_delay, self.config.multiplier).min(self.config.max_delay);
        Some(wait)
    }

    /// Forget past attempts once a stream opens.
    pub const fn reset(&mut self) {
        self.current_delay = self.config.initial_delay;
        self.attempt_count = 0;
    }

    /// Consecutive attempts since the last reset.
    #[must_use]
    pub const fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Configured attempt limit (0 = unlimited).
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.config.max_attempts
    }

    /// Whether another attempt is allowed.
    #[must_use]
    pub const fn should_retry(&self) -> bool {
        self.config.max_attempts == 0 || self.attempt_count < self.config.max_attempts
    }

    fn jittered(&self, wait: Duration) -> Duration {
        let spread = self.config.jitter_factor;
        if spread <= 0.0 {
            return wait;
        }
        let factor = 1.0 + rand::rng().random_range(-spread..=spread);
        scale_millis(wait, factor).max(Duration::from_millis(1))
    }
}

/// `duration * factor`, rounded to whole milliseconds and saturating.
fn scale_millis(duration: Duration, factor: f64) -> Duration {
    #[allow(clippy::cast_precision_loss)]
    let millis = (duration.as_millis() as f64 * factor).round();
    if !millis.is_finite() || millis <= 0.0 {
        return Duration::ZERO;
    }
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    let whole = millis as u64;
    Duration::from_millis(whole)
}
