//! Reconnect policy for the session supervisor.

use std::time::Duration;

use serde::Deserialize;

use crate::config::deserialize_millis;

/// Exponential back-off applied between connect attempts.
///
/// The first retry waits `initial_delay`; each further failure doubles the
/// wait up to `max_delay`. `max_attempts` bounds consecutive failures, `None`
/// retries indefinitely. A successful connect resets both the delay and the
/// attempt count.
///
/// # Default Values
/// - `initial_delay`: 1 second
/// - `max_delay`: 30 seconds
/// - `max_attempts`: unbounded
///
/// Durations are read from configuration as milliseconds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    /// Delay before the first retry.
    #[serde(rename = "initial_delay_ms", deserialize_with = "deserialize_millis")]
    pub initial_delay: Duration,
    /// Upper bound for the exponential delay.
    #[serde(rename = "max_delay_ms", deserialize_with = "deserialize_millis")]
    pub max_delay: Duration,
    /// Consecutive failed attempts tolerated before giving up.
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: None,
        }
    }
}

impl ReconnectPolicy {
    /// Clamp delays to at least one millisecond and ensure
    /// `initial_delay <= max_delay`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::time::Duration;
    ///
    /// use stompwire::session::ReconnectPolicy;
    ///
    /// let policy = ReconnectPolicy {
    ///     initial_delay: Duration::from_millis(50),
    ///     max_delay: Duration::ZERO,
    ///     max_attempts: None,
    /// };
    ///
    /// let normalized = policy.normalized();
    /// assert_eq!(normalized.initial_delay, Duration::from_millis(1));
    /// assert_eq!(normalized.max_delay, Duration::from_millis(50));
    /// ```
    #[must_use]
    pub fn normalized(mut self) -> Self {
        self.initial_delay = self.initial_delay.max(Duration::from_millis(1));
        self.max_delay = self.max_delay.max(Duration::from_millis(1));
        if self.initial_delay > self.max_delay {
            std::mem::swap(&mut self.initial_delay, &mut self.max_delay);
        }
        self
    }

    /// Delay to use after `current` has elapsed without success.
    #[must_use]
    pub fn next_delay(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_delay)
    }

    /// Returns `true` once `failures` consecutive attempts exhaust the policy.
    #[must_use]
    pub fn is_exhausted(&self, failures: u32) -> bool {
        self.max_attempts.is_some_and(|max| failures >= max)
    }
}
