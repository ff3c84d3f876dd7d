//! Adapter and session configuration.
//!
//! Both [`SessionConfig`] and [`AdapterConfig`] deserialize with defaults for
//! every field, so an embedding application can load them from whichever
//! format it already uses. Durations are expressed in milliseconds.

use std::time::Duration;

use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::{
    converter::PayloadType,
    frame::{Headers, header},
    session::ReconnectPolicy,
};

/// Settings for the session facade and the transport it drives.
#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Virtual host sent on `CONNECT`.
    pub host: Option<String>,
    /// Login sent on `CONNECT`.
    pub login: Option<String>,
    /// Passcode sent on `CONNECT`.
    pub passcode: Option<String>,
    /// Outgoing and incoming heart-beat intervals in milliseconds.
    pub heartbeat: (u64, u64),
    /// Request a receipt for every subscribe, unsubscribe and send.
    pub auto_receipt: bool,
    /// How long a receipt-tracked operation waits for confirmation.
    #[serde(rename = "receipt_timeout_ms", deserialize_with = "deserialize_millis")]
    pub receipt_timeout: Duration,
    /// Prefix for generated receipt tokens.
    pub receipt_prefix: String,
    /// Back-off between connect attempts.
    pub reconnect: ReconnectPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: None,
            login: None,
            passcode: None,
            heartbeat: (10_000, 10_000),
            auto_receipt: false,
            receipt_timeout: Duration::from_secs(10),
            receipt_prefix: "rcpt".to_owned(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

impl SessionConfig {
    /// Headers a transport should send on its `CONNECT` frame.
    ///
    /// ```
    /// use stompwire::SessionConfig;
    ///
    /// let config = SessionConfig {
    ///     host: Some("broker.local".into()),
    ///     ..SessionConfig::default()
    /// };
    /// let headers = config.connect_headers();
    /// assert_eq!(headers.get("accept-version"), Some("1.2"));
    /// assert_eq!(headers.get("host"), Some("broker.local"));
    /// assert_eq!(headers.get("heart-beat"), Some("10000,10000"));
    /// ```
    #[must_use]
    pub fn connect_headers(&self) -> Headers {
        let mut headers = Headers::new().with(header::ACCEPT_VERSION, "1.2");
        if let Some(host) = &self.host {
            headers.insert(header::HOST, host.as_str());
        }
        if let Some(login) = &self.login {
            headers.insert(header::LOGIN, login.as_str());
        }
        if let Some(passcode) = &self.passcode {
            headers.insert(header::PASSCODE, passcode.as_str());
        }
        let (send, receive) = self.heartbeat;
        headers.insert(header::HEART_BEAT, format!("{send},{receive}"));
        headers
    }

    /// Check values that would make receipt tracking meaningless.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field as a [`ConfigError`].
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.receipt_timeout.is_zero() {
            return Err(ConfigError::ZeroReceiptTimeout);
        }
        if self.receipt_prefix.is_empty() {
            return Err(ConfigError::EmptyReceiptPrefix);
        }
        Ok(())
    }
}

/// A [`SessionConfig`] field with an unusable value.
#[non_exhaustive]
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("receipt_timeout must be greater than zero")]
    ZeroReceiptTimeout,
    #[error("receipt_prefix must not be empty")]
    EmptyReceiptPrefix,
}

/// What the coordinator does when the broker rejects a subscription or the
/// receipt never arrives.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FailurePolicy {
    /// Keep the destination and subscribe again after the next reconnect.
    #[default]
    RetryOnReconnect,
    /// Drop the destination from the desired set.
    Abandon,
}

/// Settings for the inbound adapter itself.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct AdapterConfig {
    /// Shape inbound payloads are decoded into.
    pub payload_type: PayloadType,
    /// Reaction to failed subscribe receipts.
    pub failure_policy: FailurePolicy,
}

pub(crate) fn deserialize_millis<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_millis)
}
