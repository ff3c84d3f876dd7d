//! Error types surfaced by the adapter.
//!
//! Transport failures stay inside the session's back-off loop and per-item
//! failures travel as event data; only control-surface misuse is returned to
//! callers as [`AdapterError`].

use crate::{
    config::ConfigError,
    converter::PayloadType,
    frame::StompCommand,
    session::TransportError,
};

/// Failure reported through an `Error` lifecycle event.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StompError {
    /// The transport failed while connecting or writing a frame.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    /// A subscribe or unsubscribe did not take effect.
    #[error(transparent)]
    Subscription(#[from] SubscriptionError),
    /// The broker sent an `ERROR` frame not tied to any receipt.
    #[error("broker error: {message}")]
    Broker { message: String },
}

/// A subscribe or unsubscribe that the broker did not confirm.
///
/// The destination's intent is unaffected: under the default failure policy
/// it stays in the desired set and is subscribed again after a reconnect.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    /// The broker answered with an `ERROR` frame.
    #[error("{command} {destination} rejected: {reason}")]
    Rejected {
        command: StompCommand,
        destination: String,
        reason: String,
    },
    /// The receipt did not arrive before its deadline.
    #[error("{command} {destination} was not confirmed in time")]
    TimedOut {
        command: StompCommand,
        destination: String,
    },
    /// The session ended before the receipt arrived.
    #[error("{command} {destination} lost with its session")]
    ConnectionLost {
        command: StompCommand,
        destination: String,
    },
    /// The frame could not be written.
    #[error("{command} {destination} could not be written: {source}")]
    Transport {
        command: StompCommand,
        destination: String,
        #[source]
        source: TransportError,
    },
}

impl SubscriptionError {
    /// Destination the failed operation targeted.
    #[must_use]
    pub fn destination(&self) -> &str {
        match self {
            Self::Rejected { destination, .. }
            | Self::TimedOut { destination, .. }
            | Self::ConnectionLost { destination, .. }
            | Self::Transport { destination, .. } => destination,
        }
    }
}

/// Errors returned by the adapter's builder and control surface.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum AdapterError {
    /// `build` was called without an output sink.
    #[error("an output sink is required")]
    MissingOutput,
    /// The session configuration failed validation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(#[from] ConfigError),
    /// No decoder is registered for the configured payload type.
    #[error("no suitable decoder, payload type={0}")]
    NoDecoder(PayloadType),
    /// `start` was called on a running adapter.
    #[error("adapter is already running")]
    AlreadyRunning,
    /// The operation needs a connected session.
    #[error(transparent)]
    Transport(#[from] TransportError),
}
