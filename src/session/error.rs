//! Error types for session operations.

use std::fmt;

use thiserror::Error;

use crate::frame::StompCommand;

/// Failures raised by the transport or by the session facade.
///
/// Only [`Exhausted`](Self::Exhausted) is fatal to the adapter: connect
/// failures feed the reconnect policy and per-operation failures are
/// reported as events.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No session is currently connected.
    #[error("session is not connected")]
    NotConnected,
    /// A connection supervisor is already running for this session manager.
    #[error("a connection is already active or being established")]
    AlreadyActive,
    /// The transport could not reach the endpoint or complete the handshake.
    #[error("connect failed: {0}")]
    Connect(String),
    /// A frame could not be written to the transport.
    #[error("failed to write {command} frame: {reason}")]
    Write {
        /// Command of the frame that failed.
        command: StompCommand,
        /// Transport-provided description.
        reason: String,
    },
    /// The session was closed while an operation was in flight.
    #[error("session closed")]
    Closed,
    /// The reconnect policy gave up.
    #[error("gave up after {attempts} failed connect attempts")]
    Exhausted {
        /// Number of consecutive failed attempts.
        attempts: u32,
    },
}

/// Why a session left the `Connected` state.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectCause {
    /// The application asked for the disconnect.
    Requested,
    /// The broker closed the session.
    RemoteClosed,
    /// The transport failed.
    TransportFailure(String),
}

impl fmt::Display for DisconnectCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("disconnect requested"),
            Self::RemoteClosed => f.write_str("closed by remote"),
            Self::TransportFailure(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}
