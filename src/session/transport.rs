//! Boundary between the session facade and a concrete STOMP transport.
//!
//! A transport implements [`StompConnector`] to open sessions and
//! [`StompSession`] to write frames. Inbound traffic flows back through the
//! [`SessionEvents`] handle passed to `connect`, which the transport keeps
//! for the lifetime of the session.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::debug;

use super::{DisconnectCause, TransportError};
use crate::{
    config::SessionConfig,
    frame::{Frame, Headers},
    subscription::SubscriptionId,
};

/// An established session able to write frames to the broker.
///
/// Implementations must be cheap to call concurrently; the adapter issues
/// operations for different destinations in parallel.
#[async_trait]
pub trait StompSession: Send + Sync {
    /// Write a `SUBSCRIBE` frame and return the identifier it was sent with.
    ///
    /// `headers` already contains the destination's own headers and, when a
    /// receipt was requested, the `receipt` header.
    async fn subscribe(
        &self,
        destination: &str,
        headers: Headers,
    ) -> Result<SubscriptionId, TransportError>;

    /// Write an `UNSUBSCRIBE` frame for `subscription_id`.
    async fn unsubscribe(
        &self,
        subscription_id: &SubscriptionId,
        headers: Headers,
    ) -> Result<(), TransportError>;

    /// Write a `SEND` frame.
    async fn send(
        &self,
        destination: &str,
        body: Bytes,
        headers: Headers,
    ) -> Result<(), TransportError>;

    /// Write `DISCONNECT` and release the transport.
    async fn disconnect(&self);
}

/// Factory performing the transport handshake.
///
/// Returning `Ok` signals that the broker accepted the connection; the
/// session facade treats that as the transition into `Connected`.
#[async_trait]
pub trait StompConnector: Send + Sync + 'static {
    async fn connect(
        &self,
        config: &SessionConfig,
        events: SessionEvents,
    ) -> Result<Arc<dyn StompSession>, TransportError>;
}

/// Events delivered to the adapter's inbound task, in session order.
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// A session with the given generation completed its handshake.
    Connected { generation: u64 },
    /// A frame arrived on the session with the given generation.
    Frame { generation: u64, frame: Frame },
    /// The transport reported a failure that did not end the session, or a
    /// connect attempt failed.
    Error(TransportError),
    /// The session with the given generation ended.
    Disconnected {
        generation: u64,
        cause: DisconnectCause,
    },
    /// The reconnect policy was exhausted; the supervisor has exited and no
    /// further events follow.
    GaveUp { attempts: u32 },
}

/// Callback surface handed to a transport for one session.
///
/// Every method is non-blocking and safe to call from the transport's own
/// reader task. Events from a session that has since been replaced are
/// discarded by the adapter.
#[derive(Clone, Debug)]
pub struct SessionEvents {
    generation: u64,
    inbound: mpsc::UnboundedSender<SessionEvent>,
    lost: mpsc::UnboundedSender<DisconnectCause>,
}

impl SessionEvents {
    pub(crate) fn new(
        generation: u64,
        inbound: mpsc::UnboundedSender<SessionEvent>,
        lost: mpsc::UnboundedSender<DisconnectCause>,
    ) -> Self {
        Self {
            generation,
            inbound,
            lost,
        }
    }

    /// Generation of the session these callbacks belong to.
    #[must_use]
    pub fn generation(&self) -> u64 { self.generation }

    /// Deliver an inbound frame. Returns `false` if the adapter has stopped.
    pub fn on_frame(&self, frame: Frame) -> bool {
        self.inbound
            .send(SessionEvent::Frame {
                generation: self.generation,
                frame,
            })
            .is_ok()
    }

    /// Report a non-fatal transport failure.
    pub fn on_error(&self, cause: TransportError) -> bool {
        self.inbound.send(SessionEvent::Error(cause)).is_ok()
    }

    /// Report that the session has ended. The supervisor reconnects per its
    /// policy.
    pub fn on_disconnected(&self, cause: DisconnectCause) {
        if self.lost.send(cause).is_err() {
            debug!(
                generation = self.generation,
                "disconnect reported for a session no longer supervised"
            );
        }
    }
}
