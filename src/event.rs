//! Lifecycle events and the publisher fanning them out to observers.
//!
//! Events are published synchronously from the task that produced them, in
//! observer registration order. An observer that fails or panics is logged
//! and skipped; it never affects the adapter or the remaining observers.

use std::{
    any::Any,
    fmt,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{Arc, PoisonError, RwLock},
};

use log::warn;

use crate::{
    converter::ConversionError,
    error::{StompError, SubscriptionError},
    frame::{Frame, StompCommand},
    receipt::{ReceiptOperation, ReceiptOutcome, ReceiptToken},
    session::DisconnectCause,
    sink::Sink,
    subscription::SubscriptionId,
};

/// Observable state transition of the adapter.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub enum LifecycleEvent {
    /// A session completed its handshake.
    Connected { generation: u64 },
    /// A destination is now live on the broker.
    Subscribed {
        destination: String,
        subscription_id: SubscriptionId,
    },
    /// A receipt-tracked operation settled.
    Receipt(ReceiptEvent),
    /// The session ended.
    Disconnected { cause: DisconnectCause },
    /// An inbound frame could not be converted.
    ConversionError { cause: ConversionError, frame: Frame },
    /// A failure that is not tied to a single frame.
    Error { cause: StompError },
}

impl LifecycleEvent {
    /// Short label used in logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::Subscribed { .. } => "subscribed",
            Self::Receipt(_) => "receipt",
            Self::Disconnected { .. } => "disconnected",
            Self::ConversionError { .. } => "conversion_error",
            Self::Error { .. } => "error",
        }
    }
}

/// The settled outcome of one receipt-tracked operation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiptEvent {
    pub token: ReceiptToken,
    pub command: StompCommand,
    pub destination: Option<String>,
    pub outcome: ReceiptOutcome,
}

impl ReceiptEvent {
    #[must_use]
    pub fn new(token: ReceiptToken, operation: ReceiptOperation, outcome: ReceiptOutcome) -> Self {
        Self {
            token,
            command: operation.command,
            destination: operation.destination,
            outcome,
        }
    }

    #[must_use]
    pub fn is_success(&self) -> bool { self.outcome.is_confirmed() }

    /// The subscription failure this event describes, if it is one.
    #[must_use]
    pub fn error(&self) -> Option<SubscriptionError> {
        if !matches!(self.command, StompCommand::Subscribe | StompCommand::Unsubscribe) {
            return None;
        }
        let command = self.command;
        let destination = self.destination.clone().unwrap_or_default();
        match &self.outcome {
            ReceiptOutcome::Rejected { reason } => Some(SubscriptionError::Rejected {
                command,
                destination,
                reason: reason.clone(),
            }),
            ReceiptOutcome::TimedOut => Some(SubscriptionError::TimedOut {
                command,
                destination,
            }),
            ReceiptOutcome::ConnectionLost => Some(SubscriptionError::ConnectionLost {
                command,
                destination,
            }),
            _ => None,
        }
    }
}

/// Error an observer may return; it is logged and otherwise ignored.
pub type ObserverError = Box<dyn std::error::Error + Send + Sync>;

/// Receives every published [`LifecycleEvent`].
pub trait EventObserver: Send + Sync {
    /// Handle `event`. Must not block.
    ///
    /// # Errors
    ///
    /// Any error is logged by the publisher and otherwise ignored.
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), ObserverError>;
}

impl<F> EventObserver for F
where
    F: Fn(&LifecycleEvent) + Send + Sync,
{
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), ObserverError> {
        self(event);
        Ok(())
    }
}

/// Observer forwarding a copy of every event into a [`Sink`].
///
/// ```
/// use std::sync::Arc;
///
/// use stompwire::event::{EventPublisher, LifecycleEvent, SinkObserver};
///
/// let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
/// let publisher = EventPublisher::new();
/// publisher.register(Arc::new(SinkObserver::new(tx)));
/// publisher.publish(&LifecycleEvent::Connected { generation: 1 });
/// assert_eq!(rx.try_recv().ok(), Some(LifecycleEvent::Connected { generation: 1 }));
/// ```
#[derive(Debug)]
pub struct SinkObserver<S>(S);

impl<S> SinkObserver<S> {
    pub fn new(sink: S) -> Self { Self(sink) }
}

impl<S: Sink<LifecycleEvent>> EventObserver for SinkObserver<S> {
    fn on_event(&self, event: &LifecycleEvent) -> Result<(), ObserverError> {
        self.0.accept(event.clone()).map_err(Into::into)
    }
}

/// Ordered list of observers.
#[derive(Default)]
pub struct EventPublisher {
    observers: RwLock<Vec<Arc<dyn EventObserver>>>,
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("observers", &self.len())
            .finish()
    }
}

impl EventPublisher {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Append `observer`; it sees events published from now on.
    pub fn register(&self, observer: Arc<dyn EventObserver>) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }

    /// Deliver `event` to every observer, returning how many accepted it.
    pub fn publish(&self, event: &LifecycleEvent) -> usize {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let mut delivered = 0;
        for observer in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_event(event))) {
                Ok(Ok(())) => delivered += 1,
                Ok(Err(e)) => warn!("event observer failed: event={}, error={e}", event.kind()),
                Err(panic) => warn!(
                    "event observer panicked: event={}, panic={}",
                    event.kind(),
                    PanicMessage(panic)
                ),
            }
        }
        delivered
    }
}

struct PanicMessage(Box<dyn Any + Send>);

impl fmt::Display for PanicMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(s) = self.0.downcast_ref::<String>() {
            f.write_str(s)
        } else if let Some(s) = self.0.downcast_ref::<&'static str>() {
            f.write_str(s)
        } else {
            f.write_str("non-string panic payload")
        }
    }
}
