//! The inbound adapter: control surface over the session, coordinator and
//! converter.
//!
//! [`StompInboundAdapter`] is cheap to clone; clones share one running
//! instance. While running, a single inbound task consumes session events in
//! order, converting `MESSAGE` frames, resolving receipts and replaying
//! subscriptions on every new session.

use std::sync::{Arc, Mutex, PoisonError};

use bytes::Bytes;
use tokio::{sync::mpsc, task::JoinHandle};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{info, warn};

mod builder;
mod inbound;

pub use builder::StompInboundAdapterBuilder;

use crate::{
    converter::FrameConverter,
    destination::Destination,
    error::AdapterError,
    event::{EventPublisher, LifecycleEvent, ReceiptEvent},
    frame::Headers,
    message::{ErrorMessage, Message},
    metrics,
    receipt::ReceiptOutcome,
    session::{ConnectHandle, DisconnectCause, SessionManager, SessionState, StompConnector},
    sink::Sink,
    subscription::{Subscription, SubscriptionCoordinator},
};

struct Running {
    shutdown: CancellationToken,
    inbound: JoinHandle<()>,
}

pub(crate) struct AdapterInner {
    session: Arc<SessionManager>,
    coordinator: Arc<SubscriptionCoordinator>,
    publisher: Arc<EventPublisher>,
    converter: FrameConverter,
    output: Arc<dyn Sink<Message>>,
    errors: Option<Arc<dyn Sink<ErrorMessage>>>,
    sends: TaskTracker,
    running: Mutex<Option<Running>>,
}

impl AdapterInner {
    fn new(
        session: Arc<SessionManager>,
        coordinator: Arc<SubscriptionCoordinator>,
        publisher: Arc<EventPublisher>,
        converter: FrameConverter,
        output: Arc<dyn Sink<Message>>,
        errors: Option<Arc<dyn Sink<ErrorMessage>>>,
    ) -> Self {
        Self {
            session,
            coordinator,
            publisher,
            converter,
            output,
            errors,
            sends: TaskTracker::new(),
            running: Mutex::new(None),
        }
    }
}

/// Subscribes to STOMP destinations and turns inbound frames into messages.
///
/// ```no_run
/// # use stompwire::{StompInboundAdapter, session::StompConnector};
/// # async fn run(connector: impl StompConnector) -> Result<(), Box<dyn std::error::Error>> {
/// let (tx, mut messages) = tokio::sync::mpsc::unbounded_channel();
/// let adapter = StompInboundAdapter::builder(connector)
///     .destination("/topic/prices")
///     .output(tx)
///     .build()?;
/// adapter.start()?.await?;
/// while let Some(message) = messages.recv().await {
///     println!("{}: {:?}", message.destination, message.payload);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct StompInboundAdapter {
    inner: Arc<AdapterInner>,
}

impl std::fmt::Debug for StompInboundAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StompInboundAdapter")
            .field("session", &self.inner.session)
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

impl StompInboundAdapter {
    /// Begin configuring an adapter over `connector`.
    pub fn builder(connector: impl StompConnector) -> StompInboundAdapterBuilder {
        StompInboundAdapterBuilder::new(Arc::new(connector))
    }

    /// Start the inbound task and connect.
    ///
    /// The returned handle resolves once the first session is established
    /// or the reconnect policy gives up. Dropping it does not stop the
    /// adapter. Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::AlreadyRunning`] if the adapter was started
    /// and not stopped. An adapter whose reconnect policy gave up is no
    /// longer running and may be started again.
    pub fn start(&self) -> Result<ConnectHandle, AdapterError> {
        let mut running = lock(&self.inner.running);
        if running.is_some() {
            if self.inner.session.is_supervising() {
                return Err(AdapterError::AlreadyRunning);
            }
            // The inbound task exits on its own after the terminal event.
            running.take();
            info!("restarting after the reconnect policy gave up");
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = self.inner.session.connect(tx)?;
        let shutdown = CancellationToken::new();
        let inbound = tokio::spawn(inbound::run(
            Arc::clone(&self.inner),
            rx,
            shutdown.clone(),
        ));
        *running = Some(Running { shutdown, inbound });
        info!(
            destinations = self.inner.coordinator.destinations().len(),
            "adapter started"
        );
        Ok(handle)
    }

    /// Disconnect and stop the inbound task.
    ///
    /// Frames still queued are discarded. The desired destination set is
    /// kept, so a later [`start`](Self::start) subscribes the same
    /// destinations again. Stopping an adapter that is not running is a
    /// no-op.
    pub async fn stop(&self) {
        let Some(running) = lock(&self.inner.running).take() else {
            return;
        };
        self.inner.session.disconnect().await;
        running.shutdown.cancel();
        if let Err(error) = running.inbound.await {
            warn!(%error, "inbound task ended abnormally");
        }
        self.inner.coordinator.on_disconnected(u64::MAX);
        self.inner.coordinator.drain().await;
        self.inner.sends.close();
        self.inner.sends.wait().await;
        self.inner.sends.reopen();
        self.inner.publisher.publish(&LifecycleEvent::Disconnected {
            cause: DisconnectCause::Requested,
        });
        info!("adapter stopped");
    }

    /// Whether the adapter is connected or still trying to connect. Turns
    /// false once a bounded reconnect policy gives up.
    #[must_use]
    pub fn is_running(&self) -> bool {
        lock(&self.inner.running).is_some() && self.inner.session.is_supervising()
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState { self.inner.session.state() }

    /// Add a destination; it is subscribed now if connected, otherwise on
    /// the next connect. Returns `false` if it was already registered.
    pub async fn add_destination(&self, destination: impl Into<Destination>) -> bool {
        self.inner
            .coordinator
            .add_destination(destination.into())
            .await
    }

    /// Remove a destination, unsubscribing it before returning when it has a
    /// subscription. Returns `false` if it was not registered.
    pub async fn remove_destination(&self, name: &str) -> bool {
        self.inner.coordinator.remove_destination(name).await
    }

    /// Point-in-time copy of the desired destinations.
    #[must_use]
    pub fn destinations(&self) -> Vec<Destination> {
        self.inner.coordinator.destinations().snapshot()
    }

    /// Subscriptions confirmed on the current session.
    pub async fn live_subscriptions(&self) -> Vec<Subscription> {
        self.inner.coordinator.live_subscriptions().await
    }

    /// Send a frame to `destination` on the current session.
    ///
    /// With `auto_receipt` configured the broker's receipt is tracked in the
    /// background and reported as a `Receipt` event.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] when not connected or when the
    /// frame could not be written.
    pub async fn send(
        &self,
        destination: &str,
        body: impl Into<Bytes>,
        headers: Headers,
    ) -> Result<(), AdapterError> {
        let waiter = self
            .inner
            .session
            .send(destination, body.into(), headers, false)
            .await?;
        if let Some(waiter) = waiter {
            let publisher = Arc::clone(&self.inner.publisher);
            self.inner.sends.spawn(async move {
                let token = waiter.token().clone();
                let operation = waiter.operation().clone();
                let outcome = waiter.wait().await;
                metrics::inc_receipts(outcome.as_str());
                publisher.publish(&LifecycleEvent::Receipt(ReceiptEvent::new(
                    token, operation, outcome,
                )));
            });
        }
        Ok(())
    }

    /// Send a frame and wait for the broker to confirm it.
    ///
    /// The outcome is also published as a `Receipt` event.
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::Transport`] when not connected or when the
    /// frame could not be written.
    pub async fn send_confirmed(
        &self,
        destination: &str,
        body: impl Into<Bytes>,
        headers: Headers,
    ) -> Result<ReceiptOutcome, AdapterError> {
        let Some(waiter) = self
            .inner
            .session
            .send(destination, body.into(), headers, true)
            .await?
        else {
            return Ok(ReceiptOutcome::Confirmed);
        };
        let token = waiter.token().clone();
        let operation = waiter.operation().clone();
        let outcome = waiter.wait().await;
        metrics::inc_receipts(outcome.as_str());
        self.inner
            .publisher
            .publish(&LifecycleEvent::Receipt(ReceiptEvent::new(
                token,
                operation,
                outcome.clone(),
            )));
        Ok(outcome)
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
