//! Session facade over an injected STOMP transport.
//!
//! [`SessionManager`] owns at most one transport session at a time, drives
//! the `Disconnected -> Connecting -> Connected` state machine and
//! reconnects with exponential back-off when the handshake fails or an
//! established session is lost. Each successful handshake receives a new
//! *generation*; subscriptions and inbound frames are only valid for the
//! generation they were created on.
//!
//! Operations requested with a receipt register a waiter with the shared
//! [`ReceiptCorrelator`] before the frame is written, so a fast broker can
//! never acknowledge an operation the correlator does not know about yet.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        RwLock,
        RwLockReadGuard,
        RwLockWriteGuard,
        atomic::{AtomicU64, Ordering},
    },
    task::{Context, Poll},
};

use bytes::Bytes;
use tokio::{
    sync::{mpsc, oneshot, watch},
    time::{Instant, sleep},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::{debug, info, warn};

mod backoff;
mod error;
mod state;
mod transport;

pub use backoff::ReconnectPolicy;
pub use error::{DisconnectCause, TransportError};
pub use state::SessionState;
pub use transport::{SessionEvent, SessionEvents, StompConnector, StompSession};

use crate::{
    config::SessionConfig,
    destination::Destination,
    frame::{Headers, StompCommand, header},
    metrics,
    receipt::{ReceiptCorrelator, ReceiptOperation, ReceiptOutcome, ReceiptWaiter},
    subscription::{Subscription, SubscriptionId},
};

/// Result of a `SUBSCRIBE` written to the current session.
#[derive(Debug)]
pub struct Issued {
    /// Identifier the session used for the subscription.
    pub subscription_id: SubscriptionId,
    /// Generation of the session the frame was written to.
    pub generation: u64,
    /// Waiter for the broker's receipt, when one was requested.
    pub receipt: Option<ReceiptWaiter>,
}

/// Resolves with the generation of the first established session, or the
/// error that ended the first connect cycle.
#[derive(Debug)]
pub struct ConnectHandle(oneshot::Receiver<Result<u64, TransportError>>);

impl Future for ConnectHandle {
    type Output = Result<u64, TransportError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.0)
            .poll(cx)
            .map(|result| result.unwrap_or(Err(TransportError::Closed)))
    }
}

#[derive(Clone)]
struct ActiveSession {
    generation: u64,
    session: Arc<dyn StompSession>,
}

/// Owner of the transport session and its reconnect loop.
pub struct SessionManager {
    connector: Arc<dyn StompConnector>,
    config: SessionConfig,
    receipts: Arc<ReceiptCorrelator>,
    state: watch::Sender<SessionState>,
    generations: AtomicU64,
    active: RwLock<Option<ActiveSession>>,
    supervisor: Mutex<Option<CancellationToken>>,
    tracker: TaskTracker,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state())
            .field("generation", &self.generation())
            .field("pending_receipts", &self.receipts.pending())
            .finish_non_exhaustive()
    }
}

impl SessionManager {
    /// Create a disconnected manager for `connector`.
    pub fn new(connector: Arc<dyn StompConnector>, config: SessionConfig) -> Self {
        let receipts = Arc::new(ReceiptCorrelator::new(config.receipt_prefix.clone()));
        Self {
            connector,
            config,
            receipts,
            state: watch::Sender::new(SessionState::Disconnected),
            generations: AtomicU64::new(0),
            active: RwLock::new(None),
            supervisor: Mutex::new(None),
            tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig { &self.config }

    /// Correlator shared with the inbound task.
    #[must_use]
    pub fn receipts(&self) -> &Arc<ReceiptCorrelator> { &self.receipts }

    #[must_use]
    pub fn state(&self) -> SessionState { *self.state.borrow() }

    /// Observe state transitions.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<SessionState> { self.state.subscribe() }

    #[must_use]
    pub fn is_connected(&self) -> bool { self.generation().is_some() }

    /// Generation of the connected session, if any.
    #[must_use]
    pub fn generation(&self) -> Option<u64> { read(&self.active).as_ref().map(|a| a.generation) }

    /// Whether a supervisor is connecting or holding a session. Turns false
    /// after [`disconnect`](Self::disconnect) or once the reconnect policy
    /// gives up.
    #[must_use]
    pub fn is_supervising(&self) -> bool {
        lock(&self.supervisor)
            .as_ref()
            .is_some_and(|t| !t.is_cancelled())
    }

    /// Start the connection supervisor.
    ///
    /// Events for the adapter's inbound task are sent on `inbound`. The
    /// supervisor keeps reconnecting per the configured [`ReconnectPolicy`]
    /// until [`disconnect`](Self::disconnect) is called or the policy is
    /// exhausted.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::AlreadyActive`] if a supervisor is already
    /// running.
    pub fn connect(
        self: &Arc<Self>,
        inbound: mpsc::UnboundedSender<SessionEvent>,
    ) -> Result<ConnectHandle, TransportError> {
        let token = {
            let mut supervisor = lock(&self.supervisor);
            if supervisor.as_ref().is_some_and(|t| !t.is_cancelled()) {
                return Err(TransportError::AlreadyActive);
            }
            let token = CancellationToken::new();
            *supervisor = Some(token.clone());
            token
        };
        let (first_tx, first_rx) = oneshot::channel();
        let this = Arc::clone(self);
        self.tracker
            .spawn(async move { this.supervise(inbound, token, first_tx).await });
        Ok(ConnectHandle(first_rx))
    }

    /// Stop reconnecting and close the current session.
    ///
    /// Outstanding receipts fail with [`ReceiptOutcome::ConnectionLost`].
    /// Returns once the supervisor has exited.
    pub async fn disconnect(&self) {
        if let Some(token) = lock(&self.supervisor).take() {
            token.cancel();
        }
        let active = write(&self.active).take();
        self.state.send_replace(SessionState::Disconnected);
        let failed = self.receipts.fail_all(&ReceiptOutcome::ConnectionLost);
        if let Some(active) = active {
            active.session.disconnect().await;
            info!(
                generation = active.generation,
                failed_receipts = failed,
                "session disconnected on request"
            );
        }
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Write a `SUBSCRIBE` for `destination` on the current session.
    ///
    /// A receipt is requested when `receipt_requested` is set or the session
    /// is configured with `auto_receipt`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when no session is connected,
    /// or the transport's error if the frame could not be written.
    pub async fn subscribe(
        &self,
        destination: &Destination,
        receipt_requested: bool,
    ) -> Result<Issued, TransportError> {
        let active = self.active()?;
        let mut headers = destination.headers().clone();
        let receipt = self.wants_receipt(receipt_requested).then(|| {
            self.track(
                StompCommand::Subscribe,
                Some(destination.name()),
                &mut headers,
            )
        });
        match active.session.subscribe(destination.name(), headers).await {
            Ok(subscription_id) => {
                debug!(
                    destination = destination.name(),
                    subscription_id = %subscription_id,
                    generation = active.generation,
                    receipt = receipt.as_ref().map(|w| w.token().as_str()),
                    "subscribe issued"
                );
                Ok(Issued {
                    subscription_id,
                    generation: active.generation,
                    receipt,
                })
            }
            Err(error) => Err(self.abandon_receipt(receipt, error)),
        }
    }

    /// Write an `UNSUBSCRIBE` for `subscription`.
    ///
    /// Subscriptions from an earlier session generation are already gone at
    /// the broker; for those nothing is written and `Ok(None)` is returned.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when no session is connected,
    /// or the transport's error if the frame could not be written.
    pub async fn unsubscribe(
        &self,
        subscription: &Subscription,
        receipt_requested: bool,
    ) -> Result<Option<ReceiptWaiter>, TransportError> {
        let active = self.active()?;
        if active.generation != subscription.generation() {
            debug!(
                subscription_id = %subscription.id(),
                "subscription belongs to an earlier session; nothing to unsubscribe"
            );
            return Ok(None);
        }
        let mut headers = Headers::new().with(header::ID, subscription.id().as_str());
        let receipt = self.wants_receipt(receipt_requested).then(|| {
            self.track(
                StompCommand::Unsubscribe,
                Some(subscription.destination().name()),
                &mut headers,
            )
        });
        match active.session.unsubscribe(subscription.id(), headers).await {
            Ok(()) => Ok(receipt),
            Err(error) => Err(self.abandon_receipt(receipt, error)),
        }
    }

    /// Write a `SEND` frame to `destination`.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::NotConnected`] when no session is connected,
    /// or the transport's error if the frame could not be written.
    pub async fn send(
        &self,
        destination: &str,
        body: Bytes,
        mut headers: Headers,
        receipt_requested: bool,
    ) -> Result<Option<ReceiptWaiter>, TransportError> {
        let active = self.active()?;
        let receipt = self
            .wants_receipt(receipt_requested)
            .then(|| self.track(StompCommand::Send, Some(destination), &mut headers));
        match active.session.send(destination, body, headers).await {
            Ok(()) => Ok(receipt),
            Err(error) => Err(self.abandon_receipt(receipt, error)),
        }
    }

    fn wants_receipt(&self, requested: bool) -> bool { requested || self.config.auto_receipt }

    fn track(
        &self,
        command: StompCommand,
        destination: Option<&str>,
        headers: &mut Headers,
    ) -> ReceiptWaiter {
        let token = self.receipts.next_token();
        headers.insert(header::RECEIPT, token.as_str());
        self.receipts.register(
            token,
            ReceiptOperation::new(command, destination),
            Instant::now() + self.config.receipt_timeout,
        )
    }

    fn abandon_receipt(
        &self,
        receipt: Option<ReceiptWaiter>,
        error: TransportError,
    ) -> TransportError {
        if let Some(waiter) = receipt {
            self.receipts.discard(waiter.token().as_str());
        }
        error
    }

    fn active(&self) -> Result<ActiveSession, TransportError> {
        read(&self.active).clone().ok_or(TransportError::NotConnected)
    }

    fn install(
        &self,
        generation: u64,
        session: Arc<dyn StompSession>,
        token: &CancellationToken,
    ) -> Result<(), Arc<dyn StompSession>> {
        let mut active = write(&self.active);
        if token.is_cancelled() {
            return Err(session);
        }
        *active = Some(ActiveSession {
            generation,
            session,
        });
        self.state.send_replace(SessionState::Connected);
        Ok(())
    }

    fn teardown(&self, generation: u64) -> usize {
        {
            let mut active = write(&self.active);
            if active.as_ref().is_some_and(|a| a.generation == generation) {
                *active = None;
            }
        }
        self.state.send_replace(SessionState::Disconnected);
        self.receipts.fail_all(&ReceiptOutcome::ConnectionLost)
    }

    async fn supervise(
        self: Arc<Self>,
        inbound: mpsc::UnboundedSender<SessionEvent>,
        token: CancellationToken,
        first: oneshot::Sender<Result<u64, TransportError>>,
    ) {
        let policy = self.config.reconnect.normalized();
        let mut first = Some(first);
        let mut failures: u32 = 0;
        let mut delay = policy.initial_delay;
        loop {
            let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
            self.state.send_replace(SessionState::Connecting);
            let (lost_tx, mut lost_rx) = mpsc::unbounded_channel();
            let events = SessionEvents::new(generation, inbound.clone(), lost_tx);
            let attempt = tokio::select! {
                biased;
                () = token.cancelled() => return,
                attempt = self.connector.connect(&self.config, events) => attempt,
            };
            match attempt {
                Ok(session) => {
                    if let Err(session) = self.install(generation, session, &token) {
                        session.disconnect().await;
                        return;
                    }
                    failures = 0;
                    delay = policy.initial_delay;
                    metrics::inc_connects();
                    info!(generation, "session connected");
                    if let Some(first) = first.take() {
                        let _ = first.send(Ok(generation));
                    }
                    let _ = inbound.send(SessionEvent::Connected { generation });
                    let cause = tokio::select! {
                        biased;
                        () = token.cancelled() => return,
                        cause = lost_rx.recv() => cause.unwrap_or_else(|| {
                            DisconnectCause::TransportFailure("session callbacks dropped".to_owned())
                        }),
                    };
                    let failed = self.teardown(generation);
                    warn!(generation, %cause, failed_receipts = failed, "session lost");
                    let _ = inbound.send(SessionEvent::Disconnected { generation, cause });
                }
                Err(error) => {
                    self.state.send_replace(SessionState::Disconnected);
                    failures = failures.saturating_add(1);
                    metrics::inc_connect_failures();
                    warn!(generation, attempt = failures, %error, "connect attempt failed");
                    let _ = inbound.send(SessionEvent::Error(error));
                    if policy.is_exhausted(failures) {
                        warn!(attempts = failures, "reconnect policy exhausted; giving up");
                        if let Some(first) = first.take() {
                            let _ = first.send(Err(TransportError::Exhausted { attempts: failures }));
                        }
                        let _ = inbound.send(SessionEvent::GaveUp { attempts: failures });
                        break;
                    }
                }
            }
            tokio::select! {
                biased;
                () = token.cancelled() => return,
                () = sleep(delay) => {}
            }
            delay = policy.next_delay(delay);
        }
        token.cancel();
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read<T>(lock: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests;
