//! In-crate transport double for unit tests.

use std::sync::{
    Arc,
    Mutex,
    atomic::{AtomicU32, AtomicU64, Ordering},
};

use async_trait::async_trait;
use bytes::Bytes;

use crate::{
    config::SessionConfig,
    frame::{Headers, StompCommand, header},
    session::{SessionEvents, StompConnector, StompSession, TransportError},
    subscription::SubscriptionId,
};

/// A frame written through a [`FakeSession`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct Call {
    pub command: StompCommand,
    /// Destination for `SUBSCRIBE`/`SEND`, subscription id for `UNSUBSCRIBE`.
    pub target: String,
    pub receipt: Option<String>,
}

impl Call {
    pub(crate) fn new(command: StompCommand, target: &str) -> Self {
        Self {
            command,
            target: target.to_owned(),
            receipt: None,
        }
    }
}

#[derive(Default)]
pub(crate) struct FakeConnector {
    refusals: AtomicU32,
    sessions: Mutex<Vec<SessionEvents>>,
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: Arc<AtomicU64>,
}

impl FakeConnector {
    pub(crate) fn refusing(times: u32) -> Self {
        Self {
            refusals: AtomicU32::new(times),
            ..Self::default()
        }
    }

    pub(crate) fn calls(&self) -> Vec<Call> { self.calls.lock().expect("calls lock").clone() }

    pub(crate) fn clear_calls(&self) { self.calls.lock().expect("calls lock").clear(); }

    /// Callbacks handed to the most recent session.
    pub(crate) fn last_events(&self) -> SessionEvents {
        self.sessions
            .lock()
            .expect("sessions lock")
            .last()
            .cloned()
            .expect("a session was opened")
    }
}

#[async_trait]
impl StompConnector for FakeConnector {
    async fn connect(
        &self,
        _config: &SessionConfig,
        events: SessionEvents,
    ) -> Result<Arc<dyn StompSession>, TransportError> {
        if self
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("refused".into()));
        }
        self.sessions.lock().expect("sessions lock").push(events);
        Ok(Arc::new(FakeSession {
            calls: Arc::clone(&self.calls),
            next_id: Arc::clone(&self.next_id),
        }))
    }
}

pub(crate) struct FakeSession {
    calls: Arc<Mutex<Vec<Call>>>,
    next_id: Arc<AtomicU64>,
}

impl FakeSession {
    fn record(&self, command: StompCommand, target: &str, headers: &Headers) {
        self.calls.lock().expect("calls lock").push(Call {
            command,
            target: target.to_owned(),
            receipt: headers.get(header::RECEIPT).map(str::to_owned),
        });
    }
}

#[async_trait]
impl StompSession for FakeSession {
    async fn subscribe(
        &self,
        destination: &str,
        headers: Headers,
    ) -> Result<SubscriptionId, TransportError> {
        self.record(StompCommand::Subscribe, destination, &headers);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(SubscriptionId::new(format!("sub-{n}")))
    }

    async fn unsubscribe(
        &self,
        subscription_id: &SubscriptionId,
        headers: Headers,
    ) -> Result<(), TransportError> {
        self.record(StompCommand::Unsubscribe, subscription_id.as_str(), &headers);
        Ok(())
    }

    async fn send(
        &self,
        destination: &str,
        _body: Bytes,
        headers: Headers,
    ) -> Result<(), TransportError> {
        self.record(StompCommand::Send, destination, &headers);
        Ok(())
    }

    async fn disconnect(&self) {
        self.record(StompCommand::Disconnect, "", &Headers::new());
    }
}
