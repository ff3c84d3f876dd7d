//! An in-memory broker implementing the adapter's transport boundary.
//!
//! [`InMemoryBroker`] records every frame written through its sessions and
//! lets tests play the broker's side: acknowledge or reject receipts, deliver
//! `MESSAGE` frames to live subscriptions and drop the connection.

use std::{
    collections::{BTreeMap, HashSet},
    sync::{
        Arc,
        Mutex,
        MutexGuard,
        PoisonError,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
};

use async_trait::async_trait;
use bytes::Bytes;
use stompwire::{
    SessionConfig,
    frame::{Frame, Headers, header},
    session::{DisconnectCause, SessionEvents, StompConnector, StompSession, TransportError},
    subscription::SubscriptionId,
};

/// A frame written by the adapter, as seen by the broker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum BrokerCall {
    Connect,
    Subscribe {
        destination: String,
        id: String,
        receipt: Option<String>,
    },
    Unsubscribe {
        id: String,
        receipt: Option<String>,
    },
    Send {
        destination: String,
        body: Bytes,
        receipt: Option<String>,
    },
    Disconnect,
}

struct Connection {
    generation: u64,
    events: SessionEvents,
    /// Subscription id to destination.
    subscriptions: BTreeMap<String, String>,
}

struct State {
    calls: Mutex<Vec<BrokerCall>>,
    connection: Mutex<Option<Connection>>,
    next_id: AtomicU64,
    next_message: AtomicU64,
    connects: AtomicU32,
    refusals: AtomicU32,
    auto_receipts: AtomicBool,
    rejected: Mutex<HashSet<String>>,
}

impl Default for State {
    fn default() -> Self {
        Self {
            calls: Mutex::default(),
            connection: Mutex::default(),
            next_id: AtomicU64::new(0),
            next_message: AtomicU64::new(0),
            connects: AtomicU32::new(0),
            refusals: AtomicU32::new(0),
            auto_receipts: AtomicBool::new(true),
            rejected: Mutex::default(),
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Cloneable handle to a shared in-memory broker.
///
/// Receipts are acknowledged automatically unless switched off with
/// [`set_auto_receipts`](Self::set_auto_receipts).
#[derive(Clone, Default)]
pub struct InMemoryBroker {
    state: Arc<State>,
}

impl InMemoryBroker {
    pub fn new() -> Self { Self::default() }

    /// Acknowledge receipt-tracked frames immediately (the default).
    pub fn set_auto_receipts(&self, enabled: bool) {
        self.state.auto_receipts.store(enabled, Ordering::SeqCst);
    }

    /// Answer receipt-tracked subscribes to `destination` with an `ERROR`.
    pub fn reject(&self, destination: &str) { lock(&self.state.rejected).insert(destination.to_owned()); }

    /// Stop rejecting `destination`.
    pub fn accept(&self, destination: &str) { lock(&self.state.rejected).remove(destination); }

    /// Fail the next `times` handshakes.
    pub fn refuse_connects(&self, times: u32) { self.state.refusals.store(times, Ordering::SeqCst); }

    /// Successful handshakes so far.
    pub fn connects(&self) -> u32 { self.state.connects.load(Ordering::SeqCst) }

    pub fn is_connected(&self) -> bool { lock(&self.state.connection).is_some() }

    pub fn calls(&self) -> Vec<BrokerCall> { lock(&self.state.calls).clone() }

    pub fn clear_calls(&self) { lock(&self.state.calls).clear(); }

    /// Destinations of every recorded `SUBSCRIBE`, in order.
    pub fn subscribe_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Subscribe { destination, .. } => Some(destination),
                _ => None,
            })
            .collect()
    }

    /// Subscription ids of every recorded `UNSUBSCRIBE`, in order.
    pub fn unsubscribe_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                BrokerCall::Unsubscribe { id, .. } => Some(id),
                _ => None,
            })
            .collect()
    }

    /// Live subscriptions on the current connection as `(id, destination)`.
    pub fn subscriptions(&self) -> Vec<(String, String)> {
        lock(&self.state.connection)
            .as_ref()
            .map(|c| {
                c.subscriptions
                    .iter()
                    .map(|(id, dest)| (id.clone(), dest.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Deliver a `MESSAGE` to every subscription on `destination`, returning
    /// how many frames were delivered.
    pub fn publish(&self, destination: &str, body: impl Into<Bytes>, headers: &Headers) -> usize {
        let body = body.into();
        let guard = lock(&self.state.connection);
        let Some(connection) = guard.as_ref() else {
            return 0;
        };
        let mut delivered = 0;
        for (id, dest) in &connection.subscriptions {
            if dest != destination {
                continue;
            }
            let n = self.state.next_message.fetch_add(1, Ordering::SeqCst);
            let mut frame = Frame::message(destination, id.as_str(), body.clone())
                .header(header::MESSAGE_ID, format!("msg-{n}"));
            frame.headers.merge(headers);
            if connection.events.on_frame(frame) {
                delivered += 1;
            }
        }
        delivered
    }

    /// Deliver an arbitrary frame on the current connection.
    pub fn deliver(&self, frame: Frame) -> bool {
        lock(&self.state.connection)
            .as_ref()
            .is_some_and(|c| c.events.on_frame(frame))
    }

    /// Drop the current connection as if the network failed.
    pub fn drop_connection(&self, cause: DisconnectCause) -> bool {
        let Some(connection) = lock(&self.state.connection).take() else {
            return false;
        };
        connection.events.on_disconnected(cause);
        true
    }

    fn record(&self, call: BrokerCall) { lock(&self.state.calls).push(call); }

    /// Answer a receipt-tracked frame per the current switches.
    fn answer(&self, connection: &Connection, receipt: Option<&str>, rejected: bool) {
        let Some(receipt) = receipt else {
            return;
        };
        if rejected {
            connection
                .events
                .on_frame(Frame::error("subscription refused", Some(receipt)));
        } else if self.state.auto_receipts.load(Ordering::SeqCst) {
            connection.events.on_frame(Frame::receipt(receipt));
        }
    }
}

#[async_trait]
impl StompConnector for InMemoryBroker {
    async fn connect(
        &self,
        _config: &SessionConfig,
        events: SessionEvents,
    ) -> Result<Arc<dyn StompSession>, TransportError> {
        if self
            .state
            .refusals
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(TransportError::Connect("connection refused".into()));
        }
        let generation = events.generation();
        self.record(BrokerCall::Connect);
        *lock(&self.state.connection) = Some(Connection {
            generation,
            events,
            subscriptions: BTreeMap::new(),
        });
        self.state.connects.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(MemorySession {
            broker: self.clone(),
            generation,
        }))
    }
}

/// Session handed out by [`InMemoryBroker`].
pub struct MemorySession {
    broker: InMemoryBroker,
    generation: u64,
}

impl MemorySession {
    fn with_connection<R>(&self, f: impl FnOnce(&mut Connection) -> R) -> Result<R, TransportError> {
        let mut guard = lock(&self.broker.state.connection);
        match guard.as_mut() {
            Some(connection) if connection.generation == self.generation => Ok(f(connection)),
            _ => Err(TransportError::Closed),
        }
    }
}

#[async_trait]
impl StompSession for MemorySession {
    async fn subscribe(
        &self,
        destination: &str,
        headers: Headers,
    ) -> Result<SubscriptionId, TransportError> {
        let n = self.broker.state.next_id.fetch_add(1, Ordering::SeqCst);
        let id = format!("sub-{n}");
        let receipt = headers.get(header::RECEIPT).map(str::to_owned);
        let rejected = lock(&self.broker.state.rejected).contains(destination);
        self.broker.record(BrokerCall::Subscribe {
            destination: destination.to_owned(),
            id: id.clone(),
            receipt: receipt.clone(),
        });
        self.with_connection(|connection| {
            if !rejected || receipt.is_none() {
                connection
                    .subscriptions
                    .insert(id.clone(), destination.to_owned());
            }
            self.broker
                .answer(connection, receipt.as_deref(), rejected);
        })?;
        Ok(SubscriptionId::new(id))
    }

    async fn unsubscribe(
        &self,
        subscription_id: &SubscriptionId,
        headers: Headers,
    ) -> Result<(), TransportError> {
        let receipt = headers.get(header::RECEIPT).map(str::to_owned);
        self.broker.record(BrokerCall::Unsubscribe {
            id: subscription_id.to_string(),
            receipt: receipt.clone(),
        });
        self.with_connection(|connection| {
            connection.subscriptions.remove(subscription_id.as_str());
            self.broker.answer(connection, receipt.as_deref(), false);
        })
    }

    async fn send(
        &self,
        destination: &str,
        body: Bytes,
        headers: Headers,
    ) -> Result<(), TransportError> {
        let receipt = headers.get(header::RECEIPT).map(str::to_owned);
        self.broker.record(BrokerCall::Send {
            destination: destination.to_owned(),
            body,
            receipt: receipt.clone(),
        });
        self.with_connection(|connection| {
            self.broker.answer(connection, receipt.as_deref(), false);
        })
    }

    async fn disconnect(&self) {
        self.broker.record(BrokerCall::Disconnect);
        let mut guard = lock(&self.broker.state.connection);
        if guard
            .as_ref()
            .is_some_and(|c| c.generation == self.generation)
        {
            *guard = None;
        }
    }
}

