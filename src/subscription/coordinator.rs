//! Keeps broker subscriptions in step with the desired destination set.
//!
//! Each destination owns a slot guarded by an async mutex, so subscribe and
//! unsubscribe for one destination are serialized while different
//! destinations proceed concurrently. Slots are never removed; an idle slot
//! costs one small allocation per destination name ever seen.

use std::sync::Arc;

use dashmap::DashMap;
use futures::future::join_all;
use tokio::sync::Mutex;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, warn};

use super::{Subscription, SubscriptionId};
use crate::{
    config::FailurePolicy,
    destination::{Destination, DestinationSet},
    error::SubscriptionError,
    event::{EventPublisher, LifecycleEvent, ReceiptEvent},
    frame::StompCommand,
    metrics,
    receipt::{ReceiptOutcome, ReceiptWaiter},
    session::{SessionManager, TransportError},
};

#[derive(Debug, Default)]
enum Slot {
    #[default]
    Idle,
    /// Written to the broker, receipt outstanding.
    Pending(Subscription),
    Live(Subscription),
}

impl Slot {
    fn subscription(&self) -> Option<&Subscription> {
        match self {
            Self::Idle => None,
            Self::Pending(s) | Self::Live(s) => Some(s),
        }
    }

    fn take(&mut self) -> Option<Subscription> {
        match std::mem::take(self) {
            Self::Idle => None,
            Self::Pending(s) | Self::Live(s) => Some(s),
        }
    }

    fn is_pending(&self, subscription: &Subscription) -> bool {
        matches!(self, Self::Pending(s) if s.id() == subscription.id()
            && s.generation() == subscription.generation())
    }
}

#[derive(Debug)]
struct Route {
    destination: String,
    generation: u64,
}

/// Reconciles the [`DestinationSet`] with the session's subscriptions.
#[derive(Debug)]
pub struct SubscriptionCoordinator {
    destinations: Arc<DestinationSet>,
    session: Arc<SessionManager>,
    publisher: Arc<EventPublisher>,
    policy: FailurePolicy,
    slots: DashMap<Arc<str>, Arc<Mutex<Slot>>>,
    routes: DashMap<SubscriptionId, Route>,
    tracker: TaskTracker,
}

impl SubscriptionCoordinator {
    #[must_use]
    pub fn new(
        destinations: Arc<DestinationSet>,
        session: Arc<SessionManager>,
        publisher: Arc<EventPublisher>,
        policy: FailurePolicy,
    ) -> Self {
        Self {
            destinations,
            session,
            publisher,
            policy,
            slots: DashMap::new(),
            routes: DashMap::new(),
            tracker: TaskTracker::new(),
        }
    }

    #[must_use]
    pub fn destinations(&self) -> &Arc<DestinationSet> { &self.destinations }

    fn slot(&self, name: &str) -> Arc<Mutex<Slot>> {
        if let Some(slot) = self.slots.get(name) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(Arc::from(name)).or_default().value())
    }

    /// Add `destination` to the set and subscribe it if a session is live.
    ///
    /// Returns `false` if the destination was already present, in which case
    /// nothing is sent.
    pub async fn add_destination(self: &Arc<Self>, destination: Destination) -> bool {
        let name = destination.name().to_owned();
        if !self.destinations.add(destination) {
            debug!(destination = %name, "destination already registered");
            return false;
        }
        if self.session.is_connected() {
            self.subscribe(&name).await;
        } else {
            debug!(destination = %name, "not connected; subscribe deferred to next connect");
        }
        true
    }

    /// Remove `name` from the set and unsubscribe its current subscription.
    ///
    /// The `UNSUBSCRIBE` is written before this returns. Returns `false` if
    /// the destination was not registered.
    pub async fn remove_destination(&self, name: &str) -> bool {
        if !self.destinations.remove(name) {
            return false;
        }
        let slot = self.slot(name);
        let mut guard = slot.lock().await;
        if self.destinations.contains(name) {
            debug!(destination = name, "destination re-added concurrently; keeping subscription");
            return true;
        }
        let Some(subscription) = guard.take() else {
            return true;
        };
        self.routes.remove(subscription.id());
        metrics::set_subscriptions(self.routes.len());
        match self.session.unsubscribe(&subscription, false).await {
            Ok(Some(waiter)) => {
                let publisher = Arc::clone(&self.publisher);
                self.tracker.spawn(async move {
                    let event = settle(waiter).await;
                    publisher.publish(&LifecycleEvent::Receipt(event));
                });
            }
            Ok(None) => {}
            Err(TransportError::NotConnected) => {
                debug!(destination = name, "session gone; subscription already released");
            }
            Err(source) => {
                warn!(destination = name, error = %source, "unsubscribe failed");
                self.publish_error(SubscriptionError::Transport {
                    command: StompCommand::Unsubscribe,
                    destination: name.to_owned(),
                    source,
                });
            }
        }
        info!(
            destination = name,
            subscription_id = %subscription.id(),
            "destination removed"
        );
        true
    }

    /// Subscribe `name` on the current session unless it already has a
    /// pending or live subscription there.
    pub async fn subscribe(self: &Arc<Self>, name: &str) {
        let slot = self.slot(name);
        let mut guard = slot.lock().await;
        let Some(destination) = self.destinations.get(name) else {
            return;
        };
        let Some(generation) = self.session.generation() else {
            debug!(destination = name, "not connected; subscribe deferred");
            return;
        };
        if guard
            .subscription()
            .is_some_and(|s| s.generation() == generation)
        {
            debug!(destination = name, generation, "already subscribed on this session");
            return;
        }
        let issued = match self.session.subscribe(&destination, false).await {
            Ok(issued) => issued,
            Err(source) => {
                warn!(destination = name, error = %source, "subscribe failed");
                self.publish_error(SubscriptionError::Transport {
                    command: StompCommand::Subscribe,
                    destination: name.to_owned(),
                    source,
                });
                return;
            }
        };
        let subscription = Subscription::new(destination, issued.subscription_id, issued.generation);
        self.routes.insert(
            subscription.id().clone(),
            Route {
                destination: name.to_owned(),
                generation: issued.generation,
            },
        );
        metrics::set_subscriptions(self.routes.len());
        match issued.receipt {
            Some(waiter) => {
                *guard = Slot::Pending(subscription.clone());
                drop(guard);
                let this = Arc::clone(self);
                self.tracker
                    .spawn(async move { this.confirm(subscription, waiter).await });
            }
            None => {
                *guard = Slot::Live(subscription.clone());
                drop(guard);
                self.announce(&subscription);
            }
        }
    }

    async fn confirm(self: Arc<Self>, subscription: Subscription, waiter: ReceiptWaiter) {
        let event = settle(waiter).await;
        let name = subscription.destination().name();
        let slot = self.slot(name);
        let mut guard = slot.lock().await;
        let current = guard.is_pending(&subscription);
        if current {
            if event.is_success() {
                *guard = Slot::Live(subscription.confirmed());
            } else {
                *guard = Slot::Idle;
                self.routes.remove(subscription.id());
                metrics::set_subscriptions(self.routes.len());
            }
        }
        drop(guard);
        self.publisher.publish(&LifecycleEvent::Receipt(event.clone()));
        if !current {
            return;
        }
        if event.is_success() {
            self.announce(&subscription);
            return;
        }
        if event.outcome == ReceiptOutcome::ConnectionLost {
            debug!(destination = name, "session ended before confirmation; replay resubscribes");
            return;
        }
        warn!(
            destination = name,
            outcome = %event.outcome,
            policy = ?self.policy,
            "subscription not confirmed"
        );
        if event.outcome == ReceiptOutcome::TimedOut {
            // The broker may still have applied it.
            match self.session.unsubscribe(&subscription, false).await {
                Ok(Some(waiter)) => {
                    self.session.receipts().discard(waiter.token().as_str());
                }
                Ok(None) => {}
                Err(error) => debug!(destination = name, %error, "cleanup unsubscribe not sent"),
            }
        }
        if self.policy == FailurePolicy::Abandon {
            self.destinations.remove(name);
            info!(destination = name, "destination abandoned");
        }
    }

    fn announce(&self, subscription: &Subscription) {
        info!(
            destination = subscription.destination().name(),
            subscription_id = %subscription.id(),
            generation = subscription.generation(),
            "subscribed"
        );
        self.publisher.publish(&LifecycleEvent::Subscribed {
            destination: subscription.destination().name().to_owned(),
            subscription_id: subscription.id().clone(),
        });
    }

    fn publish_error(&self, error: SubscriptionError) {
        self.publisher.publish(&LifecycleEvent::Error {
            cause: error.into(),
        });
    }

    /// Subscribe every destination in the set, concurrently.
    pub async fn on_connected(self: &Arc<Self>) {
        let names: Vec<String> = self
            .destinations
            .snapshot()
            .into_iter()
            .map(|d| d.name().to_owned())
            .collect();
        debug!(count = names.len(), "replaying subscriptions");
        join_all(names.iter().map(|name| self.subscribe(name))).await;
    }

    /// Forget every subscription created on `generation` or earlier.
    pub fn on_disconnected(&self, generation: u64) {
        self.routes.retain(|_, route| route.generation > generation);
        for entry in &self.slots {
            // A busy slot is stale anyway; generation checks ignore it.
            if let Ok(mut slot) = entry.value().try_lock()
                && slot
                    .subscription()
                    .is_some_and(|s| s.generation() <= generation)
            {
                *slot = Slot::Idle;
            }
        }
        metrics::set_subscriptions(self.routes.len());
    }

    /// Wait for outstanding receipt tasks to finish.
    pub async fn drain(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }

    /// Destination routed to by `subscription_id` on `generation`.
    #[must_use]
    pub fn route(&self, subscription_id: &str, generation: u64) -> Option<String> {
        self.routes
            .get(subscription_id)
            .filter(|route| route.generation == generation)
            .map(|route| route.destination.clone())
    }

    /// Live subscription for `name` on the current session.
    pub async fn subscription(&self, name: &str) -> Option<Subscription> {
        let generation = self.session.generation()?;
        let slot = self.slots.get(name).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock().await;
        match &*guard {
            Slot::Live(s) if s.generation() == generation => Some(s.clone()),
            _ => None,
        }
    }

    /// Every confirmed subscription on the current session.
    pub async fn live_subscriptions(&self) -> Vec<Subscription> {
        let Some(generation) = self.session.generation() else {
            return Vec::new();
        };
        let slots: Vec<_> = self.slots.iter().map(|s| Arc::clone(s.value())).collect();
        let mut live = Vec::new();
        for slot in slots {
            if let Slot::Live(s) = &*slot.lock().await
                && s.generation() == generation
            {
                live.push(s.clone());
            }
        }
        live
    }
}

async fn settle(waiter: ReceiptWaiter) -> ReceiptEvent {
    let token = waiter.token().clone();
    let operation = waiter.operation().clone();
    let outcome = waiter.wait().await;
    metrics::inc_receipts(outcome.as_str());
    ReceiptEvent::new(token, operation, outcome)
}
