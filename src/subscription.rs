//! Live subscriptions and the coordinator that keeps them in step with the
//! desired destination set.

use std::{borrow::Borrow, fmt, sync::Arc};

use tokio::time::Instant;

use crate::destination::Destination;

mod coordinator;

pub use coordinator::SubscriptionCoordinator;

/// Identifier a session assigned to a `SUBSCRIBE`.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Arc<str>);

impl SubscriptionId {
    #[must_use]
    pub fn new(id: impl Into<Arc<str>>) -> Self { Self(id.into()) }

    #[must_use]
    pub fn as_str(&self) -> &str { &self.0 }
}

impl Borrow<str> for SubscriptionId {
    fn borrow(&self) -> &str { &self.0 }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.0) }
}

/// A destination bound to a subscription on one particular session.
///
/// A subscription is only meaningful while the session `generation` it was
/// created on is the connected one.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    destination: Destination,
    id: SubscriptionId,
    generation: u64,
    established_at: Instant,
}

impl Subscription {
    #[must_use]
    pub fn new(destination: Destination, id: SubscriptionId, generation: u64) -> Self {
        Self {
            destination,
            id,
            generation,
            established_at: Instant::now(),
        }
    }

    #[must_use]
    pub fn destination(&self) -> &Destination { &self.destination }

    #[must_use]
    pub fn id(&self) -> &SubscriptionId { &self.id }

    #[must_use]
    pub fn generation(&self) -> u64 { self.generation }

    #[must_use]
    pub fn established_at(&self) -> Instant { self.established_at }

    /// Copy of this subscription stamped as established now.
    pub(crate) fn confirmed(&self) -> Self {
        Self {
            established_at: Instant::now(),
            ..self.clone()
        }
    }
}
