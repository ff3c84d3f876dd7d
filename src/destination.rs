//! Desired destinations and the concurrent set that tracks them.
//!
//! [`DestinationSet`] records what the application *wants* to be subscribed
//! to. It says nothing about what the broker currently knows; that is the
//! subscription coordinator's job. Writers and readers may run concurrently
//! from any task.

use std::{fmt, sync::Arc};

use dashmap::{DashMap, mapref::entry::Entry};

use crate::frame::Headers;

/// A named subscription target plus the headers sent with its `SUBSCRIBE`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Destination {
    name: Arc<str>,
    headers: Headers,
}

impl Destination {
    /// Create a destination with no extra headers.
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            headers: Headers::new(),
        }
    }

    /// Attach a header forwarded on every `SUBSCRIBE` for this destination.
    ///
    /// ```
    /// use stompwire::Destination;
    ///
    /// let destination = Destination::new("/queue/orders").with_header("ack", "client");
    /// assert_eq!(destination.headers().get("ack"), Some("client"));
    /// ```
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    #[must_use]
    pub fn name(&self) -> &str { &self.name }

    #[must_use]
    pub fn headers(&self) -> &Headers { &self.headers }
}

impl From<&str> for Destination {
    fn from(name: &str) -> Self { Self::new(name) }
}

impl From<String> for Destination {
    fn from(name: String) -> Self { Self::new(name) }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.name) }
}

/// Concurrent registry of desired destinations keyed by name.
///
/// The first destination registered under a name wins; re-adding the same
/// name with different headers is a no-op.
#[derive(Debug, Default)]
pub struct DestinationSet(DashMap<Arc<str>, Destination>);

impl DestinationSet {
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Register `destination`, returning `true` if it was not already present.
    pub fn add(&self, destination: Destination) -> bool {
        match self.0.entry(Arc::clone(&destination.name)) {
            Entry::Occupied(_) => false,
            Entry::Vacant(slot) => {
                slot.insert(destination);
                true
            }
        }
    }

    /// Forget `name`, returning `true` if it was present.
    pub fn remove(&self, name: &str) -> bool { self.0.remove(name).is_some() }

    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.0.contains_key(name) }

    /// Return a copy of the destination registered under `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Destination> {
        self.0.get(name).map(|entry| entry.value().clone())
    }

    /// Point-in-time copy of every registered destination.
    ///
    /// Shards are locked one at a time while copying, so concurrent writers
    /// are never blocked for the whole iteration. Order is unspecified.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Destination> {
        self.0.iter().map(|entry| entry.value().clone()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }
}
