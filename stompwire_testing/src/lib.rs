//! Test doubles for driving a [`StompInboundAdapter`](stompwire::StompInboundAdapter)
//! without a network.
//!
//! [`InMemoryBroker`] stands in for the STOMP transport and [`Recorder`]
//! collects whatever the adapter emits.
//!
//! ```rust
//! use stompwire::StompInboundAdapter;
//! use stompwire_testing::{InMemoryBroker, Recorder};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let broker = InMemoryBroker::new();
//! let messages = Recorder::new();
//! let adapter = StompInboundAdapter::builder(broker.clone())
//!     .destination("/topic/a")
//!     .output(messages.clone())
//!     .build()
//!     .expect("valid adapter");
//! adapter.start().expect("not running").await.expect("connects");
//! # adapter.stop().await;
//! # }
//! ```

use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use stompwire::sink::{Sink, SinkError};

pub mod broker;
pub mod logging;

pub use broker::{BrokerCall, InMemoryBroker, MemorySession};
pub use logging::{LoggerHandle, logger};

/// Sink that keeps every accepted item for later inspection.
#[derive(Debug)]
pub struct Recorder<T> {
    items: Arc<Mutex<Vec<T>>>,
}

impl<T> Clone for Recorder<T> {
    fn clone(&self) -> Self {
        Self {
            items: Arc::clone(&self.items),
        }
    }
}

impl<T> Default for Recorder<T> {
    fn default() -> Self {
        Self {
            items: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl<T: Clone> Recorder<T> {
    pub fn new() -> Self { Self::default() }

    /// Copy of everything recorded so far.
    pub fn items(&self) -> Vec<T> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn len(&self) -> usize {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl<T: Send> Sink<T> for Recorder<T> {
    fn accept(&self, value: T) -> Result<(), SinkError> {
        self.items
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(value);
        Ok(())
    }
}

/// Poll `check` until it holds, panicking after two seconds.
///
/// Works under a paused Tokio clock, where the sleeps auto-advance.
pub async fn eventually(what: &str, mut check: impl FnMut() -> bool) {
    for _ in 0..400 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not met in time: {what}");
}
