//! Non-blocking sinks receiving converted messages and lifecycle events.
//!
//! A [`Sink`] accepts values without awaiting; a bounded sink that is full
//! reports [`SinkError::Full`] rather than applying back-pressure to the
//! inbound task.

use std::{fmt, sync::Arc};

use tokio::sync::mpsc;

/// Errors returned when a sink cannot take a value.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    /// The sink has no capacity left.
    #[error("sink is full")]
    Full,
    /// The receiving side has gone away.
    #[error("sink is closed")]
    Closed,
}

/// Destination for values produced by the adapter.
pub trait Sink<T>: Send + Sync {
    /// Hand `value` to the sink.
    ///
    /// # Errors
    ///
    /// Returns [`SinkError`] when the value was not accepted.
    fn accept(&self, value: T) -> Result<(), SinkError>;
}

impl<T: Send> Sink<T> for mpsc::UnboundedSender<T> {
    fn accept(&self, value: T) -> Result<(), SinkError> {
        self.send(value).map_err(|_| SinkError::Closed)
    }
}

impl<T: Send> Sink<T> for mpsc::Sender<T> {
    fn accept(&self, value: T) -> Result<(), SinkError> {
        self.try_send(value).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SinkError::Full,
            mpsc::error::TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

impl<T, S: Sink<T> + ?Sized> Sink<T> for Arc<S> {
    fn accept(&self, value: T) -> Result<(), SinkError> { (**self).accept(value) }
}

/// Adapts a closure into a [`Sink`].
///
/// ```
/// use std::sync::{Arc, Mutex};
///
/// use stompwire::sink::{FnSink, Sink};
///
/// let seen = Arc::new(Mutex::new(Vec::new()));
/// let log = Arc::clone(&seen);
/// let sink = FnSink::new(move |v: u32| {
///     log.lock().expect("lock").push(v);
///     Ok(())
/// });
/// sink.accept(7).expect("accepted");
/// assert_eq!(*seen.lock().expect("lock"), vec![7]);
/// ```
pub struct FnSink<F>(F);

impl<F> FnSink<F> {
    pub fn new(f: F) -> Self { Self(f) }
}

impl<F> fmt::Debug for FnSink<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str("FnSink") }
}

impl<T, F> Sink<T> for FnSink<F>
where
    F: Fn(T) -> Result<(), SinkError> + Send + Sync,
{
    fn accept(&self, value: T) -> Result<(), SinkError> { (self.0)(value) }
}
