//! Shared harness for adapter integration tests.
#![allow(dead_code, reason = "each test binary uses a different subset")]

use std::time::Duration;

use stompwire::{
    ErrorMessage,
    LifecycleEvent,
    Message,
    SessionConfig,
    StompInboundAdapter,
    StompInboundAdapterBuilder,
    session::ReconnectPolicy,
};
use stompwire_testing::InMemoryBroker;
use tokio::{
    sync::mpsc,
    time::{Instant, timeout, timeout_at},
};

pub type TestResult<T = ()> = Result<T, Box<dyn std::error::Error + Send + Sync>>;

const WAIT: Duration = Duration::from_secs(2);

/// Session settings with millisecond reconnect delays.
pub fn fast_session() -> SessionConfig {
    SessionConfig {
        reconnect: ReconnectPolicy {
            initial_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
            max_attempts: None,
        },
        ..SessionConfig::default()
    }
}

/// An adapter wired to an in-memory broker with channel sinks for every
/// output.
pub struct Harness {
    pub broker: InMemoryBroker,
    pub adapter: StompInboundAdapter,
    pub messages: mpsc::UnboundedReceiver<Message>,
    pub errors: mpsc::UnboundedReceiver<ErrorMessage>,
    pub events: mpsc::UnboundedReceiver<LifecycleEvent>,
}

impl Harness {
    pub fn new(
        configure: impl FnOnce(StompInboundAdapterBuilder) -> StompInboundAdapterBuilder,
    ) -> Self {
        Self::with_broker(InMemoryBroker::new(), configure)
    }

    pub fn with_broker(
        broker: InMemoryBroker,
        configure: impl FnOnce(StompInboundAdapterBuilder) -> StompInboundAdapterBuilder,
    ) -> Self {
        let (message_tx, messages) = mpsc::unbounded_channel();
        let (error_tx, errors) = mpsc::unbounded_channel();
        let (event_tx, events) = mpsc::unbounded_channel();
        let builder = StompInboundAdapter::builder(broker.clone())
            .session_config(fast_session())
            .output(message_tx)
            .error_output(error_tx)
            .event_sink(event_tx);
        let adapter = configure(builder).build().expect("valid adapter");
        Self {
            broker,
            adapter,
            messages,
            errors,
            events,
        }
    }

    /// Start the adapter and wait for the first session.
    pub async fn start(&self) -> u64 {
        self.adapter
            .start()
            .expect("adapter not yet running")
            .await
            .expect("broker accepts the connection")
    }

    pub async fn next_message(&mut self) -> Message {
        timeout(WAIT, self.messages.recv())
            .await
            .expect("message delivered in time")
            .expect("output channel open")
    }

    pub async fn next_error(&mut self) -> ErrorMessage {
        timeout(WAIT, self.errors.recv())
            .await
            .expect("error delivered in time")
            .expect("error channel open")
    }

    /// Skip events until `pick` selects one.
    pub async fn wait_for<T>(&mut self, mut pick: impl FnMut(LifecycleEvent) -> Option<T>) -> T {
        let deadline = Instant::now() + WAIT;
        loop {
            let event = timeout_at(deadline, self.events.recv())
                .await
                .expect("expected event in time")
                .expect("event channel open");
            if let Some(found) = pick(event) {
                return found;
            }
        }
    }

    /// Destination of the next `Subscribed` event.
    pub async fn next_subscribed(&mut self) -> String {
        self.wait_for(|event| match event {
            LifecycleEvent::Subscribed { destination, .. } => Some(destination),
            _ => None,
        })
        .await
    }

    /// Events already published and not yet consumed.
    pub fn drain_events(&mut self) -> Vec<LifecycleEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }
}
