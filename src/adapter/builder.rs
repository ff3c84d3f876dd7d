//! Builder for [`StompInboundAdapter`].

use std::{fmt, sync::Arc};

use super::{AdapterInner, StompInboundAdapter};
use crate::{
    config::{AdapterConfig, FailurePolicy, SessionConfig},
    converter::{DecoderRegistry, FrameConverter, PayloadDecoder, PayloadType},
    destination::{Destination, DestinationSet},
    error::AdapterError,
    event::{EventObserver, EventPublisher, LifecycleEvent, SinkObserver},
    message::{ErrorMessage, Message},
    session::{SessionManager, StompConnector},
    sink::Sink,
    subscription::SubscriptionCoordinator,
};

/// Collects the adapter's collaborators and settings.
///
/// Only the output sink is mandatory. Every other setting has a default:
/// raw byte payloads, no error sink, no observers and retry-on-reconnect
/// for failed subscriptions.
pub struct StompInboundAdapterBuilder {
    connector: Arc<dyn StompConnector>,
    session: SessionConfig,
    config: AdapterConfig,
    destinations: Vec<Destination>,
    registry: DecoderRegistry,
    output: Option<Arc<dyn Sink<Message>>>,
    errors: Option<Arc<dyn Sink<ErrorMessage>>>,
    observers: Vec<Arc<dyn EventObserver>>,
}

impl fmt::Debug for StompInboundAdapterBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StompInboundAdapterBuilder")
            .field("session", &self.session)
            .field("config", &self.config)
            .field("destinations", &self.destinations)
            .field("registry", &self.registry)
            .field("observers", &self.observers.len())
            .finish_non_exhaustive()
    }
}

impl StompInboundAdapterBuilder {
    pub(super) fn new(connector: Arc<dyn StompConnector>) -> Self {
        Self {
            connector,
            session: SessionConfig::default(),
            config: AdapterConfig::default(),
            destinations: Vec::new(),
            registry: DecoderRegistry::with_defaults(),
            output: None,
            errors: None,
            observers: Vec::new(),
        }
    }

    #[must_use]
    pub fn session_config(mut self, config: SessionConfig) -> Self {
        self.session = config;
        self
    }

    #[must_use]
    pub fn config(mut self, config: AdapterConfig) -> Self {
        self.config = config;
        self
    }

    /// Register a destination subscribed on the first connect.
    #[must_use]
    pub fn destination(mut self, destination: impl Into<Destination>) -> Self {
        self.destinations.push(destination.into());
        self
    }

    #[must_use]
    pub fn destinations<I, D>(mut self, destinations: I) -> Self
    where
        I: IntoIterator<Item = D>,
        D: Into<Destination>,
    {
        self.destinations
            .extend(destinations.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn payload_type(mut self, payload_type: PayloadType) -> Self {
        self.config.payload_type = payload_type;
        self
    }

    #[must_use]
    pub fn failure_policy(mut self, policy: FailurePolicy) -> Self {
        self.config.failure_policy = policy;
        self
    }

    /// Install a custom decoder for `target`, replacing the built-in one.
    #[must_use]
    pub fn decoder(mut self, target: PayloadType, decoder: Arc<dyn PayloadDecoder>) -> Self {
        self.registry.register(target, decoder);
        self
    }

    /// Sink receiving converted messages.
    #[must_use]
    pub fn output(mut self, sink: impl Sink<Message> + 'static) -> Self {
        self.output = Some(Arc::new(sink));
        self
    }

    /// Sink receiving frames that failed conversion.
    #[must_use]
    pub fn error_output(mut self, sink: impl Sink<ErrorMessage> + 'static) -> Self {
        self.errors = Some(Arc::new(sink));
        self
    }

    /// Forward every lifecycle event into `sink`.
    #[must_use]
    pub fn event_sink(self, sink: impl Sink<LifecycleEvent> + 'static) -> Self {
        self.observer(SinkObserver::new(sink))
    }

    #[must_use]
    pub fn observer(mut self, observer: impl EventObserver + 'static) -> Self {
        self.observers.push(Arc::new(observer));
        self
    }

    /// Assemble the adapter. Nothing connects until
    /// [`start`](StompInboundAdapter::start).
    ///
    /// # Errors
    ///
    /// Returns [`AdapterError::MissingOutput`] without an output sink,
    /// [`AdapterError::InvalidConfig`] if the session configuration fails
    /// validation, or [`AdapterError::NoDecoder`] if no decoder is
    /// registered for the payload type.
    pub fn build(self) -> Result<StompInboundAdapter, AdapterError> {
        let output = self.output.ok_or(AdapterError::MissingOutput)?;
        self.session.validate()?;
        let target = self.config.payload_type;
        if !self.registry.supports(target) {
            return Err(AdapterError::NoDecoder(target));
        }

        let publisher = Arc::new(EventPublisher::new());
        for observer in self.observers {
            publisher.register(observer);
        }
        let destinations = Arc::new(DestinationSet::new());
        for destination in self.destinations {
            destinations.add(destination);
        }
        let session = Arc::new(SessionManager::new(self.connector, self.session));
        let coordinator = Arc::new(SubscriptionCoordinator::new(
            destinations,
            Arc::clone(&session),
            Arc::clone(&publisher),
            self.config.failure_policy,
        ));
        Ok(StompInboundAdapter {
            inner: Arc::new(AdapterInner::new(
                session,
                coordinator,
                publisher,
                FrameConverter::new(self.registry, target),
                output,
                self.errors,
            )),
        })
    }
}
