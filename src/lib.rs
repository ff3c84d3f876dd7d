#![doc(html_root_url = "https://docs.rs/stompwire/latest")]
//! Public API for the `stompwire` library.
//!
//! This crate provides an inbound STOMP channel adapter: it keeps a set of
//! desired destinations subscribed across reconnects, correlates broker
//! receipts with the operations that requested them, converts inbound
//! `MESSAGE` frames into typed messages and reports lifecycle events to
//! observers. The STOMP transport itself is injected through
//! [`session::StompConnector`].

pub mod adapter;
pub mod config;
pub mod converter;
pub mod destination;
pub mod error;
pub mod event;
pub mod frame;
pub mod message;
pub mod metrics;
pub mod receipt;
pub mod session;
pub mod sink;
pub mod subscription;

#[cfg(test)]
mod test_support;

pub use adapter::{StompInboundAdapter, StompInboundAdapterBuilder};
pub use config::{AdapterConfig, ConfigError, FailurePolicy, SessionConfig};
pub use converter::{ConversionError, PayloadType};
pub use destination::{Destination, DestinationSet};
pub use error::{AdapterError, StompError, SubscriptionError};
pub use event::{EventObserver, EventPublisher, LifecycleEvent, ReceiptEvent};
pub use frame::{Frame, Headers, StompCommand};
pub use message::{ErrorMessage, Message, Payload};
pub use metrics::{
    CONNECT_FAILURES_TOTAL,
    CONNECTS_TOTAL,
    FRAMES_CONVERTED,
    RECEIPTS_TOTAL,
    SUBSCRIPTIONS_ACTIVE,
};
pub use receipt::{ReceiptOutcome, ReceiptToken};
pub use session::{ReconnectPolicy, SessionState, TransportError};
pub use sink::{Sink, SinkError};
pub use subscription::{Subscription, SubscriptionId};
