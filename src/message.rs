//! Application-facing messages produced from inbound frames.

use bytes::Bytes;
use serde_json::{Map, Value};

use crate::{
    converter::ConversionError,
    frame::{Frame, Headers},
    subscription::SubscriptionId,
};

/// A decoded frame body.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Bytes(Bytes),
    Text(String),
    Json(Value),
    JsonObject(Map<String, Value>),
}

impl Payload {
    /// Borrow the payload as text, if it was decoded as text.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Borrow the payload as a JSON object, if it was decoded as one.
    #[must_use]
    pub fn as_object(&self) -> Option<&Map<String, Value>> {
        match self {
            Self::JsonObject(map) => Some(map),
            Self::Json(Value::Object(map)) => Some(map),
            _ => None,
        }
    }
}

/// A converted `MESSAGE` frame ready for the application.
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// Destination the broker delivered the frame from.
    pub destination: String,
    /// Subscription the frame arrived on.
    pub subscription_id: Option<SubscriptionId>,
    /// All frame headers, unmodified.
    pub headers: Headers,
    /// Body decoded to the adapter's payload type.
    pub payload: Payload,
}

/// A frame that failed conversion, routed to the error sink.
#[derive(Clone, Debug, PartialEq)]
pub struct ErrorMessage {
    /// Why conversion failed.
    pub cause: ConversionError,
    /// The original frame, untouched.
    pub frame: Frame,
}
