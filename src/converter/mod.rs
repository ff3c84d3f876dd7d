//! Conversion of inbound `MESSAGE` frames into application messages.
//!
//! The target shape is chosen at configuration time as a [`PayloadType`] and
//! resolved through a [`DecoderRegistry`]. [`FrameConverter::dispatch`]
//! routes successes to the output sink and failures to the error sink, so a
//! payload that cannot be decoded never stalls the frames behind it.

use std::{collections::HashMap, fmt, sync::Arc};

use serde::Deserialize;
use tracing::{debug, warn};

mod decoder;
mod error;

pub use decoder::{BytesDecoder, JsonDecoder, PayloadDecoder, TextDecoder};
pub use error::{ConversionError, DecodeError};

use crate::{
    frame::Frame,
    message::{ErrorMessage, Message},
    metrics::{self, Conversion},
    sink::{Sink, SinkError},
    subscription::SubscriptionId,
};

/// Shape an inbound payload is decoded into.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PayloadType {
    /// Raw bytes.
    #[default]
    Bytes,
    /// UTF-8 text.
    Text,
    /// Any JSON value.
    Json,
    /// A JSON object, exposed as a string-keyed map.
    JsonObject,
}

impl PayloadType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bytes => "bytes",
            Self::Text => "text",
            Self::Json => "json",
            Self::JsonObject => "json-object",
        }
    }
}

impl fmt::Display for PayloadType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Decoders keyed by the payload type they produce.
#[derive(Clone, Default)]
pub struct DecoderRegistry {
    decoders: HashMap<PayloadType, Arc<dyn PayloadDecoder>>,
}

impl fmt::Debug for DecoderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.decoders.keys()).finish()
    }
}

impl DecoderRegistry {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// A registry covering every built-in [`PayloadType`].
    #[must_use]
    pub fn with_defaults() -> Self {
        let json: Arc<dyn PayloadDecoder> = Arc::new(JsonDecoder);
        let mut registry = Self::new();
        registry.register(PayloadType::Bytes, Arc::new(BytesDecoder));
        registry.register(PayloadType::Text, Arc::new(TextDecoder));
        registry.register(PayloadType::Json, Arc::clone(&json));
        registry.register(PayloadType::JsonObject, json);
        registry
    }

    /// Install `decoder` for `target`, replacing any previous one.
    pub fn register(&mut self, target: PayloadType, decoder: Arc<dyn PayloadDecoder>) {
        self.decoders.insert(target, decoder);
    }

    #[must_use]
    pub fn get(&self, target: PayloadType) -> Option<&Arc<dyn PayloadDecoder>> {
        self.decoders.get(&target)
    }

    #[must_use]
    pub fn supports(&self, target: PayloadType) -> bool { self.decoders.contains_key(&target) }
}

/// Outcome of [`FrameConverter::dispatch`].
#[derive(Debug)]
pub enum Dispatch {
    /// The message reached the output sink.
    Delivered,
    /// Conversion failed; the error message was offered to the error sink.
    Rejected(ErrorMessage),
    /// The message converted but the output sink refused it.
    Undeliverable(SinkError),
}

/// Converts frames into [`Message`]s for one target payload type.
#[derive(Clone, Debug)]
pub struct FrameConverter {
    registry: DecoderRegistry,
    target: PayloadType,
}

impl FrameConverter {
    #[must_use]
    pub fn new(registry: DecoderRegistry, target: PayloadType) -> Self { Self { registry, target } }

    #[must_use]
    pub fn target(&self) -> PayloadType { self.target }

    /// Convert `frame` into the configured payload type.
    ///
    /// # Errors
    ///
    /// See [`convert_as`](Self::convert_as).
    pub fn convert(&self, frame: &Frame) -> Result<Message, ConversionError> {
        self.convert_as(frame, self.target)
    }

    /// Convert `frame` into `target`.
    ///
    /// ```
    /// use stompwire::{
    ///     converter::{DecoderRegistry, FrameConverter, PayloadType},
    ///     frame::Frame,
    /// };
    ///
    /// let converter = FrameConverter::new(DecoderRegistry::with_defaults(), PayloadType::Text);
    /// let message = converter
    ///     .convert(&Frame::message("/queue/a", "sub-0", "hello"))
    ///     .expect("valid text");
    /// assert_eq!(message.payload.as_text(), Some("hello"));
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`ConversionError`] if the frame has no destination, no
    /// decoder exists for `target`, or the decoder rejects the body.
    pub fn convert_as(&self, frame: &Frame, target: PayloadType) -> Result<Message, ConversionError> {
        let destination = frame
            .headers
            .destination()
            .ok_or(ConversionError::MissingDestination)?;
        let decoder = self
            .registry
            .get(target)
            .ok_or(ConversionError::NoDecoder { target })?;
        let payload = decoder
            .decode(&frame.body, &frame.headers, target)
            .map_err(|source| ConversionError::Decode { target, source })?;
        Ok(Message {
            destination: destination.to_owned(),
            subscription_id: frame.headers.subscription().map(SubscriptionId::new),
            headers: frame.headers.clone(),
            payload,
        })
    }

    /// Convert `frame` and hand the result to the matching sink.
    ///
    /// Failures become an [`ErrorMessage`] offered to `errors`; without an
    /// error sink they are only logged. Nothing here can fail the caller.
    pub fn dispatch(
        &self,
        frame: Frame,
        output: &dyn Sink<Message>,
        errors: Option<&dyn Sink<ErrorMessage>>,
    ) -> Dispatch {
        match self.convert(&frame) {
            Ok(message) => match output.accept(message) {
                Ok(()) => {
                    metrics::inc_frames(Conversion::Delivered);
                    Dispatch::Delivered
                }
                Err(error) => {
                    metrics::inc_frames(Conversion::Dropped);
                    warn!(
                        destination = frame.headers.destination(),
                        %error,
                        "output sink refused converted message"
                    );
                    Dispatch::Undeliverable(error)
                }
            },
            Err(cause) => {
                metrics::inc_frames(Conversion::Rejected);
                debug!(
                    destination = frame.headers.destination(),
                    %cause,
                    "frame conversion failed"
                );
                let rejected = ErrorMessage { cause, frame };
                match errors {
                    Some(sink) => {
                        if let Err(error) = sink.accept(rejected.clone()) {
                            warn!(%error, "error sink refused failed conversion");
                        }
                    }
                    None => warn!(cause = %rejected.cause, "failed conversion dropped; no error sink"),
                }
                Dispatch::Rejected(rejected)
            }
        }
    }
}

#[cfg(test)]
mod tests;
