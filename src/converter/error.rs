//! Conversion failures.

use thiserror::Error;

use super::PayloadType;

/// Why a decoder refused a payload.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The frame's `content-type` is not one the decoder understands.
    #[error("unsupported content-type {content_type}")]
    UnsupportedContentType { content_type: String },
    /// The body is not valid UTF-8.
    #[error("payload is not valid UTF-8")]
    Utf8,
    /// The body is not valid JSON.
    #[error("invalid JSON payload: {0}")]
    Json(String),
    /// The body is JSON but not an object.
    #[error("expected a JSON object, found {found}")]
    NotAnObject { found: &'static str },
    /// Failure reported by an application-supplied decoder.
    #[error("{0}")]
    Custom(String),
}

/// A frame that could not be turned into a message.
#[non_exhaustive]
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConversionError {
    /// No decoder is registered for the requested payload type.
    #[error("no suitable decoder, payload type={target}")]
    NoDecoder { target: PayloadType },
    /// The registered decoder rejected the payload.
    #[error("failed to decode payload as {target}: {source}")]
    Decode {
        target: PayloadType,
        #[source]
        source: DecodeError,
    },
    /// The frame carries no `destination` header.
    #[error("frame has no destination header")]
    MissingDestination,
}
