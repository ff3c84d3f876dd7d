//! Built-in payload decoders.

use bytes::Bytes;
use serde_json::Value;

use super::{DecodeError, PayloadType};
use crate::{frame::Headers, message::Payload};

/// Turns a raw frame body into a typed [`Payload`].
///
/// A decoder is registered per [`PayloadType`]; the target is passed back so
/// one implementation can serve several related shapes.
pub trait PayloadDecoder: Send + Sync {
    /// Decode `raw` into the shape named by `target`.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] when the body does not fit `target`.
    fn decode(
        &self,
        raw: &Bytes,
        headers: &Headers,
        target: PayloadType,
    ) -> Result<Payload, DecodeError>;
}

/// Passes the body through untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct BytesDecoder;

impl PayloadDecoder for BytesDecoder {
    fn decode(
        &self,
        raw: &Bytes,
        _headers: &Headers,
        _target: PayloadType,
    ) -> Result<Payload, DecodeError> {
        Ok(Payload::Bytes(raw.clone()))
    }
}

/// Decodes the body as UTF-8 text.
#[derive(Clone, Copy, Debug, Default)]
pub struct TextDecoder;

impl PayloadDecoder for TextDecoder {
    fn decode(
        &self,
        raw: &Bytes,
        _headers: &Headers,
        _target: PayloadType,
    ) -> Result<Payload, DecodeError> {
        std::str::from_utf8(raw)
            .map(|text| Payload::Text(text.to_owned()))
            .map_err(|_| DecodeError::Utf8)
    }
}

/// Decodes JSON bodies into [`Payload::Json`] or [`Payload::JsonObject`].
///
/// Frames without a `content-type` are assumed to be JSON; any other media
/// type than `application/json` or a `+json` suffix is refused.
#[derive(Clone, Copy, Debug, Default)]
pub struct JsonDecoder;

impl PayloadDecoder for JsonDecoder {
    fn decode(
        &self,
        raw: &Bytes,
        headers: &Headers,
        target: PayloadType,
    ) -> Result<Payload, DecodeError> {
        if let Some(content_type) = headers.content_type().filter(|ct| !is_json(ct)) {
            return Err(DecodeError::UnsupportedContentType {
                content_type: content_type.to_owned(),
            });
        }
        let value: Value =
            serde_json::from_slice(raw).map_err(|e| DecodeError::Json(e.to_string()))?;
        match (target, value) {
            (PayloadType::JsonObject, Value::Object(map)) => Ok(Payload::JsonObject(map)),
            (PayloadType::JsonObject, other) => Err(DecodeError::NotAnObject {
                found: kind(&other),
            }),
            (_, value) => Ok(Payload::Json(value)),
        }
    }
}

fn is_json(content_type: &str) -> bool {
    let media = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    media == "application/json" || media.ends_with("+json")
}

fn kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
