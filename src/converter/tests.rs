//! Tests for frame conversion and dispatch.

use std::sync::Arc;

use bytes::Bytes;
use rstest::{fixture, rstest};
use serde_json::json;
use tokio::sync::mpsc;
use tracing_test::traced_test;

use super::*;
use crate::{
    frame::{Headers, header},
    message::Payload,
};

#[fixture]
fn converter() -> FrameConverter {
    FrameConverter::new(DecoderRegistry::with_defaults(), PayloadType::JsonObject)
}

fn json_frame(body: &'static str) -> Frame {
    Frame::message("/topic/orders", "sub-1", body).header(header::CONTENT_TYPE, "application/json")
}

#[rstest]
fn converts_json_object(converter: FrameConverter) {
    let message = converter
        .convert(&json_frame(r#"{"id":7}"#))
        .expect("valid object");
    assert_eq!(message.destination, "/topic/orders");
    assert_eq!(message.subscription_id, Some(SubscriptionId::new("sub-1")));
    assert_eq!(message.payload.as_object(), json!({"id": 7}).as_object());
}

#[rstest]
fn frame_without_destination_is_rejected(converter: FrameConverter) {
    let frame = Frame::new(crate::frame::StompCommand::Message).with_body("{}");
    assert_eq!(
        converter.convert(&frame),
        Err(ConversionError::MissingDestination)
    );
}

#[rstest]
fn missing_decoder_is_named() {
    let converter = FrameConverter::new(DecoderRegistry::new(), PayloadType::Json);
    let err = converter
        .convert(&json_frame("{}"))
        .expect_err("nothing registered");
    assert_eq!(err.to_string(), "no suitable decoder, payload type=json");
}

struct Upper;

impl PayloadDecoder for Upper {
    fn decode(
        &self,
        raw: &Bytes,
        _headers: &Headers,
        _target: PayloadType,
    ) -> Result<Payload, DecodeError> {
        let text = std::str::from_utf8(raw).map_err(|_| DecodeError::Utf8)?;
        Ok(Payload::Text(text.to_uppercase()))
    }
}

#[rstest]
fn registered_decoder_replaces_default() {
    let mut registry = DecoderRegistry::with_defaults();
    registry.register(PayloadType::Text, Arc::new(Upper));
    let converter = FrameConverter::new(registry, PayloadType::Text);
    let message = converter
        .convert(&Frame::message("/queue/a", "s", "shout"))
        .expect("decodes");
    assert_eq!(message.payload.as_text(), Some("SHOUT"));
}

#[rstest]
fn failure_goes_to_error_sink_and_next_frame_converts(converter: FrameConverter) {
    let (out_tx, mut out_rx) = mpsc::unbounded_channel::<Message>();
    let (err_tx, mut err_rx) = mpsc::unbounded_channel::<ErrorMessage>();
    let errors: &dyn Sink<ErrorMessage> = &err_tx;
    let bad = Frame::message("/topic/orders", "sub-1", "plain")
        .header(header::CONTENT_TYPE, "text/plain");

    let outcome = converter.dispatch(bad.clone(), &out_tx, Some(errors));
    assert!(matches!(outcome, Dispatch::Rejected(_)));
    let rejected = err_rx.try_recv().expect("error routed");
    assert_eq!(rejected.frame, bad);
    assert!(matches!(rejected.cause, ConversionError::Decode { .. }));
    assert!(out_rx.try_recv().is_err());

    let outcome = converter.dispatch(json_frame(r#"{"ok":true}"#), &out_tx, Some(errors));
    assert!(matches!(outcome, Dispatch::Delivered));
    assert!(out_rx.try_recv().is_ok());
}

#[rstest]
fn closed_output_is_reported(converter: FrameConverter) {
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    drop(out_rx);
    let outcome = converter.dispatch(json_frame("{}"), &out_tx, None);
    assert!(matches!(outcome, Dispatch::Undeliverable(SinkError::Closed)));
}

#[rstest]
#[case("\"bytes\"", PayloadType::Bytes)]
#[case("\"json-object\"", PayloadType::JsonObject)]
fn payload_type_deserializes_kebab_case(#[case] raw: &str, #[case] expected: PayloadType) {
    let parsed: PayloadType = serde_json::from_str(raw).expect("valid payload type");
    assert_eq!(parsed, expected);
}

#[rstest]
#[traced_test]
fn failure_without_error_sink_is_logged(converter: FrameConverter) {
    let (out_tx, _out_rx) = mpsc::unbounded_channel::<Message>();
    let outcome = converter.dispatch(json_frame("[1]"), &out_tx, None);
    assert!(matches!(outcome, Dispatch::Rejected(_)));
    assert!(logs_contain("failed conversion dropped; no error sink"));
}
