//! STOMP frames as delivered by the transport layer.
//!
//! The adapter never parses wire bytes itself. A transport hands it
//! [`Frame`] values (a command, an ordered header list and the raw body) and
//! the adapter routes them by command.

use std::fmt;

use bytes::Bytes;

/// Well-known STOMP header names used by the adapter.
pub mod header {
    /// Destination a frame was sent to or should be delivered to.
    pub const DESTINATION: &str = "destination";
    /// Subscription identifier on `SUBSCRIBE`, `UNSUBSCRIBE` and `MESSAGE`.
    pub const ID: &str = "id";
    /// Subscription identifier echoed on `MESSAGE` frames.
    pub const SUBSCRIPTION: &str = "subscription";
    /// Receipt requested by the client.
    pub const RECEIPT: &str = "receipt";
    /// Receipt identifier echoed by the broker on `RECEIPT` and `ERROR`.
    pub const RECEIPT_ID: &str = "receipt-id";
    /// MIME type of the frame body.
    pub const CONTENT_TYPE: &str = "content-type";
    /// Short description carried by `ERROR` frames.
    pub const MESSAGE: &str = "message";
    /// Broker-assigned message identifier.
    pub const MESSAGE_ID: &str = "message-id";
    /// Protocol versions offered on `CONNECT`.
    pub const ACCEPT_VERSION: &str = "accept-version";
    /// Virtual host offered on `CONNECT`.
    pub const HOST: &str = "host";
    /// Login offered on `CONNECT`.
    pub const LOGIN: &str = "login";
    /// Passcode offered on `CONNECT`.
    pub const PASSCODE: &str = "passcode";
    /// Heart-beat negotiation on `CONNECT`.
    pub const HEART_BEAT: &str = "heart-beat";
}

/// STOMP frame commands understood by the adapter.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StompCommand {
    Connect,
    Connected,
    Send,
    Subscribe,
    Unsubscribe,
    Message,
    Receipt,
    Error,
    Disconnect,
}

impl StompCommand {
    /// Wire representation of the command.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
            Self::Disconnect => "DISCONNECT",
        }
    }
}

impl fmt::Display for StompCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// Ordered frame headers.
///
/// STOMP allows a header to repeat; only the first occurrence is significant,
/// so lookups return the first match while [`Headers::insert`] replaces every
/// existing entry with the same name.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Create an empty header list.
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Return the first value recorded for `name`.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// Returns `true` when `name` is present.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool { self.get(name).is_some() }

    /// Set `name` to `value`, replacing any previous entries.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        let name = name.into();
        self.0.retain(|(key, _)| *key != name);
        self.0.push((name, value.into()));
    }

    /// Builder-style variant of [`Headers::insert`].
    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    /// Remove every entry for `name`, returning the first value removed.
    pub fn remove(&mut self, name: &str) -> Option<String> {
        let first = self.get(name).map(str::to_owned);
        self.0.retain(|(key, _)| key != name);
        first
    }

    /// Copy every header from `other`, overriding entries with the same name.
    pub fn merge(&mut self, other: &Headers) {
        for (name, value) in other.iter() {
            self.insert(name, value);
        }
    }

    /// Iterate over headers in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Number of header entries.
    #[must_use]
    pub fn len(&self) -> usize { self.0.len() }

    /// Returns `true` when no headers are present.
    #[must_use]
    pub fn is_empty(&self) -> bool { self.0.is_empty() }

    #[must_use]
    pub fn destination(&self) -> Option<&str> { self.get(header::DESTINATION) }

    #[must_use]
    pub fn subscription(&self) -> Option<&str> { self.get(header::SUBSCRIPTION) }

    #[must_use]
    pub fn receipt_id(&self) -> Option<&str> { self.get(header::RECEIPT_ID) }

    #[must_use]
    pub fn content_type(&self) -> Option<&str> { self.get(header::CONTENT_TYPE) }

    #[must_use]
    pub fn message(&self) -> Option<&str> { self.get(header::MESSAGE) }
}

impl<K, V> FromIterator<(K, V)> for Headers
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut headers = Headers::new();
        for (name, value) in iter {
            headers.insert(name, value);
        }
        headers
    }
}

/// A single protocol frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    pub command: StompCommand,
    pub headers: Headers,
    pub body: Bytes,
}

impl Frame {
    /// Create a frame with no headers and an empty body.
    #[must_use]
    pub fn new(command: StompCommand) -> Self {
        Self {
            command,
            headers: Headers::new(),
            body: Bytes::new(),
        }
    }

    /// Build a `MESSAGE` frame as a broker would deliver it.
    ///
    /// ```
    /// use stompwire::frame::{Frame, StompCommand};
    ///
    /// let frame = Frame::message("/topic/prices", "sub-0", "42");
    /// assert_eq!(frame.command, StompCommand::Message);
    /// assert_eq!(frame.headers.subscription(), Some("sub-0"));
    /// ```
    #[must_use]
    pub fn message(
        destination: impl Into<String>,
        subscription: impl Into<String>,
        body: impl Into<Bytes>,
    ) -> Self {
        Self::new(StompCommand::Message)
            .header(header::DESTINATION, destination)
            .header(header::SUBSCRIPTION, subscription)
            .with_body(body)
    }

    /// Build a `RECEIPT` frame acknowledging `receipt_id`.
    #[must_use]
    pub fn receipt(receipt_id: impl Into<String>) -> Self {
        Self::new(StompCommand::Receipt).header(header::RECEIPT_ID, receipt_id)
    }

    /// Build an `ERROR` frame, optionally tied to a receipt.
    #[must_use]
    pub fn error(message: impl Into<String>, receipt_id: Option<&str>) -> Self {
        let frame = Self::new(StompCommand::Error).header(header::MESSAGE, message);
        match receipt_id {
            Some(id) => frame.header(header::RECEIPT_ID, id),
            None => frame,
        }
    }

    /// Set a header, replacing previous values.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Replace the frame body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[test]
    fn first_header_occurrence_wins() {
        let mut headers: Headers = [("a", "1"), ("b", "2")].into_iter().collect();
        headers.0.push(("a".into(), "shadowed".into()));
        assert_eq!(headers.get("a"), Some("1"));
    }

    #[test]
    fn insert_replaces_all_entries() {
        let mut headers = Headers::new();
        headers.0.push(("a".into(), "1".into()));
        headers.0.push(("a".into(), "2".into()));
        headers.insert("a", "3");
        assert_eq!(headers.len(), 1);
        assert_eq!(headers.get("a"), Some("3"));
    }

    #[test]
    fn merge_overrides_existing_names() {
        let mut base = Headers::new().with("content-type", "text/plain").with("x", "1");
        base.merge(&Headers::new().with("content-type", "application/json"));
        assert_eq!(base.content_type(), Some("application/json"));
        assert_eq!(base.get("x"), Some("1"));
    }

    #[test]
    fn remove_returns_first_value() {
        let mut headers = Headers::new().with("receipt", "r-1");
        assert_eq!(headers.remove("receipt").as_deref(), Some("r-1"));
        assert!(headers.is_empty());
        assert_eq!(headers.remove("receipt"), None);
    }

    #[rstest]
    #[case(Frame::receipt("r-7"), StompCommand::Receipt, Some("r-7"))]
    #[case(Frame::error("denied", Some("r-8")), StompCommand::Error, Some("r-8"))]
    #[case(Frame::error("denied", None), StompCommand::Error, None)]
    fn control_frames_carry_receipt_ids(
        #[case] frame: Frame,
        #[case] command: StompCommand,
        #[case] receipt: Option<&str>,
    ) {
        assert_eq!(frame.command, command);
        assert_eq!(frame.headers.receipt_id(), receipt);
    }

    #[test]
    fn command_displays_wire_name() {
        assert_eq!(StompCommand::Unsubscribe.to_string(), "UNSUBSCRIBE");
    }
}
