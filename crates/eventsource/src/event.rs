//! Message and notification types

use std::time::Duration;

use serde::Serialize;

use crate::error::{Error, Result};

/// Event type used when a block carries no (non-empty) `event` field
pub const DEFAULT_EVENT_TYPE: &str = "message";

/// A single decoded Server-Sent Events message
///
/// Messages produced by the decoder are always valid; messages built by an
/// application go through [`MessageEvent::new`], which enforces the same rules.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MessageEvent {
    data: String,
    #[serde(rename = "lastEventId")]
    last_event_id: String,
    #[serde(rename = "type")]
    event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    retry: Option<u64>,
}

impl MessageEvent {
    /// Create a new message event.
    ///
    /// - `data` must be valid UTF-8; `\r\n` and `\r` are normalized to `\n`
    /// - `last_event_id` must be valid UTF-8 without null bytes or newlines
    /// - `event_type` must be valid non-empty UTF-8 without newlines
    ///
    /// # Example
    ///
    /// ```rust
    /// use eventsource::MessageEvent;
    ///
    /// let message = MessageEvent::new("hello\r\nworld", "42", "update").unwrap();
    /// assert_eq!(message.data(), "hello\nworld");
    /// assert_eq!(message.last_event_id(), "42");
    /// assert_eq!(message.event_type(), "update");
    ///
    /// assert!(MessageEvent::new("hi", "4\n2", "update").is_err());
    /// ```
    pub fn new(
        data: impl AsRef<[u8]>,
        last_event_id: impl AsRef<[u8]>,
        event_type: impl AsRef<[u8]>,
    ) -> Result<Self> {
        let data = std::str::from_utf8(data.as_ref())
            .map_err(|_| Error::invalid_input("data must be a valid UTF-8 string"))?;

        let last_event_id = validate_last_event_id(last_event_id.as_ref())?;

        let event_type = std::str::from_utf8(event_type.as_ref())
            .ok()
            .filter(|t| !t.is_empty() && !t.contains(['\r', '\n']))
            .ok_or_else(|| {
                Error::invalid_input(
                    "type must be a non-empty UTF-8 string with no newline characters",
                )
            })?;

        Ok(Self {
            data: data.replace("\r\n", "\n").replace('\r', "\n"),
            last_event_id: last_event_id.to_owned(),
            event_type: event_type.to_owned(),
            retry: None,
        })
    }

    /// Create a `message` event with no last event ID
    pub fn message(data: impl AsRef<[u8]>) -> Result<Self> {
        Self::new(data, "", DEFAULT_EVENT_TYPE)
    }

    /// Set the retry interval in milliseconds
    pub fn with_retry(mut self, retry_ms: u64) -> Self {
        self.retry = Some(retry_ms);
        self
    }

    /// Built by the decoder from already repaired field values.
    pub(crate) fn from_parts(
        data: String,
        last_event_id: String,
        event_type: String,
        retry: Option<u64>,
    ) -> Self {
        Self {
            data,
            last_event_id,
            event_type,
            retry,
        }
    }

    /// Message payload, lines joined with `\n`
    pub fn data(&self) -> &str {
        &self.data
    }

    /// Identifier in effect for this message (fresh or carried forward)
    pub fn last_event_id(&self) -> &str {
        &self.last_event_id
    }

    /// Event type, [`DEFAULT_EVENT_TYPE`] unless the server named one
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    /// Retry interval in milliseconds, if the block carried a valid `retry` field
    pub fn retry(&self) -> Option<u64> {
        self.retry
    }

    /// Retry interval as a [`Duration`]
    pub fn retry_delay(&self) -> Option<Duration> {
        self.retry.map(Duration::from_millis)
    }
}

/// Checks the rules shared by message IDs and the `Last-Event-ID` seed.
pub(crate) fn validate_last_event_id(id: &[u8]) -> Result<&str> {
    std::str::from_utf8(id)
        .ok()
        .filter(|id| !id.contains(['\0', '\r', '\n']))
        .ok_or_else(|| {
            Error::invalid_input(
                "last event ID must be a valid UTF-8 string with no null bytes or newline characters",
            )
        })
}

/// Everything an [`EventSource`](crate::EventSource) reports to its listeners
#[derive(Debug)]
pub enum Notification {
    /// The connection was (re-)established
    Open,
    /// A decoded message with non-empty data
    Message(MessageEvent),
    /// A fatal or transient failure, see [`Error::is_fatal`]
    Error(Error),
}

impl Notification {
    /// Event name as seen on the wire: `open`, `error` or the message type
    pub fn name(&self) -> &str {
        match self {
            Notification::Open => "open",
            Notification::Message(message) => message.event_type(),
            Notification::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_for_message_constructor() {
        let message = MessageEvent::message("hello").unwrap();
        assert_eq!(message.data(), "hello");
        assert_eq!(message.last_event_id(), "");
        assert_eq!(message.event_type(), "message");
        assert_eq!(message.retry(), None);
    }

    #[test]
    fn normalizes_carriage_returns_in_data() {
        let message = MessageEvent::message("a\r\nb\rc\nd").unwrap();
        assert_eq!(message.data(), "a\nb\nc\nd");
    }

    #[test]
    fn rejects_invalid_utf8_data() {
        let err = MessageEvent::message(b"\xff\xfe".as_slice()).unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }

    #[test]
    fn rejects_invalid_last_event_id() {
        for id in [&b"a\0b"[..], b"a\rb", b"a\nb", b"\xc3"] {
            let err = MessageEvent::new("data", id, "message").unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "id {id:?}");
        }
    }

    #[test]
    fn rejects_invalid_type() {
        for event_type in [&b""[..], b"a\rb", b"\nab", b"\xe2\x82"] {
            let err = MessageEvent::new("data", "", event_type).unwrap_err();
            assert!(matches!(err, Error::InvalidInput(_)), "type {event_type:?}");
        }
    }

    #[test]
    fn with_retry_exposes_duration() {
        let message = MessageEvent::message("x").unwrap().with_retry(1234);
        assert_eq!(message.retry(), Some(1234));
        assert_eq!(message.retry_delay(), Some(Duration::from_millis(1234)));
    }

    #[test]
    fn serializes_with_wire_names() {
        let message = MessageEvent::new("hi", "7", "patch").unwrap();
        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"data": "hi", "lastEventId": "7", "type": "patch"})
        );
    }

    #[test]
    fn notification_names() {
        let message = MessageEvent::new("hi", "", "patch").unwrap();
        assert_eq!(Notification::Open.name(), "open");
        assert_eq!(Notification::Message(message).name(), "patch");
        assert_eq!(
            Notification::Error(Error::invalid_input("x")).name(),
            "error"
        );
    }
}
