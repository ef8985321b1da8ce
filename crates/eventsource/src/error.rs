//! Error types for the EventSource client

use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::client::BoxError;

/// Result type alias using the library's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the EventSource client
///
/// Only [`Error::InvalidInput`] and [`Error::Runtime`] are ever returned to a
/// caller. Everything else is delivered through the `error` notification.
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed constructor arguments (URL, message fields)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The server answered with a status other than `200 OK`
    #[error("Unexpected status code {0}")]
    UnexpectedStatus(StatusCode),

    /// The server answered with something other than `text/event-stream`
    #[error("Unexpected Content-Type {0:?}")]
    UnexpectedContentType(String),

    /// The response body ended after the connection was open
    #[error("Stream closed, reconnecting in {} seconds", .0.as_secs_f64())]
    StreamClosed(Duration),

    /// The streaming request itself failed (DNS, connect, TLS, ...)
    #[error("Request failed: {0}")]
    Request(#[source] BoxError),

    /// Constructed outside of a Tokio runtime
    #[error("Runtime error: {0}")]
    Runtime(#[from] tokio::runtime::TryCurrentError),
}

impl Error {
    /// Whether this error permanently closed the source.
    ///
    /// Fatal errors are emitted right before the source transitions to
    /// `Closed`; every other error emitted at runtime is followed by a retry.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::UnexpectedStatus(_) | Error::UnexpectedContentType(_)
        )
    }

    pub(crate) fn invalid_input(msg: impl Into<String>) -> Self {
        Error::InvalidInput(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stream_closed_message_carries_delay_in_seconds() {
        let err = Error::StreamClosed(Duration::from_millis(1500));
        assert_eq!(err.to_string(), "Stream closed, reconnecting in 1.5 seconds");

        let err = Error::StreamClosed(Duration::from_secs(3));
        assert_eq!(err.to_string(), "Stream closed, reconnecting in 3 seconds");
    }

    #[test]
    fn only_envelope_errors_are_fatal() {
        assert!(Error::UnexpectedStatus(StatusCode::BAD_REQUEST).is_fatal());
        assert!(Error::UnexpectedContentType("text/plain".into()).is_fatal());
        assert!(!Error::StreamClosed(Duration::from_secs(3)).is_fatal());
        assert!(!Error::Request("connection refused".into()).is_fatal());
        assert!(!Error::invalid_input("bad").is_fatal());
    }
}
