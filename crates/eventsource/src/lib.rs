//! # EventSource
//!
//! A reconnecting Server-Sent Events (SSE) client for Rust.
//!
//! ## Features
//!
//! - **Browser-like semantics**: `open`, typed message and `error` notifications,
//!   a `CONNECTING` / `OPEN` / `CLOSED` ready state
//! - **Automatic reconnection**: dropped streams and failed requests are retried
//!   after the server-directed `retry` delay, resuming with `Last-Event-ID`
//! - **Incremental decoding**: handles `\n`, `\r` and `\r\n` line endings, blocks
//!   split across chunks, and invalid UTF-8 in field values
//! - **Pluggable HTTP**: implement [`HttpClient`] for any HTTP stack
//!   (see the `eventsource-reqwest` crate for a ready-made one)
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use eventsource::EventSource;
//! use eventsource_reqwest::ReqwestClient;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let es = EventSource::builder("https://example.com/stream")
//!         .client(ReqwestClient::new())
//!         .on_open(|| println!("open"))
//!         .on_message(|message| println!("{}", message.data()))
//!         .build()?;
//!
//!     es.closed().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Handling Errors
//!
//! Errors are delivered as notifications. A fatal error (bad status code or
//! content type) leaves the source `CLOSED`; anything else is retried unless
//! the listener closes the source itself.
//!
//! ```rust,ignore
//! use eventsource::{EventSource, ReadyState};
//!
//! let es = EventSource::new("https://example.com/stream", client)?;
//! let handle = es.clone();
//! es.on_error(move |err| {
//!     if handle.ready_state() == ReadyState::Closed {
//!         eprintln!("Permanent error: {err}");
//!     } else {
//!         eprintln!("Temporary error: {err}");
//!     }
//! });
//! ```

mod client;
pub mod decoder;
mod error;
mod event;
mod listeners;
mod source;

// Re-exports
pub use client::{BoxError, ByteStream, HttpClient, StreamingResponse};
pub use decoder::{parse_block, FrameDecoder, ParsedBlock};
pub use error::{Error, Result};
pub use event::{MessageEvent, Notification, DEFAULT_EVENT_TYPE};
pub use listeners::{Listener, ListenerId};
pub use source::{EventSource, EventSourceBuilder, ReadyState, DEFAULT_RECONNECT_DELAY};

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use bytes::Bytes;
pub use http;
pub use url::Url;
