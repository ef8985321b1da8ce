//! Streaming HTTP client trait
//!
//! Implement `HttpClient` to plug any HTTP stack into an [`EventSource`](crate::EventSource).

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;
use http::{HeaderMap, StatusCode};
use url::Url;

/// Boxed error type used at the HTTP collaborator boundary
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Response body as a stream of byte chunks
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, BoxError>>;

/// Response to a streaming GET request
///
/// Dropping the body closes the underlying stream.
pub struct StreamingResponse {
    /// HTTP status code
    pub status: StatusCode,
    /// Response headers (case-insensitive lookup)
    pub headers: HeaderMap,
    /// Response body, consumed chunk by chunk
    pub body: ByteStream,
}

impl StreamingResponse {
    /// Create a new streaming response
    pub fn new(status: StatusCode, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

impl std::fmt::Debug for StreamingResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingResponse")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Trait for streaming HTTP clients
///
/// The returned future is dropped to cancel an in-flight request, so
/// implementations must not rely on being polled to completion.
///
/// # Example
///
/// ```rust,ignore
/// use eventsource::{async_trait, BoxError, HttpClient, StreamingResponse};
/// use http::HeaderMap;
/// use url::Url;
///
/// struct MyClient {
///     inner: my_http::Client,
/// }
///
/// #[async_trait]
/// impl HttpClient for MyClient {
///     async fn get(&self, url: &Url, headers: HeaderMap) -> Result<StreamingResponse, BoxError> {
///         let response = self.inner.get(url.as_str()).headers(headers).send().await?;
///         Ok(StreamingResponse::new(response.status(), response.headers().clone(), response.into_stream()))
///     }
///
///     fn name(&self) -> &'static str { "MyClient" }
/// }
/// ```
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Issue a GET request and resolve once the response head has arrived.
    ///
    /// Non-2xx statuses must be returned as a response, not as an error.
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<StreamingResponse, BoxError>;

    /// Return the client name (for logging)
    fn name(&self) -> &'static str;
}
