//! reqwest backend for the eventsource client
//!
//! # Example
//!
//! ```rust,ignore
//! use eventsource::EventSource;
//! use eventsource_reqwest::ReqwestClient;
//!
//! let client = reqwest::Client::builder()
//!     .connect_timeout(std::time::Duration::from_secs(10))
//!     .build()?;
//!
//! let es = EventSource::builder("https://example.com/stream")
//!     .client(ReqwestClient::from(client))
//!     .on_message(|message| println!("{}", message.data()))
//!     .build()?;
//! ```

use async_trait::async_trait;
use eventsource::{BoxError, HttpClient, StreamingResponse, Url};
use futures::{StreamExt, TryStreamExt};
use http::HeaderMap;
use tracing::debug;

/// Streaming GET requests over a [`reqwest::Client`]
///
/// No request timeout is set here: an event stream is expected to stay open
/// indefinitely. Configure a connect timeout on the wrapped client instead.
#[derive(Debug, Clone, Default)]
pub struct ReqwestClient {
    client: reqwest::Client,
}

impl ReqwestClient {
    /// Create a client with reqwest's default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// The wrapped reqwest client
    pub fn inner(&self) -> &reqwest::Client {
        &self.client
    }
}

impl From<reqwest::Client> for ReqwestClient {
    fn from(client: reqwest::Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl HttpClient for ReqwestClient {
    async fn get(&self, url: &Url, headers: HeaderMap) -> Result<StreamingResponse, BoxError> {
        let response = self
            .client
            .get(url.clone())
            .headers(headers)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        debug!(%url, %status, "Response headers received");

        let body = response
            .bytes_stream()
            .map_err(|e| Box::new(e) as BoxError)
            .boxed();

        Ok(StreamingResponse::new(status, headers, body))
    }

    fn name(&self) -> &'static str {
        "reqwest"
    }
}
