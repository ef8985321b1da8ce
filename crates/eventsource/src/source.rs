//! EventSource builder and connection driver

use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use http::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, CACHE_CONTROL, CONTENT_TYPE};
use http::StatusCode;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use url::Url;

use crate::client::{HttpClient, StreamingResponse};
use crate::decoder::{parse_block, FrameDecoder, ParsedBlock};
use crate::error::{Error, Result};
use crate::event::{validate_last_event_id, MessageEvent, Notification, DEFAULT_EVENT_TYPE};
use crate::listeners::{Filter, Listener, ListenerId, Listeners};

/// Reconnect delay used until the server sends a `retry` field
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(3);

const EVENT_STREAM: &str = "text/event-stream";

/// Connection state of an [`EventSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ReadyState {
    /// Waiting for a response, or for the reconnect timer
    Connecting = 0,
    /// Receiving events
    Open = 1,
    /// Terminal, nothing will be requested or emitted anymore
    Closed = 2,
}

impl ReadyState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => ReadyState::Connecting,
            1 => ReadyState::Open,
            _ => ReadyState::Closed,
        }
    }
}

impl fmt::Display for ReadyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadyState::Connecting => write!(f, "CONNECTING"),
            ReadyState::Open => write!(f, "OPEN"),
            ReadyState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// State shared between handles and the driver task
struct Shared {
    url: Url,
    state: AtomicU8,
    listeners: Listeners,
    cancel: CancellationToken,
}

impl Shared {
    fn ready_state(&self) -> ReadyState {
        ReadyState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn is_closed(&self) -> bool {
        self.ready_state() == ReadyState::Closed
    }

    /// Move from `from` to `to`; fails if someone else changed the state.
    fn transition(&self, from: ReadyState, to: ReadyState) -> bool {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn emit(&self, notification: Notification) {
        if self.cancel.is_cancelled() {
            return;
        }
        let delivered = self
            .listeners
            .emit(&notification, || self.cancel.is_cancelled());
        debug!(event = %notification.name(), listeners = delivered, "Notification emitted");
    }

    /// Report a fatal error: closed before the listeners run, torn down after.
    fn fail(&self, err: Error) {
        self.state.store(ReadyState::Closed as u8, Ordering::Release);
        self.emit(Notification::Error(err));
        self.close();
    }

    /// Returns `true` for the call that actually tore the source down.
    fn close(&self) -> bool {
        let first = !self.cancel.is_cancelled();
        // Cancel first so nothing is emitted once `Closed` is observable.
        self.cancel.cancel();
        self.state.store(ReadyState::Closed as u8, Ordering::Release);
        if first {
            debug!(listeners = self.listeners.len(), "Detaching listeners");
        }
        self.listeners.clear();
        first
    }
}

/// Client for a Server-Sent Events endpoint
///
/// Creating an `EventSource` immediately starts connecting in a background
/// task. Messages, `open` and `error` notifications are delivered to the
/// registered listeners, and dropped connections are retried automatically
/// until [`close`](EventSource::close) is called. Dropping the handle does not
/// close the connection.
///
/// Handles are cheap to clone; all clones control the same connection.
#[derive(Clone)]
pub struct EventSource {
    shared: Arc<Shared>,
}

impl EventSource {
    /// Connect to `url` with the given HTTP client and default settings
    pub fn new<C: HttpClient>(url: &str, client: C) -> Result<Self> {
        Self::builder(url).client(client).build()
    }

    /// Create a new builder for `url`
    pub fn builder(url: impl Into<String>) -> EventSourceBuilder {
        EventSourceBuilder::new(url.into())
    }

    /// The validated endpoint URL
    pub fn url(&self) -> &Url {
        &self.shared.url
    }

    /// Current connection state
    pub fn ready_state(&self) -> ReadyState {
        self.shared.ready_state()
    }

    /// Whether the source has been closed, explicitly or by a fatal error
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Receive every notification
    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Filter::All, Arc::new(listener))
    }

    /// Called each time the connection is established
    pub fn on_open<F>(&self, listener: F) -> ListenerId
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.shared.listeners.add(Filter::Open, open_listener(listener))
    }

    /// Called for messages of the default `message` type
    pub fn on_message<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.on(DEFAULT_EVENT_TYPE, listener)
    }

    /// Called for messages whose type is `event_type`
    pub fn on<F>(&self, event_type: impl Into<String>, listener: F) -> ListenerId
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.shared
            .listeners
            .add(Filter::Message(event_type.into()), message_listener(listener))
    }

    /// Called for fatal and transient errors.
    ///
    /// Check [`ready_state`](EventSource::ready_state) (or
    /// [`Error::is_fatal`]) to tell a permanent failure from a retry.
    pub fn on_error<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.shared.listeners.add(Filter::Error, error_listener(listener))
    }

    /// Remove a listener, returns `false` if it was not registered
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.shared.listeners.remove(id)
    }

    /// Close the connection.
    ///
    /// Cancels the pending request or response stream and any reconnect
    /// timer, and detaches all listeners. Safe to call from inside a listener
    /// and more than once.
    pub fn close(&self) {
        if self.shared.close() {
            info!(url = %self.shared.url, "EventSource closed");
        }
    }

    /// Wait until the source is closed
    pub async fn closed(&self) {
        self.shared.cancel.cancelled().await
    }
}

impl fmt::Debug for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventSource")
            .field("url", &self.shared.url.as_str())
            .field("ready_state", &self.ready_state())
            .finish()
    }
}

fn open_listener<F>(listener: F) -> Listener
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(move |notification: &Notification| {
        if let Notification::Open = notification {
            listener();
        }
    })
}

fn message_listener<F>(listener: F) -> Listener
where
    F: Fn(&MessageEvent) + Send + Sync + 'static,
{
    Arc::new(move |notification: &Notification| {
        if let Notification::Message(message) = notification {
            listener(message);
        }
    })
}

fn error_listener<F>(listener: F) -> Listener
where
    F: Fn(&Error) + Send + Sync + 'static,
{
    Arc::new(move |notification: &Notification| {
        if let Notification::Error(err) = notification {
            listener(err);
        }
    })
}

/// Builder for EventSource
///
/// Listeners registered here are attached before the first request starts,
/// so they never miss the first `open`.
pub struct EventSourceBuilder<C = ()> {
    url: String,
    client: C,
    reconnect_delay: Duration,
    last_event_id: String,
    listeners: Vec<(Filter, Listener)>,
}

impl EventSourceBuilder {
    fn new(url: String) -> Self {
        Self {
            url,
            client: (),
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            last_event_id: String::new(),
            listeners: Vec::new(),
        }
    }
}

impl<C> EventSourceBuilder<C> {
    /// Set the HTTP client used for every connection attempt
    pub fn client<H: HttpClient>(self, client: H) -> EventSourceBuilder<H> {
        EventSourceBuilder {
            url: self.url,
            client,
            reconnect_delay: self.reconnect_delay,
            last_event_id: self.last_event_id,
            listeners: self.listeners,
        }
    }

    /// Set the reconnect delay used until the server sends `retry`
    pub fn reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }

    /// Resume from a known event ID (sent as `Last-Event-ID`)
    pub fn last_event_id(mut self, id: impl Into<String>) -> Self {
        self.last_event_id = id.into();
        self
    }

    /// See [`EventSource::subscribe`]
    pub fn subscribe<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Notification) + Send + Sync + 'static,
    {
        self.listeners.push((Filter::All, Arc::new(listener)));
        self
    }

    /// See [`EventSource::on_open`]
    pub fn on_open<F>(mut self, listener: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        self.listeners.push((Filter::Open, open_listener(listener)));
        self
    }

    /// See [`EventSource::on_message`]
    pub fn on_message<F>(self, listener: F) -> Self
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.on(DEFAULT_EVENT_TYPE, listener)
    }

    /// See [`EventSource::on`]
    pub fn on<F>(mut self, event_type: impl Into<String>, listener: F) -> Self
    where
        F: Fn(&MessageEvent) + Send + Sync + 'static,
    {
        self.listeners
            .push((Filter::Message(event_type.into()), message_listener(listener)));
        self
    }

    /// See [`EventSource::on_error`]
    pub fn on_error<F>(mut self, listener: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.listeners.push((Filter::Error, error_listener(listener)));
        self
    }
}

impl<C: HttpClient> EventSourceBuilder<C> {
    /// Validate the settings and start connecting.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<EventSource> {
        let url = parse_url(&self.url)?;
        validate_last_event_id(self.last_event_id.as_bytes())?;
        let runtime = tokio::runtime::Handle::try_current()?;

        let listeners = Listeners::default();
        for (filter, listener) in self.listeners {
            listeners.add(filter, listener);
        }

        let shared = Arc::new(Shared {
            url,
            state: AtomicU8::new(ReadyState::Connecting as u8),
            listeners,
            cancel: CancellationToken::new(),
        });

        let driver = Driver {
            shared: shared.clone(),
            client: self.client,
            session: Session {
                last_event_id: self.last_event_id,
                reconnect_delay: self.reconnect_delay,
            },
            decoder: FrameDecoder::new(),
        };

        info!(
            url = %shared.url,
            client = driver.client.name(),
            reconnect_delay_ms = self.reconnect_delay.as_millis() as u64,
            "Starting EventSource"
        );
        runtime.spawn(driver.run());

        Ok(EventSource { shared })
    }
}

fn parse_url(url: &str) -> Result<Url> {
    let parsed =
        Url::parse(url).map_err(|e| Error::invalid_input(format!("invalid URL {url:?}: {e}")))?;

    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(Error::invalid_input(format!(
            "URL scheme must be http or https, got {:?}",
            parsed.scheme()
        )));
    }
    if parsed.host_str().map_or(true, str::is_empty) {
        return Err(Error::invalid_input(format!("URL {url:?} has no host")));
    }

    Ok(parsed)
}

/// State carried across connection attempts
#[derive(Debug)]
struct Session {
    last_event_id: String,
    reconnect_delay: Duration,
}

impl Session {
    fn request_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(EVENT_STREAM));
        headers.insert(CACHE_CONTROL, HeaderValue::from_static("no-cache"));

        if !self.last_event_id.is_empty() {
            match HeaderValue::from_bytes(self.last_event_id.as_bytes()) {
                Ok(value) => {
                    headers.insert(HeaderName::from_static("last-event-id"), value);
                }
                Err(_) => warn!(
                    last_event_id = %self.last_event_id,
                    "Last event ID is not a valid header value, resuming without it"
                ),
            }
        }

        headers
    }

    fn commit(&mut self, parsed: &ParsedBlock) {
        let id = parsed.message.last_event_id();
        if self.last_event_id != id {
            self.last_event_id = id.to_owned();
        }
        if let Some(delay) = parsed.retry {
            debug!(delay_ms = delay.as_millis() as u64, "Server updated reconnect delay");
            self.reconnect_delay = delay;
        }
    }
}

/// `Content-Type: text/event-stream`, case-insensitive, optionally followed by `;` parameters
fn is_event_stream(headers: &HeaderMap) -> bool {
    let Some(value) = headers.get(CONTENT_TYPE) else {
        return false;
    };
    let value = value.as_bytes();
    let prefix = EVENT_STREAM.len();

    value.len() >= prefix
        && value[..prefix].eq_ignore_ascii_case(EVENT_STREAM.as_bytes())
        && matches!(value.get(prefix), None | Some(b';'))
}

fn check_envelope(response: &StreamingResponse) -> Result<()> {
    if response.status != StatusCode::OK {
        return Err(Error::UnexpectedStatus(response.status));
    }
    if !is_event_stream(&response.headers) {
        let content_type = response
            .headers
            .get(CONTENT_TYPE)
            .map(|v| String::from_utf8_lossy(v.as_bytes()).into_owned())
            .unwrap_or_default();
        return Err(Error::UnexpectedContentType(content_type));
    }
    Ok(())
}

enum Next {
    Retry,
    Stop,
}

/// Owns everything a connection needs; runs as a single task
struct Driver<C> {
    shared: Arc<Shared>,
    client: C,
    session: Session,
    decoder: FrameDecoder,
}

impl<C: HttpClient> Driver<C> {
    async fn run(mut self) {
        let cancel = self.shared.cancel.clone();

        while let Next::Retry = self.connect(&cancel).await {
            let delay = self.session.reconnect_delay;
            debug!(
                url = %self.shared.url,
                delay_ms = delay.as_millis() as u64,
                "Reconnect timer started"
            );
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }

        debug!(url = %self.shared.url, "EventSource driver stopped");
    }

    /// One connection attempt, from request to end of stream.
    async fn connect(&mut self, cancel: &CancellationToken) -> Next {
        let headers = self.session.request_headers();
        info!(
            url = %self.shared.url,
            last_event_id = %self.session.last_event_id,
            "EventSource connecting"
        );

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Next::Stop,
            response = self.client.get(&self.shared.url, headers) => response,
        };

        let response = match response {
            Ok(response) => response,
            Err(err) => {
                if self.shared.is_closed() {
                    return Next::Stop;
                }
                warn!(url = %self.shared.url, error = %err, "EventSource request failed");
                return self.fail_transient(Error::Request(err));
            }
        };

        if let Err(err) = check_envelope(&response) {
            warn!(url = %self.shared.url, error = %err, "EventSource response rejected");
            self.shared.fail(err);
            return Next::Stop;
        }

        if !self
            .shared
            .transition(ReadyState::Connecting, ReadyState::Open)
        {
            return Next::Stop;
        }
        info!(url = %self.shared.url, "EventSource open");
        self.shared.emit(Notification::Open);
        if self.shared.is_closed() {
            return Next::Stop;
        }

        let mut body = response.body;
        loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Next::Stop,
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(chunk)) => {
                    if self.dispatch(&chunk).is_break() {
                        return Next::Stop;
                    }
                }
                Some(Err(err)) => {
                    debug!(error = %err, "EventSource body stream failed");
                    break;
                }
                None => break,
            }
        }
        drop(body);
        self.decoder.clear();

        if !self
            .shared
            .transition(ReadyState::Open, ReadyState::Connecting)
        {
            return Next::Stop;
        }
        let delay = self.session.reconnect_delay;
        warn!(
            url = %self.shared.url,
            delay_ms = delay.as_millis() as u64,
            "EventSource stream closed"
        );
        self.fail_transient(Error::StreamClosed(delay))
    }

    /// Emit a retryable error; a listener may still close the source.
    fn fail_transient(&self, err: Error) -> Next {
        self.shared.emit(Notification::Error(err));
        if self.shared.is_closed() {
            Next::Stop
        } else {
            Next::Retry
        }
    }

    /// Feed a body chunk to the decoder and deliver every complete message.
    fn dispatch(&mut self, chunk: &[u8]) -> ControlFlow<()> {
        self.decoder.push(chunk);

        while !self.shared.is_closed() {
            let Some(block) = self.decoder.next_block() else {
                return ControlFlow::Continue(());
            };
            let parsed = parse_block(&block, &self.session.last_event_id);
            self.session.commit(&parsed);

            let message = parsed.message;
            if message.data().is_empty() {
                continue;
            }
            debug!(
                event_type = %message.event_type(),
                last_event_id = %message.last_event_id(),
                "Message received"
            );
            self.shared.emit(Notification::Message(message));
        }

        ControlFlow::Break(())
    }
}
