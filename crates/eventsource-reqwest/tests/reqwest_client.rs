//! End-to-end tests against a local axum server

use std::convert::Infallible;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::response::sse::{Event, Sse};
use axum::routing::get;
use axum::Router;
use eventsource::{EventSource, HttpClient, Notification, ReadyState, Url};
use eventsource_reqwest::ReqwestClient;
use futures::Stream;
use tokio::sync::mpsc;
use tokio::time::timeout;

type Requests = Arc<Mutex<Vec<HeaderMap>>>;

/// Every connection gets one event carrying its sequence number, then the stream ends
async fn numbered(
    State(requests): State<Requests>,
    headers: HeaderMap,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let n = {
        let mut requests = requests.lock().unwrap();
        requests.push(headers);
        requests.len()
    };
    let event = Event::default()
        .id(n.to_string())
        .retry(Duration::from_millis(10))
        .data(format!("hello {n}"));
    Sse::new(futures::stream::iter([Ok(event)]))
}

async fn serve() -> (String, Requests) {
    let requests = Requests::default();
    let app = Router::new()
        .route("/stream", get(numbered))
        .route("/plain", get(|| async { "not a stream" }))
        .with_state(requests.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

    (format!("http://{addr}"), requests)
}

#[derive(Debug, PartialEq)]
enum Seen {
    Open,
    Message { data: String, id: String },
    Error { message: String, fatal: bool },
}

fn record(es: &EventSource) -> mpsc::UnboundedReceiver<Seen> {
    let (tx, rx) = mpsc::unbounded_channel();
    es.subscribe(move |notification| {
        let seen = match notification {
            Notification::Open => Seen::Open,
            Notification::Message(m) => Seen::Message {
                data: m.data().to_owned(),
                id: m.last_event_id().to_owned(),
            },
            Notification::Error(e) => Seen::Error {
                message: e.to_string(),
                fatal: e.is_fatal(),
            },
        };
        let _ = tx.send(seen);
    });
    rx
}

async fn next(seen: &mut mpsc::UnboundedReceiver<Seen>) -> Seen {
    timeout(Duration::from_secs(5), seen.recv())
        .await
        .expect("no notification within 5s")
        .expect("listeners detached")
}

#[tokio::test]
async fn streams_and_resumes_with_last_event_id() {
    let (base, requests) = serve().await;
    let es = EventSource::new(&format!("{base}/stream"), ReqwestClient::new()).unwrap();
    let mut seen = record(&es);

    assert_eq!(next(&mut seen).await, Seen::Open);
    assert_eq!(
        next(&mut seen).await,
        Seen::Message {
            data: "hello 1".into(),
            id: "1".into()
        }
    );
    assert_eq!(
        next(&mut seen).await,
        Seen::Error {
            message: "Stream closed, reconnecting in 0.01 seconds".into(),
            fatal: false
        }
    );
    assert_eq!(next(&mut seen).await, Seen::Open);
    assert_eq!(
        next(&mut seen).await,
        Seen::Message {
            data: "hello 2".into(),
            id: "2".into()
        }
    );
    es.close();

    let requests = requests.lock().unwrap();
    assert!(requests.len() >= 2);
    assert_eq!(requests[0]["accept"], "text/event-stream");
    assert_eq!(requests[0]["cache-control"], "no-cache");
    assert!(requests[0].get("last-event-id").is_none());
    assert_eq!(requests[1]["last-event-id"], "1");
}

#[tokio::test]
async fn not_found_is_fatal() {
    let (base, requests) = serve().await;
    let es = EventSource::new(&format!("{base}/missing"), ReqwestClient::new()).unwrap();
    let mut seen = record(&es);

    assert_eq!(
        next(&mut seen).await,
        Seen::Error {
            message: "Unexpected status code 404 Not Found".into(),
            fatal: true
        }
    );
    assert_eq!(es.ready_state(), ReadyState::Closed);
    assert!(requests.lock().unwrap().is_empty());
}

#[tokio::test]
async fn plain_text_is_fatal() {
    let (base, _requests) = serve().await;
    let es = EventSource::new(&format!("{base}/plain"), ReqwestClient::new()).unwrap();
    let mut seen = record(&es);

    assert_eq!(
        next(&mut seen).await,
        Seen::Error {
            message: "Unexpected Content-Type \"text/plain; charset=utf-8\"".into(),
            fatal: true
        }
    );
    assert!(es.is_closed());
}

#[tokio::test]
async fn connection_refused_is_retried() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let es = EventSource::builder(format!("http://{addr}/stream"))
        .client(ReqwestClient::new())
        .reconnect_delay(Duration::from_secs(60))
        .build()
        .unwrap();
    let mut seen = record(&es);

    match next(&mut seen).await {
        Seen::Error { message, fatal } => {
            assert!(message.starts_with("Request failed"), "{message}");
            assert!(!fatal);
        }
        other => panic!("expected error, got {other:?}"),
    }
    assert_eq!(es.ready_state(), ReadyState::Connecting);
    es.close();
}

#[tokio::test]
async fn response_head_is_passed_through() {
    let (base, _requests) = serve().await;
    let url = Url::parse(&format!("{base}/plain")).unwrap();

    let response = ReqwestClient::new()
        .get(&url, HeaderMap::new())
        .await
        .unwrap();

    assert_eq!(response.status, 200);
    assert_eq!(
        response.headers["content-type"],
        "text/plain; charset=utf-8"
    );
}
