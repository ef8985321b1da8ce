mod config;

use eventsource::{EventSource, Notification};
use eventsource_reqwest::ReqwestClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::AppConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = AppConfig::load()?;
    tracing::info!(
        url = %config.url,
        last_event_id = %config.last_event_id,
        reconnect_delay_ms = config.reconnect_delay_ms,
        connect_timeout_secs = config.connect_timeout_secs,
        "EventSource consumer starting"
    );

    let client = reqwest::Client::builder()
        .connect_timeout(config.connect_timeout())
        .build()?;

    // Messages go to stdout as JSON lines, everything else is logged to stderr.
    // Errors are told apart with `is_fatal()`: a handle cloned after `build()` could miss
    // the first error, and fatal errors are exactly those emitted once the source is CLOSED.
    let es = EventSource::builder(config.url.as_str())
        .client(ReqwestClient::from(client))
        .reconnect_delay(config.reconnect_delay())
        .last_event_id(config.last_event_id.as_str())
        .subscribe(|notification| {
            if let Notification::Message(message) = notification {
                match serde_json::to_string(message) {
                    Ok(line) => println!("{line}"),
                    Err(e) => tracing::error!(error = %e, "Failed to encode message"),
                }
            }
        })
        .on_open(|| tracing::info!("Connection open"))
        .on_error(|err| {
            if err.is_fatal() {
                tracing::error!(error = %err, "Permanent error");
            } else {
                tracing::warn!(error = %err, "Temporary error");
            }
        })
        .build()?;

    tokio::select! {
        _ = es.closed() => {}
        _ = shutdown_signal() => es.close(),
    }

    tracing::info!(ready_state = %es.ready_state(), "EventSource consumer stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received Ctrl+C"),
        _ = terminate => tracing::info!("Received SIGTERM"),
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "eventsource=info,eventsource_reqwest=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
        .init();
}
