//! Feed Stream Client Binary
//!
//! Connects to a feed, subscribes to the configured topics and logs every
//! update until shut down.
//!
//! # Usage
//!
//! ```bash
//! FEED_URL=wss://feed.example.com/stream FEED_TOPICS=orders:user-1 \
//!     cargo run --bin feed-stream-client
//! ```
//!
//! # Environment Variables
//!
//! ## Required
//! - `FEED_URL`: Feed WebSocket URL
//!
//! ## Optional
//! - `FEED_AUTH_TOKEN`: Bearer token sent on connect (default: none)
//! - `FEED_TOPICS`: Comma-separated topics to subscribe to
//! - `FEED_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `FEED_RECONNECT_BASE_DELAY_MS`, `FEED_RECONNECT_CAP_MS`,
//!   `FEED_RECONNECT_JITTER_RATIO`, `FEED_MAX_RECONNECT_ATTEMPTS`,
//!   `FEED_HEARTBEAT_INTERVAL_MS`, `FEED_OUTBOUND_QUEUE_TTL_MS`,
//!   `FEED_OUTBOUND_QUEUE_MAX_SIZE`, `FEED_CONNECT_TIMEOUT_MS`: client tuning
//! - `OTEL_ENABLED`: Enable OpenTelemetry (default: true)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4317>)
//! - `OTEL_SERVICE_NAME`: Service name (default: feed-stream-client)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use feed_stream_client::infrastructure::telemetry;
use feed_stream_client::{
    ClientEvent, EventKind, HealthServer, HealthServerState, NoAuth, ServiceConfig, StaticToken,
    StreamClient, SubscriptionHandle, WebSocketLink, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Graceful shutdown timeout.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Already installed is fine
    let _ = rustls::crypto::ring::default_provider().install_default();

    load_dotenv();

    // Initialize telemetry (OpenTelemetry + tracing)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting Feed Stream Client");

    // Initialize Prometheus metrics
    if let Err(e) = init_metrics() {
        tracing::warn!(error = %e, "Metrics recorder unavailable");
    }

    let config = ServiceConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let client = match config.auth_token.clone() {
        Some(token) => {
            StreamClient::spawn(config.client.clone(), WebSocketLink::new(), StaticToken::new(token))
        }
        None => StreamClient::spawn(config.client.clone(), WebSocketLink::new(), NoAuth),
    };

    let _observers = observe_client(&client);
    let subscriptions = subscribe_topics(&client, &config.topics);

    // Spawn health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        client.clone(),
    ));
    let health_server = HealthServer::new(config.health_port, health_state, shutdown_token.clone());
    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    client.connect();
    tracing::info!("Feed stream client ready");

    await_shutdown(shutdown_token).await;

    for subscription in &subscriptions {
        subscription.unsubscribe();
    }
    if tokio::time::timeout(SHUTDOWN_TIMEOUT, client.teardown())
        .await
        .is_err()
    {
        tracing::warn!("Stream client did not stop within the shutdown timeout");
    }

    tracing::info!("Feed stream client stopped");
    Ok(())
}

/// Log state changes, errors and the reconnect ceiling.
fn observe_client(client: &StreamClient) -> Vec<feed_stream_client::EventSubscription> {
    vec![
        client.on(EventKind::StateChanged, |event| {
            if let ClientEvent::StateChanged { from, to } = event {
                tracing::info!(from = %from, to = %to, "Feed connectivity changed");
            }
        }),
        client.on(EventKind::Error, |event| {
            if let ClientEvent::Error(error) = event {
                tracing::warn!(error = %error, "Feed error");
            }
        }),
        client.on(EventKind::MaxAttemptsReached, |event| {
            if let ClientEvent::MaxAttemptsReached { attempts } = event {
                tracing::error!(
                    attempts,
                    "Feed unreachable; restart or call reconnect() to try again"
                );
            }
        }),
    ]
}

/// Subscribe a logging listener to each topic.
fn subscribe_topics(client: &StreamClient, topics: &[String]) -> Vec<SubscriptionHandle> {
    topics
        .iter()
        .map(|topic| {
            let name = topic.clone();
            client.subscribe(topic.clone(), move |payload| {
                tracing::info!(topic = %name, payload = %payload, "Feed update");
                Ok(())
            })
        })
        .collect()
}

/// Log the parsed configuration.
fn log_config(config: &ServiceConfig) {
    tracing::info!(
        url = %config.client.url,
        topics = config.topics.len(),
        authenticated = config.auth_token.is_some(),
        health_port = config.health_port,
        "Configuration loaded"
    );
    tracing::debug!(config = ?config, "Full configuration");
}

/// Load .env file from current directory or any ancestor directory.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();

    tracing::info!(
        timeout_secs = SHUTDOWN_TIMEOUT.as_secs(),
        "Graceful shutdown started"
    );
}
