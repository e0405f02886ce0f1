//! Feed Health Endpoint
//!
//! Reports the stream client's connectivity over HTTP, next to its
//! Prometheus metrics.
//!
//! # Endpoints
//!
//! - `GET /health` - Client diagnostics as JSON; 503 while disconnected or failed
//! - `GET /healthz` - Liveness probe, always OK while the process serves HTTP
//! - `GET /readyz` - Readiness probe, OK only while the feed is connected
//! - `GET /metrics` - Prometheus text exposition

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::State;
use axum::http::{StatusCode, header};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::domain::streaming::ConnectionState;
use crate::infrastructure::feed::{ClientDiagnostics, StreamClient};
use crate::infrastructure::metrics::get_metrics_handle;

// =============================================================================
// Health Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Feed health derived from the connection state.
    pub status: HealthStatus,
    /// Client version.
    pub version: String,
    /// Process uptime in seconds.
    pub uptime_secs: u64,
    /// Current time.
    pub current_time: DateTime<Utc>,
    /// Client snapshot (absent if the client has stopped).
    pub feed: Option<ClientDiagnostics>,
}

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    /// Feed connected.
    Healthy,
    /// Feed connecting or reconnecting.
    Degraded,
    /// Feed disconnected, failed, or client stopped.
    Unhealthy,
}

impl HealthStatus {
    /// Map a connection state to a health status.
    #[must_use]
    pub const fn from_state(state: ConnectionState) -> Self {
        match state {
            ConnectionState::Connected => Self::Healthy,
            ConnectionState::Connecting | ConnectionState::Reconnecting => Self::Degraded,
            ConnectionState::Disconnected | ConnectionState::Failed => Self::Unhealthy,
        }
    }

    const fn status_code(self) -> StatusCode {
        match self {
            Self::Healthy | Self::Degraded => StatusCode::OK,
            Self::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
        }
    }
}

// =============================================================================
// Health Server State
// =============================================================================

/// Shared state for the health server.
pub struct HealthServerState {
    version: String,
    started_at: Instant,
    client: StreamClient,
}

impl HealthServerState {
    /// Wrap a client handle for the health endpoints.
    #[must_use]
    pub fn new(version: String, client: StreamClient) -> Self {
        Self {
            version,
            started_at: Instant::now(),
            client,
        }
    }
}

// =============================================================================
// Health Server
// =============================================================================

/// Health check HTTP server.
pub struct HealthServer {
    port: u16,
    state: Arc<HealthServerState>,
    cancel: CancellationToken,
}

impl HealthServer {
    /// Create a new health server.
    #[must_use]
    pub const fn new(port: u16, state: Arc<HealthServerState>, cancel: CancellationToken) -> Self {
        Self {
            port,
            state,
            cancel,
        }
    }

    /// Serve until the cancellation token fires.
    ///
    /// # Errors
    ///
    /// Returns `HealthServerError::Bind` if the port is unavailable and
    /// `HealthServerError::Serve` if the listener fails afterwards.
    pub async fn run(self) -> Result<(), HealthServerError> {
        let port = self.port;
        let listener = TcpListener::bind(SocketAddr::from(([0, 0, 0, 0], port)))
            .await
            .map_err(|source| HealthServerError::Bind { port, source })?;

        tracing::info!(port, "Feed health endpoint listening");

        axum::serve(listener, router(self.state))
            .with_graceful_shutdown(self.cancel.cancelled_owned())
            .await?;

        tracing::info!(port, "Feed health endpoint stopped");
        Ok(())
    }
}

/// Build the router serving every health endpoint.
pub fn router(state: Arc<HealthServerState>) -> Router {
    Router::new()
        .route("/health", get(feed_health))
        .route("/healthz", get(alive))
        .route("/readyz", get(feed_ready))
        .route("/metrics", get(prometheus_text))
        .with_state(state)
}

// =============================================================================
// HTTP Handlers
// =============================================================================

const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4; charset=utf-8";

async fn feed_health(State(state): State<Arc<HealthServerState>>) -> impl IntoResponse {
    let report = snapshot(&state).await;
    (report.status.status_code(), Json(report))
}

async fn alive() -> &'static str {
    "OK"
}

async fn feed_ready(State(state): State<Arc<HealthServerState>>) -> (StatusCode, &'static str) {
    match state.client.get_state() {
        ConnectionState::Connected => (StatusCode::OK, "READY"),
        other => (StatusCode::SERVICE_UNAVAILABLE, other.as_str()),
    }
}

async fn prometheus_text() -> impl IntoResponse {
    match get_metrics_handle() {
        Some(handle) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)],
            handle.render(),
        ),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            [(header::CONTENT_TYPE, "text/plain")],
            "metrics recorder not installed".to_string(),
        ),
    }
}

async fn snapshot(state: &HealthServerState) -> HealthResponse {
    let feed = state.client.diagnostics().await.ok();
    let status = feed
        .as_ref()
        .map_or(HealthStatus::Unhealthy, |d| HealthStatus::from_state(d.state));

    HealthResponse {
        status,
        version: state.version.clone(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        current_time: Utc::now(),
        feed,
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Health endpoint errors.
#[derive(Debug, thiserror::Error)]
pub enum HealthServerError {
    /// The port could not be bound.
    #[error("cannot bind health endpoint to port {port}")]
    Bind {
        /// Requested port.
        port: u16,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The listener failed while serving.
    #[error("health endpoint failed")]
    Serve(#[from] std::io::Error),
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use axum::body::{Body, to_bytes};
    use axum::http::Request;
    use tower::ServiceExt;

    use super::*;
    use crate::ClientConfig;
    use crate::application::ports::NoAuth;
    use crate::infrastructure::feed::WebSocketLink;

    fn idle_state() -> Arc<HealthServerState> {
        let client = StreamClient::spawn(
            ClientConfig::new("ws://127.0.0.1:1/feed"),
            WebSocketLink::new(),
            NoAuth,
        );
        Arc::new(HealthServerState::new("0.1.0".to_string(), client))
    }

    async fn fetch(app: Router, uri: &str) -> (StatusCode, String) {
        let response = app
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[test]
    fn status_follows_connection_state() {
        assert_eq!(
            HealthStatus::from_state(ConnectionState::Connected),
            HealthStatus::Healthy
        );
        assert_eq!(
            HealthStatus::from_state(ConnectionState::Connecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::from_state(ConnectionState::Reconnecting),
            HealthStatus::Degraded
        );
        assert_eq!(
            HealthStatus::from_state(ConnectionState::Failed),
            HealthStatus::Unhealthy
        );
        assert_eq!(HealthStatus::Degraded.status_code(), StatusCode::OK);
        assert_eq!(
            HealthStatus::Unhealthy.status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test]
    async fn idle_client_is_alive_but_not_ready() {
        let app = router(idle_state());

        let (status, body) = fetch(app.clone(), "/health").await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        let json: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(json["status"], "unhealthy");
        assert_eq!(json["feed"]["state"], "disconnected");
        assert_eq!(json["version"], "0.1.0");

        assert_eq!(fetch(app.clone(), "/healthz").await, (StatusCode::OK, "OK".to_string()));
        assert_eq!(
            fetch(app, "/readyz").await,
            (StatusCode::SERVICE_UNAVAILABLE, "disconnected".to_string())
        );
    }

    #[tokio::test]
    async fn stopped_client_has_no_diagnostics() {
        let state = idle_state();
        let report = snapshot(&state).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert_eq!(report.feed.unwrap().live_heartbeat_tasks, 0);

        state.client.teardown().await;
        let report = snapshot(&state).await;
        assert_eq!(report.status, HealthStatus::Unhealthy);
        assert!(report.feed.is_none());
    }
}
