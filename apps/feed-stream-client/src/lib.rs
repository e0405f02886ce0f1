#![cfg_attr(
    test,
    allow(
        clippy::unwrap_used,
        clippy::expect_used,
        clippy::float_cmp,
        clippy::significant_drop_tightening,
        clippy::too_many_lines,
        clippy::needless_pass_by_value,
        clippy::items_after_statements
    )
)]

//! Feed Stream Client - Resilient Real-Time Feed Multiplexer
//!
//! Keeps a single logical WebSocket connection to a market, portfolio or
//! order-event feed, multiplexes any number of topic subscriptions over it,
//! and restores them after every reconnect.
//!
//! # Layers (inside → outside)
//!
//! - **Domain**: Core client types and logic, no I/O
//!   - `streaming`: Connection states, topics, inbound envelope
//!   - `subscription`: Topic → listener registry
//!   - `outbound`: Outbound commands and the replay queue
//!   - `events`: Event bus and error taxonomy
//!
//! - **Application**: Port definitions
//!   - `ports`: Transport link and auth token seams
//!
//! - **Infrastructure**: Adapters and external integrations
//!   - `feed`: Stream client, reconnect policy, heartbeat, codec, WebSocket link
//!   - `config`: Configuration from the environment
//!   - `health`: Health check HTTP endpoint
//!   - `metrics`: Prometheus instrumentation
//!   - `telemetry`: Tracing and OpenTelemetry
//!
//! # Data Flow
//!
//! ```text
//!                       ┌──────────────┐  subscribe/unsubscribe/ping
//! consumer ─subscribe──▶│ StreamClient │──────────────────────────────▶ feed
//!          ◀─listener───│   (actor)    │◀───── data/heartbeat/error ───
//!                       └──────────────┘
//! ```
//!
//! # Example
//!
//! ```no_run
//! use feed_stream_client::{ClientConfig, NoAuth, StreamClient, WebSocketLink};
//!
//! # async fn demo() {
//! let client = StreamClient::spawn(
//!     ClientConfig::new("wss://feed.example.com/stream"),
//!     WebSocketLink::new(),
//!     NoAuth,
//! );
//!
//! let orders = client.subscribe("orders:user-1", |payload| {
//!     println!("order update: {payload}");
//!     Ok(())
//! });
//! client.connect();
//!
//! // later
//! orders.unsubscribe();
//! client.teardown().await;
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]

// =============================================================================
// Module Declarations
// =============================================================================

/// Domain layer - Core client types with no I/O.
pub mod domain;

/// Application layer - Port definitions.
pub mod application;

/// Infrastructure layer - Adapters and external integrations.
pub mod infrastructure;

// =============================================================================
// Re-exports
// =============================================================================

// Domain types
pub use domain::events::{ClientEvent, EventKind, EventSubscription, StreamError};
pub use domain::outbound::{CommandKind, OutboundCommand};
pub use domain::streaming::{ConnectionState, InboundMessage, Payload, Topic};

// Ports
pub use application::ports::{
    AuthError, AuthTokenProvider, ConnectionLink, LinkError, LinkEvent, LinkEvents, NoAuth,
    StaticToken,
};

// Infrastructure config
pub use infrastructure::config::{ClientConfig, ConfigError, ServiceConfig};

// Stream client
pub use infrastructure::feed::{
    ClientDiagnostics, ClientError, StreamClient, SubscriptionHandle, WebSocketLink,
};

// Health server
pub use infrastructure::health::{HealthServer, HealthServerError, HealthServerState};

// Metrics
pub use infrastructure::metrics::init_metrics;

// Telemetry
pub use infrastructure::telemetry::{TelemetryConfig, TelemetryGuard, init as init_telemetry};
