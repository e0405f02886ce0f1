//! Infrastructure Layer - Adapters and external integrations.
//!
//! This layer contains the stream client itself and the concrete
//! implementations of the port interfaces defined in the application layer.

/// Stream client, WebSocket link and their supporting policies.
pub mod feed;

/// Configuration loading.
pub mod config;

/// Health check HTTP endpoint.
pub mod health;

/// Prometheus metrics instrumentation.
pub mod metrics;

/// OpenTelemetry tracing integration.
pub mod telemetry;
