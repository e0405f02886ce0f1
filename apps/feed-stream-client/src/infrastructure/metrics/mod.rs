//! Prometheus Metrics Module
//!
//! Exposes stream client metrics via Prometheus format for monitoring.
//!
//! # Metrics Categories
//!
//! - **Commands**: Outbound commands sent and dropped (by reason)
//! - **Messages**: Inbound frames by type, protocol and listener errors
//! - **Connection**: State transitions and reconnect attempts
//! - **Subscriptions**: Active topics and queued commands
//!
//! # Integration
//!
//! Metrics are exposed at `/metrics` on the health server port. Recording
//! before [`init_metrics`] is a no-op.

use std::sync::OnceLock;

use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

use crate::domain::outbound::CommandKind;
use crate::domain::streaming::ConnectionState;

// =============================================================================
// Global Metrics Handle
// =============================================================================

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Initialize the Prometheus metrics recorder.
///
/// Repeated calls return the handle installed by the first one.
///
/// # Errors
///
/// Returns an error if another global recorder is already installed.
pub fn init_metrics() -> Result<PrometheusHandle, BuildError> {
    if let Some(handle) = PROMETHEUS_HANDLE.get() {
        return Ok(handle.clone());
    }

    let handle = PrometheusBuilder::new().install_recorder()?;
    register_metrics();

    Ok(PROMETHEUS_HANDLE.get_or_init(|| handle).clone())
}

/// Get the Prometheus handle for rendering metrics.
///
/// Returns `None` if metrics have not been initialized.
#[must_use]
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

// =============================================================================
// Metric Registration
// =============================================================================

fn register_metrics() {
    // Outbound
    describe_counter!(
        "feed_client_commands_sent_total",
        "Total commands written to the feed connection"
    );
    describe_counter!(
        "feed_client_commands_dropped_total",
        "Total commands dropped instead of sent, by reason"
    );

    // Inbound
    describe_counter!(
        "feed_client_messages_received_total",
        "Total inbound frames decoded, by type"
    );
    describe_counter!(
        "feed_client_protocol_errors_total",
        "Total malformed inbound frames dropped"
    );
    describe_counter!(
        "feed_client_listener_errors_total",
        "Total topic listener failures"
    );

    // Connection
    describe_counter!(
        "feed_client_reconnect_attempts_total",
        "Total automatic reconnection attempts"
    );
    describe_counter!(
        "feed_client_state_transitions_total",
        "Total connection state transitions, by target state"
    );

    // Subscriptions
    describe_gauge!(
        "feed_client_active_topics",
        "Number of topics with at least one listener"
    );
    describe_gauge!(
        "feed_client_queued_commands",
        "Number of commands waiting for a connection"
    );
}

// =============================================================================
// Metric Recording Functions
// =============================================================================

/// Reasons a command is not sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Evicted from a full queue.
    Capacity,
    /// Older than the replay-validity window at flush.
    Expired,
    /// Made redundant by the topic snapshot announced on connect.
    Superseded,
    /// Ping while not connected.
    SkippedPing,
}

impl DropReason {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Capacity => "capacity",
            Self::Expired => "expired",
            Self::Superseded => "superseded",
            Self::SkippedPing => "skipped_ping",
        }
    }
}

/// Record a command written to the link.
pub fn record_command_sent(kind: CommandKind) {
    counter!("feed_client_commands_sent_total", "kind" => kind.as_str()).increment(1);
}

/// Record a command dropped instead of sent.
pub fn record_command_dropped(reason: DropReason) {
    counter!("feed_client_commands_dropped_total", "reason" => reason.as_str()).increment(1);
}

/// Record a decoded inbound frame.
pub fn record_message_received(message_type: &'static str) {
    counter!("feed_client_messages_received_total", "type" => message_type).increment(1);
}

/// Record a malformed inbound frame.
pub fn record_protocol_error() {
    counter!("feed_client_protocol_errors_total").increment(1);
}

/// Record a failed listener call.
pub fn record_listener_error() {
    counter!("feed_client_listener_errors_total").increment(1);
}

/// Record an automatic reconnection attempt.
pub fn record_reconnect_attempt() {
    counter!("feed_client_reconnect_attempts_total").increment(1);
}

/// Record a state transition.
pub fn record_state_transition(to: ConnectionState) {
    counter!("feed_client_state_transitions_total", "to" => to.as_str()).increment(1);
}

/// Update the active topic count.
#[allow(clippy::cast_precision_loss)]
pub fn set_active_topics(count: usize) {
    gauge!("feed_client_active_topics").set(count as f64);
}

/// Update the queued command count.
#[allow(clippy::cast_precision_loss)]
pub fn set_queued_commands(count: usize) {
    gauge!("feed_client_queued_commands").set(count as f64);
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drop_reason_as_str() {
        assert_eq!(DropReason::Capacity.as_str(), "capacity");
        assert_eq!(DropReason::Expired.as_str(), "expired");
        assert_eq!(DropReason::Superseded.as_str(), "superseded");
        assert_eq!(DropReason::SkippedPing.as_str(), "skipped_ping");
    }

    #[test]
    fn recording_without_recorder_is_noop() {
        record_command_sent(CommandKind::Subscribe);
        record_command_dropped(DropReason::Expired);
        record_state_transition(ConnectionState::Connected);
        set_active_topics(3);
    }
}
