//! Client Events
//!
//! Typed publish/subscribe surface for connection-level observers
//! (connectivity indicators, alerting, logs).
//!
//! Handlers run synchronously, in registration order, on the task that
//! owns the client state. Each call is isolated: a panicking handler is
//! logged and the remaining handlers still run.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

use super::outbound::CommandKind;
use super::streaming::{ConnectionState, Topic};
use super::subscription::{ListenerFailure, ListenerId, panic_message};

// =============================================================================
// Error Taxonomy
// =============================================================================

/// Errors surfaced by the stream client.
///
/// Transport and auth errors drive the state machine; protocol and listener
/// errors are recovered locally. None of them is returned from a call: they
/// are observed through [`ClientEvent::Error`] and logs.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StreamError {
    /// Link-level failure. Recovered by reconnecting.
    #[error("transport error: {0}")]
    Transport(String),

    /// Malformed inbound frame. Dropped; the connection is unaffected.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// No auth token available. Recovered by reconnecting.
    #[error("auth error: {0}")]
    Auth(String),

    /// A topic listener returned an error or panicked.
    #[error("listener {listener_id} failed on {topic}: {message}")]
    Listener {
        /// Topic being dispatched.
        topic: Topic,
        /// Failing listener.
        listener_id: ListenerId,
        /// Error or panic message.
        message: String,
    },

    /// The outbound queue overflowed and evicted its oldest command.
    #[error("outbound queue full, evicted {kind:?} command")]
    Capacity {
        /// Kind of the evicted command.
        kind: CommandKind,
        /// Topic of the evicted command.
        topic: Option<Topic>,
    },

    /// The server reported an error frame.
    #[error("feed error: {message}")]
    Feed {
        /// Channel the error refers to, if any.
        channel: Option<Topic>,
        /// Server-provided message.
        message: String,
    },
}

impl From<ListenerFailure> for StreamError {
    fn from(failure: ListenerFailure) -> Self {
        Self::Listener {
            topic: failure.topic,
            listener_id: failure.listener_id,
            message: failure.message,
        }
    }
}

// =============================================================================
// Events
// =============================================================================

/// Event categories handlers can register for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Connection state transitions.
    StateChanged,
    /// Recoverable errors.
    Error,
    /// The reconnect ceiling was reached.
    MaxAttemptsReached,
}

/// Event emitted by the stream client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection state changed.
    StateChanged {
        /// Previous state.
        from: ConnectionState,
        /// New state.
        to: ConnectionState,
    },
    /// A recoverable error occurred.
    Error(StreamError),
    /// Automatic reconnection stopped after this many consecutive failures.
    MaxAttemptsReached {
        /// Failed attempts counted.
        attempts: u32,
    },
}

impl ClientEvent {
    /// Get the event category.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateChanged { .. } => EventKind::StateChanged,
            Self::Error(_) => EventKind::Error,
            Self::MaxAttemptsReached { .. } => EventKind::MaxAttemptsReached,
        }
    }
}

// =============================================================================
// Event Bus
// =============================================================================

/// Handler invoked with each matching event.
pub type EventHandler = Arc<dyn Fn(&ClientEvent) + Send + Sync>;

#[derive(Default)]
struct BusInner {
    next_id: u64,
    handlers: Vec<(u64, EventKind, EventHandler)>,
}

/// Registry of event handlers.
#[derive(Clone, Default)]
pub struct EventBus {
    inner: Arc<RwLock<BusInner>>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("handlers", &self.inner.read().handlers.len())
            .finish()
    }
}

impl EventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one event kind.
    pub fn on<F>(&self, kind: EventKind, handler: F) -> EventSubscription
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
    {
        let mut inner = self.inner.write();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.handlers.push((id, kind, Arc::new(handler)));

        EventSubscription {
            id,
            bus: Arc::downgrade(&self.inner),
        }
    }

    /// Invoke every handler registered for the event's kind.
    ///
    /// Handlers are snapshotted first, so a handler may register or remove
    /// handlers without deadlocking. Returns the number of handlers that
    /// panicked.
    pub fn emit(&self, event: &ClientEvent) -> usize {
        let kind = event.kind();
        let handlers: Vec<EventHandler> = self
            .inner
            .read()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .map(|(_, _, h)| Arc::clone(h))
            .collect();

        let mut panicked = 0;
        for handler in handlers {
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| handler(event))) {
                panicked += 1;
                tracing::error!(
                    event = ?kind,
                    panic = %panic_message(panic.as_ref()),
                    "Event handler panicked"
                );
            }
        }

        panicked
    }

    #[cfg(test)]
    fn handler_count(&self, kind: EventKind) -> usize {
        self.inner
            .read()
            .handlers
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }
}

/// Registration handle returned by [`EventBus::on`].
///
/// Dropping the handle keeps the handler registered; call [`off`](Self::off)
/// to remove it.
#[derive(Debug)]
pub struct EventSubscription {
    id: u64,
    bus: Weak<RwLock<BusInner>>,
}

impl EventSubscription {
    /// Remove the handler. Calling it again is a no-op.
    pub fn off(&self) {
        if let Some(inner) = self.bus.upgrade() {
            inner.write().handlers.retain(|(id, _, _)| *id != self.id);
        }
    }
}
