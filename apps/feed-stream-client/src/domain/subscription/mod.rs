//! Subscription Registry
//!
//! Tracks which listeners are attached to which topics.
//!
//! # Design
//!
//! The registry keeps, per topic, the listeners in registration order and
//! uses the listener count as the reference count for the server-side
//! announcement:
//! - count went 0→1: the topic must be announced (`subscribe`)
//! - count went 1→0: the topic must be withdrawn (`unsubscribe`)
//!
//! Registry state does not depend on connection state. A lost connection
//! never removes a listener; only the announcement is redone on reconnect.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;

use super::streaming::{Payload, Topic};

// =============================================================================
// Types
// =============================================================================

/// Unique identifier for a registered listener.
pub type ListenerId = u64;

/// Callback invoked with every payload published on a topic.
///
/// Returning `Err` (or panicking) is reported as a listener error and never
/// prevents delivery to other listeners.
pub type Listener = Arc<dyn Fn(&Payload) -> anyhow::Result<()> + Send + Sync>;

/// A listener invocation that returned an error or panicked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListenerFailure {
    /// Topic being dispatched.
    pub topic: Topic,
    /// Listener that failed.
    pub listener_id: ListenerId,
    /// Error or panic message.
    pub message: String,
}

/// Outcome of dispatching one payload to a topic.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Listeners that completed successfully.
    pub delivered: usize,
    /// Listeners that failed.
    pub failures: Vec<ListenerFailure>,
}

// =============================================================================
// Registry
// =============================================================================

/// Topic → listeners map with reference-counted announcements.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use feed_stream_client::domain::subscription::{Listener, SubscriptionRegistry};
///
/// let mut registry = SubscriptionRegistry::new();
/// let listener: Listener = Arc::new(|_payload| Ok(()));
///
/// // First listener announces the topic
/// assert!(registry.add("orders:user-1", 1, listener.clone()));
/// // Second listener rides on the existing announcement
/// assert!(!registry.add("orders:user-1", 2, listener));
///
/// // Removing one of two keeps the topic active
/// assert!(!registry.remove("orders:user-1", 1));
/// // Removing the last withdraws it
/// assert!(registry.remove("orders:user-1", 2));
/// ```
#[derive(Default)]
pub struct SubscriptionRegistry {
    topics: HashMap<Topic, BTreeMap<ListenerId, Listener>>,
}

impl std::fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("topics", &self.topic_count())
            .field("listeners", &self.listener_count())
            .finish()
    }
}

impl SubscriptionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener on a topic.
    ///
    /// Returns `true` if this is the topic's first listener and the topic
    /// must be announced to the server. Re-registering an existing id is a
    /// no-op that returns `false`.
    pub fn add(&mut self, topic: impl Into<Topic>, id: ListenerId, listener: Listener) -> bool {
        let listeners = self.topics.entry(topic.into()).or_default();

        if listeners.contains_key(&id) {
            return false;
        }

        listeners.insert(id, listener);
        listeners.len() == 1
    }

    /// Remove a listener from a topic.
    ///
    /// Returns `true` if it was the topic's last listener and the topic must
    /// be withdrawn from the server. Unknown topics or ids return `false`,
    /// which makes removal idempotent.
    pub fn remove(&mut self, topic: &str, id: ListenerId) -> bool {
        let Some(listeners) = self.topics.get_mut(topic) else {
            return false;
        };

        if listeners.remove(&id).is_none() {
            return false;
        }

        if listeners.is_empty() {
            self.topics.remove(topic);
            return true;
        }

        false
    }

    /// Deliver a payload to every listener of a topic, in registration order.
    ///
    /// Each call is isolated: an `Err` or a panic is recorded in the report
    /// and dispatch continues with the next listener.
    pub fn dispatch(&self, topic: &str, payload: &Payload) -> DispatchReport {
        let mut report = DispatchReport::default();

        let Some(listeners) = self.topics.get(topic) else {
            return report;
        };

        for (id, listener) in listeners {
            let outcome = catch_unwind(AssertUnwindSafe(|| listener(payload)));

            let message = match outcome {
                Ok(Ok(())) => {
                    report.delivered += 1;
                    continue;
                }
                Ok(Err(e)) => format!("{e:#}"),
                Err(panic) => panic_message(panic.as_ref()),
            };

            report.failures.push(ListenerFailure {
                topic: topic.to_string(),
                listener_id: *id,
                message,
            });
        }

        report
    }

    /// Get all topics with at least one listener, sorted.
    #[must_use]
    pub fn active_topics(&self) -> BTreeSet<Topic> {
        self.topics.keys().cloned().collect()
    }

    /// Check if a topic has at least one listener.
    #[must_use]
    pub fn is_active(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    /// Get the number of active topics.
    #[must_use]
    pub fn topic_count(&self) -> usize {
        self.topics.len()
    }

    /// Get the total number of listeners across all topics.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.topics.values().map(BTreeMap::len).sum()
    }
}

/// Extract a readable message from a panic payload.
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "listener panicked".to_string())
}
