//! Outbound Commands
//!
//! Commands the client sends to the feed, and the bounded FIFO that holds
//! them while the link is down.
//!
//! # Queue Policy
//!
//! - Bounded to `max_size` entries; on overflow the oldest entry is evicted
//! - Entries older than the replay-validity window (`ttl`) are dropped at
//!   flush time instead of being sent
//! - Pings are never queued: a liveness probe is meaningless once the link
//!   is down

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use super::streaming::Topic;

// =============================================================================
// Commands
// =============================================================================

/// Kind of outbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandKind {
    /// Announce interest in a topic.
    Subscribe,
    /// Withdraw interest in a topic.
    Unsubscribe,
    /// Application-level liveness probe.
    Ping,
}

impl CommandKind {
    /// Get the wire name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::Ping => "ping",
        }
    }
}

/// A command destined for the feed server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundCommand {
    /// Command kind.
    pub kind: CommandKind,
    /// Target topic (absent for pings).
    pub topic: Option<Topic>,
    /// Correlation id sent as `requestId`.
    pub request_id: String,
    /// Time the command entered the queue, used for the replay-validity
    /// window. Restamped by [`OutboundQueue::push`].
    pub enqueued_at: Instant,
}

impl OutboundCommand {
    fn new(kind: CommandKind, topic: Option<Topic>) -> Self {
        Self {
            kind,
            topic,
            request_id: uuid::Uuid::new_v4().to_string(),
            enqueued_at: Instant::now(),
        }
    }

    /// Create a subscribe command.
    #[must_use]
    pub fn subscribe(topic: impl Into<Topic>) -> Self {
        Self::new(CommandKind::Subscribe, Some(topic.into()))
    }

    /// Create an unsubscribe command.
    #[must_use]
    pub fn unsubscribe(topic: impl Into<Topic>) -> Self {
        Self::new(CommandKind::Unsubscribe, Some(topic.into()))
    }

    /// Create a ping command.
    #[must_use]
    pub fn ping() -> Self {
        Self::new(CommandKind::Ping, None)
    }

    /// Age of the command at `now`.
    #[must_use]
    pub fn age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.enqueued_at)
    }

    /// Check if the command is older than the replay-validity window.
    #[must_use]
    pub fn is_expired(&self, now: Instant, ttl: Duration) -> bool {
        self.age(now) > ttl
    }
}

// =============================================================================
// Queue
// =============================================================================

/// Result of offering a command to the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Enqueued {
    /// Stored at the back of the queue.
    Queued,
    /// Stored, and the oldest entry was evicted to make room.
    Evicted(OutboundCommand),
    /// Not stored (pings, or a zero-capacity queue).
    Skipped,
}

/// Commands released by a flush.
#[derive(Debug, Clone, Default)]
pub struct Flushed {
    /// Fresh commands, in enqueue order.
    pub ready: Vec<OutboundCommand>,
    /// Commands dropped for exceeding the replay-validity window.
    pub expired: Vec<OutboundCommand>,
}

/// Bounded FIFO of commands awaiting an open link.
#[derive(Debug)]
pub struct OutboundQueue {
    entries: VecDeque<OutboundCommand>,
    max_size: usize,
    ttl: Duration,
}

impl OutboundQueue {
    /// Create a queue holding at most `max_size` commands no older than `ttl`.
    #[must_use]
    pub fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            entries: VecDeque::with_capacity(max_size.min(1024)),
            max_size,
            ttl,
        }
    }

    /// Append a command, evicting the oldest entry on overflow.
    ///
    /// The command's age starts counting here, not at construction.
    pub fn push(&mut self, mut command: OutboundCommand) -> Enqueued {
        if command.kind == CommandKind::Ping || self.max_size == 0 {
            return Enqueued::Skipped;
        }
        command.enqueued_at = Instant::now();

        let evicted = if self.entries.len() >= self.max_size {
            self.entries.pop_front()
        } else {
            None
        };

        self.entries.push_back(command);

        evicted.map_or(Enqueued::Queued, Enqueued::Evicted)
    }

    /// Drain the queue in FIFO order, separating stale entries.
    pub fn flush(&mut self, now: Instant) -> Flushed {
        let ttl = self.ttl;
        let mut flushed = Flushed::default();

        for command in self.entries.drain(..) {
            if command.is_expired(now, ttl) {
                flushed.expired.push(command);
            } else {
                flushed.ready.push(command);
            }
        }

        flushed
    }

    /// Discard every queued command, returning how many were dropped.
    pub fn clear(&mut self) -> usize {
        let dropped = self.entries.len();
        self.entries.clear();
        dropped
    }

    /// Get the number of queued commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
