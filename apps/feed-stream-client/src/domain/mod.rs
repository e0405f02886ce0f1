//! Domain Layer - Core client types and logic.
//!
//! This layer contains the connection vocabulary, the subscription
//! registry, the outbound command queue and the event bus. Nothing here
//! performs I/O.

/// Connection state and topic/payload types.
pub mod streaming;

/// Topic → listener registry with reference-counted announcements.
pub mod subscription;

/// Outbound commands and the replay queue.
pub mod outbound;

/// Client events and the error taxonomy.
pub mod events;
