//! Application Layer - Port definitions.
//!
//! This layer defines how the client core talks to the outside world:
//! the transport link and the auth capability.

/// Port interfaces for external systems (transport link, auth).
pub mod ports;
