//! Feed Client Adapters
//!
//! The stream client orchestrator and the pieces it drives:
//!
//! - **Client**: connection state machine, outbound replay, topic fan-out
//! - **Reconnect**: capped exponential back-off with jitter
//! - **Heartbeat**: application-level liveness detection
//! - **Codec**: JSON wire format
//! - **WebSocket**: `ConnectionLink` over `tokio-tungstenite`

pub mod client;
pub mod codec;
pub mod heartbeat;
pub mod reconnect;
pub mod websocket;

pub use client::{
    CLOSE_NORMAL, CLOSE_UNHEALTHY, ClientDiagnostics, ClientError, StreamClient,
    SubscriptionHandle,
};
pub use codec::{CodecError, JsonCodec};
pub use heartbeat::{
    HeartbeatConfig, HeartbeatError, HeartbeatEvent, HeartbeatManager, HeartbeatState,
};
pub use reconnect::{ReconnectConfig, ReconnectError, ReconnectPolicy};
pub use websocket::WebSocketLink;
