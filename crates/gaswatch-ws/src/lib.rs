//! JSON-RPC WebSocket subscriptions.
//!
//! Provides push feeds over `eth_subscribe` with:
//! - Connect + subscribe handshake bounded by a timeout
//! - Automatic reconnection with capped exponential backoff
//! - Heartbeat monitoring (ping frames, pong timeout detection)
//! - Channel-based event delivery (`WsEvent`)

pub mod connection;
pub mod error;
pub mod heartbeat;
pub mod message;
pub mod subscription;

pub use connection::{
    backoff_delay, ConnectionConfig, ConnectionManager, ConnectionState, WsEvent,
};
pub use error::{WsError, WsResult};
pub use message::{
    NotificationParams, RpcErrorObject, RpcMessage, RpcRequest, RpcResponse, SubscriptionKind,
    SubscriptionNotification,
};
pub use subscription::SubscriptionTracker;

use std::sync::Once;

static INIT_CRYPTO: Once = Once::new();

/// Install the TLS crypto provider.
/// Must be called before any `wss://` connection is made.
pub fn init_crypto() {
    INIT_CRYPTO.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}
