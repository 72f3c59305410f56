//! JSON-RPC 2.0 message types.
//!
//! Shared by the WebSocket subscription client and the HTTP request client
//! in `gaswatch-feed`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

// ============================================================================
// Requests (Outgoing)
// ============================================================================

/// JSON-RPC request.
#[derive(Debug, Clone, Serialize)]
pub struct RpcRequest {
    /// Always "2.0".
    pub jsonrpc: &'static str,
    /// Request ID for response correlation.
    pub id: u64,
    pub method: String,
    pub params: Value,
}

impl RpcRequest {
    pub fn new(id: u64, method: impl Into<String>, params: Value) -> Self {
        Self {
            jsonrpc: "2.0",
            id,
            method: method.into(),
            params,
        }
    }

    /// `eth_subscribe` for the given kind.
    pub fn subscribe(id: u64, kind: &SubscriptionKind) -> Self {
        Self::new(id, "eth_subscribe", kind.params())
    }

    /// `eth_unsubscribe` for a server-assigned subscription ID.
    pub fn unsubscribe(id: u64, subscription_id: &str) -> Self {
        Self::new(id, "eth_unsubscribe", json!([subscription_id]))
    }
}

/// What to subscribe to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionKind {
    /// New block headers.
    NewHeads,
    /// Logs emitted by one contract, filtered by topics.
    Logs {
        address: String,
        topics: Vec<String>,
    },
}

impl SubscriptionKind {
    /// Name used as the first `eth_subscribe` parameter.
    pub fn name(&self) -> &'static str {
        match self {
            Self::NewHeads => "newHeads",
            Self::Logs { .. } => "logs",
        }
    }

    /// Full `eth_subscribe` parameter array.
    pub fn params(&self) -> Value {
        match self {
            Self::NewHeads => json!(["newHeads"]),
            Self::Logs { address, topics } => json!([
                "logs",
                { "address": address, "topics": topics }
            ]),
        }
    }
}

// ============================================================================
// Responses and notifications (Incoming)
// ============================================================================

/// JSON-RPC error object.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RpcErrorObject {
    pub code: i64,
    pub message: String,
}

impl std::fmt::Display for RpcErrorObject {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

/// Reply to a request.
#[derive(Debug, Clone, Deserialize)]
pub struct RpcResponse {
    /// Number or string per JSON-RPC; we only ever send numbers.
    #[serde(default)]
    pub id: Option<Value>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<RpcErrorObject>,
}

impl RpcResponse {
    /// Whether this response answers request `id`.
    pub fn is_for(&self, id: u64) -> bool {
        self.id.as_ref().and_then(Value::as_u64) == Some(id)
    }

    /// Split into the result value or the error object.
    ///
    /// A response with neither field yields `Value::Null`.
    pub fn into_result(self) -> Result<Value, RpcErrorObject> {
        match (self.error, self.result) {
            (Some(err), _) => Err(err),
            (None, result) => Ok(result.unwrap_or(Value::Null)),
        }
    }
}

/// Parameters of an `eth_subscription` notification.
#[derive(Debug, Clone, Deserialize)]
pub struct NotificationParams {
    pub subscription: String,
    pub result: Value,
}

/// Server-pushed notification.
#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionNotification {
    pub method: String,
    pub params: NotificationParams,
}

impl SubscriptionNotification {
    pub fn is_subscription(&self) -> bool {
        self.method == "eth_subscription"
    }
}

/// Any message received on a JSON-RPC socket.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RpcMessage {
    /// Must come first: a response has only optional fields and would
    /// match anything.
    Notification(SubscriptionNotification),
    Response(RpcResponse),
}
