//! Subscription tracking for one connection.
//!
//! A connection carries a single `eth_subscribe` stream. The tracker
//! remembers the pending request ID until the server acknowledges it, then
//! the server-assigned subscription ID used to filter notifications.

use crate::error::{WsError, WsResult};
use crate::message::{NotificationParams, RpcResponse};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};

#[derive(Debug, Default)]
struct TrackerInner {
    pending_request: Option<u64>,
    active: Option<String>,
    subscribed_at: Option<DateTime<Utc>>,
    notifications: u64,
}

/// Subscription state for one connection.
#[derive(Debug, Default)]
pub struct SubscriptionTracker {
    inner: RwLock<TrackerInner>,
}

impl SubscriptionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an outgoing `eth_subscribe` request.
    pub fn begin(&self, request_id: u64) {
        let mut inner = self.inner.write();
        inner.pending_request = Some(request_id);
        inner.active = None;
        inner.subscribed_at = None;
    }

    /// Whether `response` answers the pending subscribe request.
    pub fn is_ack(&self, response: &RpcResponse) -> bool {
        self.inner
            .read()
            .pending_request
            .is_some_and(|id| response.is_for(id))
    }

    /// Consume the subscribe response.
    ///
    /// Returns the subscription ID, or `SubscriptionRejected` when the server
    /// refused (e.g. the endpoint does not support push).
    pub fn confirm(&self, response: RpcResponse) -> WsResult<String> {
        let mut inner = self.inner.write();
        inner.pending_request = None;

        let subscription_id = match response.into_result() {
            Ok(Value::String(id)) => id,
            Ok(other) => {
                return Err(WsError::ParseError(format!(
                    "subscription id is not a string: {other}"
                )))
            }
            Err(err) => return Err(WsError::SubscriptionRejected(err.to_string())),
        };

        info!(subscription_id = %subscription_id, "Subscription confirmed");
        inner.active = Some(subscription_id.clone());
        inner.subscribed_at = Some(Utc::now());
        inner.notifications = 0;
        Ok(subscription_id)
    }

    /// Count a notification if it belongs to the active subscription.
    pub fn accept(&self, params: &NotificationParams) -> bool {
        let mut inner = self.inner.write();
        if inner.active.as_deref() == Some(params.subscription.as_str()) {
            inner.notifications += 1;
            true
        } else {
            debug!(subscription = %params.subscription, "Notification for unknown subscription");
            false
        }
    }

    /// Forget everything (connection lost).
    pub fn clear(&self) {
        *self.inner.write() = TrackerInner::default();
    }

    pub fn active_id(&self) -> Option<String> {
        self.inner.read().active.clone()
    }

    pub fn subscribed_at(&self) -> Option<DateTime<Utc>> {
        self.inner.read().subscribed_at
    }

    /// Notifications accepted since the last confirm.
    pub fn notification_count(&self) -> u64 {
        self.inner.read().notifications
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn response(raw: Value) -> RpcResponse {
        serde_json::from_value(raw).unwrap()
    }

    #[test]
    fn test_confirm_success() {
        let tracker = SubscriptionTracker::new();
        tracker.begin(3);

        let ack = response(json!({"jsonrpc": "2.0", "id": 3, "result": "0xsub"}));
        assert!(tracker.is_ack(&ack));
        assert_eq!(tracker.confirm(ack).unwrap(), "0xsub");
        assert_eq!(tracker.active_id().as_deref(), Some("0xsub"));
        assert!(tracker.subscribed_at().is_some());
    }

    #[test]
    fn test_confirm_rejected() {
        let tracker = SubscriptionTracker::new();
        tracker.begin(1);
        let nack = response(json!({
            "jsonrpc": "2.0", "id": 1,
            "error": {"code": -32601, "message": "notifications not supported"}
        }));
        let err = tracker.confirm(nack).unwrap_err();
        assert!(matches!(err, WsError::SubscriptionRejected(_)));
        assert!(tracker.active_id().is_none());
    }

    #[test]
    fn test_other_response_is_not_ack() {
        let tracker = SubscriptionTracker::new();
        tracker.begin(1);
        let other = response(json!({"jsonrpc": "2.0", "id": 2, "result": true}));
        assert!(!tracker.is_ack(&other));
    }

    #[test]
    fn test_accept_filters_by_subscription() {
        let tracker = SubscriptionTracker::new();
        tracker.begin(1);
        tracker
            .confirm(response(json!({"id": 1, "result": "0xa"})))
            .unwrap();

        let ours = NotificationParams {
            subscription: "0xa".to_string(),
            result: json!({}),
        };
        let stale = NotificationParams {
            subscription: "0xold".to_string(),
            result: json!({}),
        };
        assert!(tracker.accept(&ours));
        assert!(!tracker.accept(&stale));
        assert_eq!(tracker.notification_count(), 1);

        tracker.clear();
        assert!(!tracker.accept(&ours));
    }
}
