//! Heartbeat monitoring for WebSocket connections.
//!
//! JSON-RPC endpoints have no application-level ping, so liveness is checked
//! with WebSocket ping frames, sent only after a quiet period.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::time::Duration;
use tracing::debug;

#[derive(Debug)]
struct HeartbeatInner {
    last_ping: Option<DateTime<Utc>>,
    last_pong: Option<DateTime<Utc>>,
    last_message: DateTime<Utc>,
    waiting_for_pong: bool,
}

/// Tracks ping/pong timing and inbound activity for one connection.
#[derive(Debug)]
pub struct HeartbeatManager {
    /// Quiet period before a ping is sent.
    interval_ms: u64,
    /// How long a pong may take.
    timeout_ms: u64,
    inner: RwLock<HeartbeatInner>,
}

impl HeartbeatManager {
    pub fn new(interval_ms: u64, timeout_ms: u64) -> Self {
        Self {
            interval_ms,
            timeout_ms,
            inner: RwLock::new(HeartbeatInner {
                last_ping: None,
                last_pong: None,
                last_message: Utc::now(),
                waiting_for_pong: false,
            }),
        }
    }

    /// Reset on every new connection.
    pub fn reset(&self) {
        let mut inner = self.inner.write();
        inner.last_ping = None;
        inner.last_pong = None;
        inner.last_message = Utc::now();
        inner.waiting_for_pong = false;
    }

    pub fn record_ping(&self) {
        let mut inner = self.inner.write();
        inner.last_ping = Some(Utc::now());
        inner.waiting_for_pong = true;
    }

    pub fn record_pong(&self) {
        let now = Utc::now();
        let mut inner = self.inner.write();
        inner.last_pong = Some(now);
        inner.waiting_for_pong = false;
        inner.last_message = now;
        if let Some(ping) = inner.last_ping {
            debug!(rtt_ms = (now - ping).num_milliseconds(), "Received pong");
        }
    }

    /// Any inbound frame counts as activity.
    pub fn record_message(&self) {
        self.inner.write().last_message = Utc::now();
    }

    /// A ping is outstanding for longer than the timeout.
    pub fn is_timed_out(&self) -> bool {
        let inner = self.inner.read();
        match (inner.waiting_for_pong, inner.last_ping) {
            (true, Some(ping)) => (Utc::now() - ping).num_milliseconds() > self.timeout_ms as i64,
            _ => false,
        }
    }

    pub fn time_since_last_message_ms(&self) -> i64 {
        (Utc::now() - self.inner.read().last_message).num_milliseconds()
    }

    /// No pong pending and the connection has been quiet for `interval_ms`.
    pub fn should_send_heartbeat(&self) -> bool {
        !self.inner.read().waiting_for_pong
            && self.time_since_last_message_ms() >= self.interval_ms as i64
    }

    /// Sleep until the next check is due.
    pub async fn wait_for_check(&self) {
        tokio::time::sleep(Duration::from_millis((self.interval_ms / 2).max(1))).await;
    }

    pub fn last_pong(&self) -> Option<DateTime<Utc>> {
        self.inner.read().last_pong
    }
}
