//! WebSocket connection manager.
//!
//! Runs connect → `eth_subscribe` → notification loop, and reconnects with
//! capped exponential backoff when any step fails. Progress is reported to
//! the owner as `WsEvent`s over an mpsc channel.

use crate::error::{WsError, WsResult};
use crate::heartbeat::HeartbeatManager;
use crate::message::{RpcMessage, RpcRequest, SubscriptionKind};
use crate::subscription::SubscriptionTracker;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{
    connect_async_tls_with_config, tungstenite::Message, MaybeTlsStream, WebSocketStream,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;
type WsSource = SplitStream<WsStream>;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// WebSocket URL.
    pub url: String,
    /// Source name used in logs (e.g. "ethereum", "oracle").
    pub label: String,
    /// What to subscribe to after connecting.
    pub subscription: SubscriptionKind,
    /// Maximum reconnection attempts (0 = infinite).
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff.
    pub reconnect_base_delay_ms: u64,
    /// Maximum delay for exponential backoff.
    pub reconnect_max_delay_ms: u64,
    /// Connect plus subscribe acknowledgement must finish within this.
    pub subscribe_timeout_ms: u64,
    /// Quiet period before a ping frame is sent.
    pub heartbeat_interval_ms: u64,
    /// Pong must arrive within this.
    pub heartbeat_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            label: String::new(),
            subscription: SubscriptionKind::NewHeads,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: 1000,
            reconnect_max_delay_ms: 60_000,
            subscribe_timeout_ms: 10_000,
            heartbeat_interval_ms: 30_000,
            heartbeat_timeout_ms: 10_000,
        }
    }
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Subscribed,
    Reconnecting,
}

/// Event delivered to the connection owner.
#[derive(Debug, Clone, PartialEq)]
pub enum WsEvent {
    /// A connect attempt started. `attempt` is 0 for the first try.
    Connecting { attempt: u32 },
    /// The subscription was acknowledged.
    Subscribed { subscription_id: String },
    /// `result` field of a notification for the active subscription.
    Notification(serde_json::Value),
    /// The attempt or the live session ended; a retry follows unless
    /// shutting down.
    Disconnected { reason: String },
}

/// Backoff delay for the given attempt (1-based): `base * 2^(attempt-1)`,
/// capped at `max_ms`. Monotonic non-decreasing in `attempt`.
pub fn backoff_delay(base_ms: u64, max_ms: u64, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(20);
    let delay = base_ms.saturating_mul(1u64 << exponent);
    Duration::from_millis(delay.min(max_ms))
}

fn close_reason(frame: Option<CloseFrame<'_>>, default: &str) -> WsError {
    let (code, reason) = frame
        .map(|f| (f.code.into(), f.reason.to_string()))
        .unwrap_or((1000, default.to_string()));
    WsError::ConnectionClosed { code, reason }
}

/// WebSocket connection manager for a single subscription.
pub struct ConnectionManager {
    config: ConnectionConfig,
    state: RwLock<ConnectionState>,
    subscription: SubscriptionTracker,
    heartbeat: HeartbeatManager,
    event_tx: mpsc::Sender<WsEvent>,
    reconnect_count: RwLock<u32>,
    next_request_id: AtomicU64,
    shutdown_token: CancellationToken,
}

impl ConnectionManager {
    pub fn new(config: ConnectionConfig, event_tx: mpsc::Sender<WsEvent>) -> Self {
        let heartbeat =
            HeartbeatManager::new(config.heartbeat_interval_ms, config.heartbeat_timeout_ms);
        Self {
            config,
            state: RwLock::new(ConnectionState::Disconnected),
            subscription: SubscriptionTracker::new(),
            heartbeat,
            event_tx,
            reconnect_count: RwLock::new(0),
            next_request_id: AtomicU64::new(1),
            shutdown_token: CancellationToken::new(),
        }
    }

    /// Tie this manager to an externally owned token.
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown_token = token;
        self
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.read()
    }

    /// Consecutive failed attempts since the last successful subscribe.
    pub fn reconnect_count(&self) -> u32 {
        *self.reconnect_count.read()
    }

    /// Signal graceful shutdown.
    pub fn shutdown(&self) {
        info!(source = %self.config.label, "ConnectionManager shutdown requested");
        self.shutdown_token.cancel();
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown_token.is_cancelled()
    }

    /// Run until shutdown (or until `max_reconnect_attempts` is exhausted).
    pub async fn run(&self) -> WsResult<()> {
        loop {
            if self.is_shutdown() {
                info!(source = %self.config.label, "Shutdown requested, exiting connect loop");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            *self.state.write() = ConnectionState::Connecting;
            self.emit(WsEvent::Connecting {
                attempt: self.reconnect_count(),
            })
            .await;

            let outcome = self.try_connect().await;
            self.subscription.clear();

            if self.is_shutdown() {
                info!(source = %self.config.label, "Shutdown requested after disconnect, not reconnecting");
                *self.state.write() = ConnectionState::Disconnected;
                return Ok(());
            }

            let reason = match outcome {
                Ok(()) => {
                    info!(source = %self.config.label, "WebSocket stream ended");
                    "stream ended".to_string()
                }
                Err(e) => {
                    warn!(source = %self.config.label, error = %e, "WebSocket session failed");
                    e.to_string()
                }
            };
            *self.state.write() = ConnectionState::Disconnected;
            self.emit(WsEvent::Disconnected { reason }).await;

            let attempt = {
                let mut count = self.reconnect_count.write();
                *count = count.saturating_add(1);
                *count
            };

            if self.config.max_reconnect_attempts > 0
                && attempt >= self.config.max_reconnect_attempts
            {
                error!(source = %self.config.label, attempt, "Max reconnection attempts reached");
                return Err(WsError::ConnectionFailed(
                    "Max reconnection attempts reached".to_string(),
                ));
            }

            *self.state.write() = ConnectionState::Reconnecting;
            let delay = backoff_delay(
                self.config.reconnect_base_delay_ms,
                self.config.reconnect_max_delay_ms,
                attempt,
            );
            warn!(
                source = %self.config.label,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "Reconnecting"
            );

            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = self.shutdown_token.cancelled() => {
                    info!(source = %self.config.label, "Shutdown requested during backoff, exiting");
                    *self.state.write() = ConnectionState::Disconnected;
                    return Ok(());
                }
            }
        }
    }

    async fn emit(&self, event: WsEvent) {
        if self.event_tx.send(event).await.is_err() {
            debug!(source = %self.config.label, "Event receiver dropped");
        }
    }

    fn next_id(&self) -> u64 {
        self.next_request_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn try_connect(&self) -> WsResult<()> {
        info!(source = %self.config.label, url = %self.config.url, "Connecting to WebSocket");

        let limit = self.config.subscribe_timeout_ms;
        let (mut write, mut read, subscription_id) = tokio::select! {
            () = self.shutdown_token.cancelled() => return Ok(()),
            res = tokio::time::timeout(Duration::from_millis(limit), self.open_and_subscribe()) => {
                match res {
                    Ok(session) => session?,
                    Err(_) => return Err(WsError::SubscribeTimeout(limit)),
                }
            }
        };

        *self.state.write() = ConnectionState::Subscribed;
        *self.reconnect_count.write() = 0;
        self.heartbeat.reset();
        self.emit(WsEvent::Subscribed { subscription_id }).await;

        loop {
            tokio::select! {
                () = self.shutdown_token.cancelled() => {
                    info!(source = %self.config.label, "Shutdown signal received in message loop");
                    self.close_gracefully(&mut write).await;
                    return Ok(());
                }

                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_text_message(&text).await;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            self.heartbeat.record_message();
                            write.send(Message::Pong(data)).await?;
                        }
                        Some(Ok(Message::Pong(_))) => {
                            self.heartbeat.record_pong();
                        }
                        Some(Ok(Message::Close(frame))) => {
                            let err = close_reason(frame, "Normal close");
                            warn!(source = %self.config.label, error = %err, "WebSocket closed by server");
                            return Err(err);
                        }
                        Some(Err(e)) => return Err(e.into()),
                        None => return Ok(()),
                        _ => {}
                    }
                }

                () = self.heartbeat.wait_for_check() => {
                    if self.heartbeat.is_timed_out() {
                        return Err(WsError::HeartbeatTimeout);
                    }
                    if self.heartbeat.should_send_heartbeat() {
                        write.send(Message::Ping(Vec::new())).await?;
                        self.heartbeat.record_ping();
                        debug!(source = %self.config.label, "Sent heartbeat ping");
                    }
                }
            }
        }
    }

    /// Connect and wait for the subscribe acknowledgement.
    async fn open_and_subscribe(&self) -> WsResult<(WsSink, WsSource, String)> {
        let (stream, _response) =
            connect_async_tls_with_config(self.config.url.as_str(), None, true, None).await?;
        let (mut write, mut read) = stream.split();

        let id = self.next_id();
        self.subscription.begin(id);
        let request = RpcRequest::subscribe(id, &self.config.subscription);
        write
            .send(Message::Text(serde_json::to_string(&request)?))
            .await?;
        debug!(
            source = %self.config.label,
            kind = self.config.subscription.name(),
            id,
            "Sent eth_subscribe"
        );

        loop {
            match read.next().await {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<RpcMessage>(&text) {
                    Ok(RpcMessage::Response(resp)) if self.subscription.is_ack(&resp) => {
                        let subscription_id = self.subscription.confirm(resp)?;
                        return Ok((write, read, subscription_id));
                    }
                    Ok(_) => debug!(source = %self.config.label, "Ignoring message before subscribe ack"),
                    Err(e) => debug!(source = %self.config.label, error = %e, "Unparseable message before subscribe ack"),
                },
                Some(Ok(Message::Ping(data))) => write.send(Message::Pong(data)).await?,
                Some(Ok(Message::Close(frame))) => {
                    return Err(close_reason(frame, "Close during subscribe"))
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
                None => {
                    return Err(WsError::ConnectionClosed {
                        code: 1006,
                        reason: "Stream ended during subscribe".to_string(),
                    })
                }
            }
        }
    }

    /// Forward notifications for the active subscription. Anything else is
    /// logged and dropped; a bad frame never ends the session.
    async fn handle_text_message(&self, text: &str) {
        self.heartbeat.record_message();

        match serde_json::from_str::<RpcMessage>(text) {
            Ok(RpcMessage::Notification(note)) if note.is_subscription() => {
                if self.subscription.accept(&note.params) {
                    self.emit(WsEvent::Notification(note.params.result)).await;
                }
            }
            Ok(RpcMessage::Notification(note)) => {
                debug!(source = %self.config.label, method = %note.method, "Ignoring notification");
            }
            Ok(RpcMessage::Response(resp)) => {
                debug!(source = %self.config.label, id = ?resp.id, "Ignoring response");
            }
            Err(e) => {
                warn!(source = %self.config.label, error = %e, "Malformed message discarded");
            }
        }
    }

    async fn close_gracefully(&self, write: &mut WsSink) {
        if let Some(subscription_id) = self.subscription.active_id() {
            let request = RpcRequest::unsubscribe(self.next_id(), &subscription_id);
            if let Ok(text) = serde_json::to_string(&request) {
                if let Err(e) = write.send(Message::Text(text)).await {
                    debug!(source = %self.config.label, error = %e, "Failed to send eth_unsubscribe");
                }
            }
        }
        if let Err(e) = write.send(Message::Close(None)).await {
            warn!(source = %self.config.label, error = %e, "Failed to send Close frame during shutdown");
        }
        *self.state.write() = ConnectionState::Disconnected;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = ConnectionConfig::default();
        assert_eq!(config.max_reconnect_attempts, 0);
        assert_eq!(config.subscription, SubscriptionKind::NewHeads);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        assert_eq!(backoff_delay(1000, 60_000, 1), Duration::from_millis(1000));
        assert_eq!(backoff_delay(1000, 60_000, 2), Duration::from_millis(2000));
        assert_eq!(backoff_delay(1000, 60_000, 3), Duration::from_millis(4000));
        assert_eq!(backoff_delay(1000, 60_000, 7), Duration::from_millis(60_000));
        assert_eq!(backoff_delay(1000, 60_000, u32::MAX), Duration::from_millis(60_000));
    }

    #[test]
    fn test_backoff_is_monotonic() {
        let mut last = Duration::ZERO;
        for attempt in 1..100 {
            let delay = backoff_delay(250, 30_000, attempt);
            assert!(delay >= last);
            last = delay;
        }
    }

    #[test]
    fn test_new_manager_is_disconnected() {
        let (tx, _rx) = mpsc::channel(4);
        let manager = ConnectionManager::new(ConnectionConfig::default(), tx);
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert_eq!(manager.reconnect_count(), 0);
        assert!(!manager.is_shutdown());
        manager.shutdown();
        assert!(manager.is_shutdown());
    }
}
