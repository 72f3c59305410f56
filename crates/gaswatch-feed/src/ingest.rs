//! Per-chain fee ingestion.
//!
//! One `ChainFeed` per chain. It prefers a `newHeads` push subscription and
//! starts a fixed-interval poll ticker as soon as push is rejected, times
//! out or drops. The ticker then keeps running on its own; push is retried
//! in the background with backoff and its state machine stays visible.
//! Duplicate blocks from both paths are dropped by the store.
//!
//! State machine (the push connection; polling runs beside it):
//! ```text
//! Disconnected → Connecting → Subscribed
//!       ↑            ↓            │ (error / timeout / close)
//!       │         Polling         │
//!       └─────────────────────────┘
//! ```
//! `Polling` means the last push attempt never got a subscription.

use crate::error::FeedError;
use crate::rpc::BlockHeader;
use crate::source::DynFeeSource;
use crate::store::GasStore;
use gaswatch_core::{normalize, ApplyOutcome, Chain};
use gaswatch_telemetry::Metrics;
use gaswatch_ws::{ConnectionConfig, ConnectionManager, SubscriptionKind, WsEvent};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Grace period for the push connection to close after cancellation.
const PUSH_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// Connection state of one chain feed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedState {
    #[default]
    Disconnected,
    Connecting,
    Subscribed,
    Polling,
}

impl FeedState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Polling => "polling",
        }
    }
}

impl fmt::Display for FeedState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Push connection tuning shared by chain feeds and the oracle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushSettings {
    pub subscribe_timeout_ms: u64,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    pub heartbeat_interval_ms: u64,
    pub heartbeat_timeout_ms: u64,
}

impl Default for PushSettings {
    fn default() -> Self {
        let ws = ConnectionConfig::default();
        Self {
            subscribe_timeout_ms: ws.subscribe_timeout_ms,
            reconnect_base_delay_ms: ws.reconnect_base_delay_ms,
            reconnect_max_delay_ms: ws.reconnect_max_delay_ms,
            heartbeat_interval_ms: ws.heartbeat_interval_ms,
            heartbeat_timeout_ms: ws.heartbeat_timeout_ms,
        }
    }
}

impl PushSettings {
    /// Connection config that retries forever.
    pub fn connection_config(
        &self,
        url: impl Into<String>,
        label: impl Into<String>,
        subscription: SubscriptionKind,
    ) -> ConnectionConfig {
        ConnectionConfig {
            url: url.into(),
            label: label.into(),
            subscription,
            max_reconnect_attempts: 0,
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.reconnect_max_delay_ms,
            subscribe_timeout_ms: self.subscribe_timeout_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
        }
    }
}

/// Spawn a push connection whose events arrive on the returned receiver.
pub(crate) fn spawn_push(
    config: ConnectionConfig,
    cancel: CancellationToken,
) -> (mpsc::Receiver<WsEvent>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(256);
    let label = config.label.clone();
    let manager = ConnectionManager::new(config, tx).with_shutdown_token(cancel);
    let handle = tokio::spawn(async move {
        if let Err(e) = manager.run().await {
            warn!(source = %label, error = %e, "Push connection gave up");
        }
    });
    (rx, handle)
}

pub(crate) async fn recv_push(rx: &mut Option<mpsc::Receiver<WsEvent>>) -> Option<WsEvent> {
    match rx {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

pub(crate) async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            t.tick().await;
        }
        None => std::future::pending().await,
    }
}

pub(crate) fn poll_ticker(period: Duration) -> Interval {
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

pub(crate) async fn join_push(handle: Option<JoinHandle<()>>, label: &str) {
    if let Some(handle) = handle {
        if tokio::time::timeout(PUSH_SHUTDOWN_GRACE, handle).await.is_err() {
            warn!(source = %label, "Push connection did not stop in time");
        }
    }
}

/// Settings for one chain feed.
#[derive(Debug, Clone)]
pub struct ChainFeedConfig {
    pub chain: Chain,
    /// Push endpoint. `None` means poll only.
    pub ws_url: Option<String>,
    pub poll_interval: Duration,
    /// Upper bound on one fee fetch.
    pub request_timeout: Duration,
    /// Decimal exponent that turns raw units into gwei-equivalent units.
    pub exponent: u32,
    pub push: PushSettings,
}

enum Step {
    Stop,
    Push(Option<WsEvent>),
    Poll,
}

/// Ingestion task for one chain.
pub struct ChainFeed {
    config: ChainFeedConfig,
    source: DynFeeSource,
    store: Arc<GasStore>,
    cancel: CancellationToken,
    state_tx: watch::Sender<FeedState>,
}

impl ChainFeed {
    pub fn new(
        config: ChainFeedConfig,
        source: DynFeeSource,
        store: Arc<GasStore>,
        cancel: CancellationToken,
    ) -> Self {
        let (state_tx, _) = watch::channel(FeedState::Disconnected);
        Self {
            config,
            source,
            store,
            cancel,
            state_tx,
        }
    }

    pub fn chain(&self) -> Chain {
        self.config.chain
    }

    /// Subscribe to state changes.
    pub fn state(&self) -> watch::Receiver<FeedState> {
        self.state_tx.subscribe()
    }

    fn set_state(&self, next: FeedState) {
        let changed = self.state_tx.send_if_modified(|state| {
            if *state == next {
                false
            } else {
                *state = next;
                true
            }
        });
        if changed {
            debug!(chain = %self.config.chain, state = %next, "Feed state changed");
            Metrics::feed_state_set(self.config.chain.as_str(), next.as_str());
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(self) {
        let chain = self.config.chain;
        let label = chain.as_str().to_string();
        self.set_state(FeedState::Disconnected);

        let mut ticker: Option<Interval> = None;
        let (mut push_rx, push_handle) = match &self.config.ws_url {
            Some(url) => {
                let config = self.config.push.connection_config(
                    url.clone(),
                    label.clone(),
                    SubscriptionKind::NewHeads,
                );
                let (rx, handle) = spawn_push(config, self.cancel.child_token());
                (Some(rx), Some(handle))
            }
            None => {
                info!(%chain, "No push endpoint, polling only");
                (None, None)
            }
        };
        if push_rx.is_none() {
            self.set_state(FeedState::Connecting);
            self.start_polling(&mut ticker);
        }

        info!(
            %chain,
            poll_interval_ms = self.config.poll_interval.as_millis() as u64,
            "Chain feed started"
        );

        loop {
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Stop,
                event = recv_push(&mut push_rx) => Step::Push(event),
                () = next_tick(&mut ticker) => Step::Poll,
            };

            match step {
                Step::Stop => break,
                Step::Poll => self.tick(None).await,
                Step::Push(None) => {
                    warn!(%chain, "Push channel closed, continuing with polling");
                    push_rx = None;
                    self.start_polling(&mut ticker);
                }
                Step::Push(Some(event)) => self.on_push_event(event, &mut ticker).await,
            }
        }

        info!(%chain, "Chain feed stopping");
        join_push(push_handle, &label).await;
        self.set_state(FeedState::Disconnected);
    }

    /// Start the poll ticker (once) and report push as unavailable.
    fn start_polling(&self, ticker: &mut Option<Interval>) {
        self.ensure_ticker(ticker);
        self.set_state(FeedState::Polling);
    }

    fn ensure_ticker(&self, ticker: &mut Option<Interval>) {
        if ticker.is_none() {
            info!(chain = %self.config.chain, "Polling activated");
            *ticker = Some(poll_ticker(self.config.poll_interval));
        }
    }

    async fn on_push_event(&self, event: WsEvent, ticker: &mut Option<Interval>) {
        let chain = self.config.chain;
        match event {
            WsEvent::Connecting { attempt } => {
                debug!(%chain, attempt, polling = ticker.is_some(), "Push connecting");
                self.set_state(FeedState::Connecting);
            }
            WsEvent::Subscribed { subscription_id } => {
                info!(%chain, %subscription_id, "Push subscription active");
                self.set_state(FeedState::Subscribed);
            }
            WsEvent::Disconnected { reason } => {
                let was_subscribed = *self.state_tx.borrow() == FeedState::Subscribed;
                if was_subscribed {
                    Metrics::ws_reconnect(chain.as_str());
                    warn!(%chain, %reason, "Push subscription lost, polling until it returns");
                    self.ensure_ticker(ticker);
                    self.set_state(FeedState::Disconnected);
                } else {
                    warn!(%chain, %reason, "Push unavailable, falling back to polling");
                    self.start_polling(ticker);
                }
            }
            WsEvent::Notification(payload) => match BlockHeader::from_json(&payload) {
                Ok(head) => {
                    debug!(%chain, block = head.number, "New head");
                    self.tick(Some(head)).await;
                }
                Err(e) => {
                    Metrics::fetch_failure(chain.as_str(), e.kind());
                    warn!(%chain, error = %e, "Discarding malformed head");
                }
            },
        }
    }

    /// Fetch, normalize and submit one sample. Failures skip the tick.
    async fn tick(&self, head: Option<BlockHeader>) {
        let chain = self.config.chain;
        let started = Instant::now();
        let fetch = tokio::time::timeout(
            self.config.request_timeout,
            self.source.fetch_reading(head),
        );

        let result = tokio::select! {
            biased;
            () = self.cancel.cancelled() => {
                debug!(%chain, "Fetch abandoned at teardown");
                return;
            }
            res = fetch => res,
        };

        let reading = match result {
            Ok(Ok(reading)) => reading,
            Ok(Err(e)) => return self.skip(e),
            Err(_) => {
                return self.skip(FeedError::Timeout(
                    self.config.request_timeout.as_millis() as u64,
                ))
            }
        };
        Metrics::fetch_latency(chain.as_str(), started.elapsed().as_secs_f64() * 1000.0);

        if reading.chain != chain {
            return self.skip(FeedError::Malformed(format!(
                "reading for {} delivered to {chain}",
                reading.chain
            )));
        }
        let sample = match normalize(&reading, self.config.exponent) {
            Ok(sample) => sample,
            Err(e) => return self.skip(e.into()),
        };

        if self.cancel.is_cancelled() {
            debug!(%chain, "Discarding sample fetched during teardown");
            return;
        }

        match self.store.update_chain_data(&sample) {
            ApplyOutcome::Applied => {
                Metrics::sample_applied(chain.as_str(), sample.gas_price.to_f64());
                debug!(
                    %chain,
                    block = ?sample.block_number,
                    gas_price = %sample.gas_price,
                    "Sample applied"
                );
            }
            ApplyOutcome::Duplicate => {
                Metrics::sample_duplicate(chain.as_str());
                debug!(%chain, block = ?sample.block_number, "Block already applied");
            }
            ApplyOutcome::Sealed => {
                debug!(%chain, "Store sealed, sample discarded");
            }
        }
    }

    fn skip(&self, error: FeedError) {
        let chain = self.config.chain;
        Metrics::fetch_failure(chain.as_str(), error.kind());
        warn!(%chain, error = %error, "Fee fetch failed, tick skipped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::MockFeeSource;

    fn config(chain: Chain) -> ChainFeedConfig {
        ChainFeedConfig {
            chain,
            ws_url: None,
            poll_interval: Duration::from_millis(20),
            request_timeout: Duration::from_millis(500),
            exponent: 9,
            push: PushSettings::default(),
        }
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !cond() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached");
    }

    #[test]
    fn test_feed_state_labels_match_metrics() {
        let states = [
            FeedState::Disconnected,
            FeedState::Connecting,
            FeedState::Subscribed,
            FeedState::Polling,
        ];
        let labels: Vec<&str> = states.iter().map(|s| s.as_str()).collect();
        assert_eq!(labels, gaswatch_telemetry::metrics::FEED_STATES.to_vec());
    }

    #[tokio::test]
    async fn test_polling_applies_samples_and_skips_failures() {
        let source = Arc::new(MockFeeSource::new(Chain::Polygon));
        source.push_fee_market(1, 30_000_000_000, 1_500_000_000);
        source.push_error(FeedError::Timeout(10));
        source.push_fee_market(2, 31_000_000_000, 1_500_000_000);
        // Same block again, as a second path would deliver it.
        source.push_fee_market(2, 31_000_000_000, 1_500_000_000);

        let store = Arc::new(GasStore::new());
        let cancel = CancellationToken::new();
        let feed = ChainFeed::new(
            config(Chain::Polygon),
            source.clone(),
            store.clone(),
            cancel.clone(),
        );
        let mut state = feed.state();
        let handle = tokio::spawn(feed.run());

        wait_for(|| source.pending() == 0 && source.calls() >= 4).await;
        assert_eq!(*state.borrow_and_update(), FeedState::Polling);

        cancel.cancel();
        handle.await.unwrap();

        let polygon = store.chain_state(Chain::Polygon);
        assert_eq!(polygon.history.len(), 2);
        assert_eq!(polygon.last_block, Some(2));
        assert_eq!(polygon.gas_price.to_string(), "32.5");
        assert!(store.chain_state(Chain::Ethereum).history.is_empty());
        assert_eq!(*state.borrow(), FeedState::Disconnected);
    }

    #[tokio::test]
    async fn test_fetch_timeout_skips_tick() {
        let source = Arc::new(MockFeeSource::new(Chain::Ethereum).with_delay(Duration::from_millis(200)));
        source.push_flat(1, 10_000_000_000);

        let store = Arc::new(GasStore::new());
        let cancel = CancellationToken::new();
        let feed = ChainFeed::new(
            ChainFeedConfig {
                request_timeout: Duration::from_millis(30),
                ..config(Chain::Ethereum)
            },
            source.clone(),
            store.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(feed.run());

        wait_for(|| source.calls() >= 2).await;
        cancel.cancel();
        handle.await.unwrap();
        assert!(store.chain_state(Chain::Ethereum).history.is_empty());
    }

    #[tokio::test]
    async fn test_in_flight_fetch_discarded_on_teardown() {
        let source = Arc::new(MockFeeSource::new(Chain::Arbitrum).with_delay(Duration::from_millis(300)));
        source.push_flat(1, 100_000_000);

        let store = Arc::new(GasStore::new());
        let cancel = CancellationToken::new();
        let feed = ChainFeed::new(
            ChainFeedConfig {
                request_timeout: Duration::from_secs(2),
                ..config(Chain::Arbitrum)
            },
            source.clone(),
            store.clone(),
            cancel.clone(),
        );
        let handle = tokio::spawn(feed.run());

        wait_for(|| source.calls() >= 1).await;
        store.seal();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("feed did not stop promptly")
            .unwrap();

        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(store.chain_state(Chain::Arbitrum).history.is_empty());
    }

    #[tokio::test]
    async fn test_mismatched_chain_reading_is_discarded() {
        let source = Arc::new(MockFeeSource::new(Chain::Ethereum));
        source.push_flat(1, 10_000_000_000);

        let store = Arc::new(GasStore::new());
        let cancel = CancellationToken::new();
        let feed = ChainFeed::new(config(Chain::Polygon), source.clone(), store.clone(), cancel.clone());
        let handle = tokio::spawn(feed.run());

        wait_for(|| source.calls() >= 2).await;
        cancel.cancel();
        handle.await.unwrap();

        for chain in Chain::ALL {
            assert!(store.chain_state(chain).history.is_empty());
        }
    }
}
