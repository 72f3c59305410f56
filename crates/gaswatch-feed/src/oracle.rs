//! Pool price oracle.
//!
//! Derives the quote price of the base asset from a pool's `sqrtPriceX96`.
//! Three triggers feed the same validation step:
//! 1. Start-up read of `slot0()`, falling back to the newest Swap log
//! 2. Push: `logs` subscription on the pool's Swap events
//! 3. Poll: `slot0()` every `poll_interval`
//!
//! Nothing here is fatal. A failed or invalid reading is counted and
//! dropped, and the store keeps the last valid price.

use crate::error::{FeedError, FeedResult};
use crate::ingest::{join_push, next_tick, recv_push, spawn_push, PushSettings};
use crate::rpc::LogEntry;
use crate::source::{decode_swap_sqrt_price, swap_topic, DynPoolSource};
use crate::store::GasStore;
use alloy::primitives::U256;
use gaswatch_core::{price_from_sqrt_x96, PoolOrientation, PriceSource};
use gaswatch_telemetry::Metrics;
use gaswatch_ws::{SubscriptionKind, WsEvent};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const LABEL: &str = "oracle";

#[derive(Debug, Clone)]
pub struct OracleConfig {
    pub ws_url: Option<String>,
    pub pool_address: String,
    pub orientation: PoolOrientation,
    pub poll_interval: Duration,
    pub request_timeout: Duration,
    /// Number of block ranges scanned by the start-up backfill.
    pub backfill_chunks: u32,
    pub backfill_chunk_size: u64,
    pub push: PushSettings,
}

enum Step {
    Stop,
    Push(Option<WsEvent>),
    Poll,
}

pub struct OracleAdapter {
    config: OracleConfig,
    source: DynPoolSource,
    store: Arc<GasStore>,
    cancel: CancellationToken,
}

impl OracleAdapter {
    pub fn new(
        config: OracleConfig,
        source: DynPoolSource,
        store: Arc<GasStore>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            source,
            store,
            cancel,
        }
    }

    /// Run until the cancellation token fires.
    pub async fn run(self) {
        info!(pool = %self.config.pool_address, "Oracle adapter started");
        self.initial_read().await;

        let (mut push_rx, push_handle) = match &self.config.ws_url {
            Some(url) => {
                let subscription = SubscriptionKind::Logs {
                    address: self.config.pool_address.clone(),
                    topics: vec![swap_topic()],
                };
                let config = self.config.push.connection_config(url.clone(), LABEL, subscription);
                let (rx, handle) = spawn_push(config, self.cancel.child_token());
                (Some(rx), Some(handle))
            }
            None => (None, None),
        };

        let mut ticker: Option<Interval> = Some({
            let period = self.config.poll_interval;
            let mut t = tokio::time::interval_at(Instant::now() + period, period);
            t.set_missed_tick_behavior(MissedTickBehavior::Delay);
            t
        });
        let mut subscribed = false;

        loop {
            let step = tokio::select! {
                biased;
                () = self.cancel.cancelled() => Step::Stop,
                event = recv_push(&mut push_rx) => Step::Push(event),
                () = next_tick(&mut ticker) => Step::Poll,
            };

            match step {
                Step::Stop => break,
                Step::Poll => match self.bounded(self.source.current_sqrt_price(), 1).await {
                    Some(Ok(sqrt)) => {
                        self.apply(sqrt, PriceSource::Poll);
                    }
                    Some(Err(e)) => self.discard("fetch", &e),
                    None => break,
                },
                Step::Push(None) => {
                    warn!(source = LABEL, "Push channel closed, relying on polling");
                    push_rx = None;
                }
                Step::Push(Some(event)) => match event {
                    WsEvent::Connecting { attempt } => {
                        debug!(source = LABEL, attempt, "Swap subscription connecting");
                    }
                    WsEvent::Subscribed { subscription_id } => {
                        info!(source = LABEL, %subscription_id, "Swap subscription active");
                        subscribed = true;
                    }
                    WsEvent::Disconnected { reason } => {
                        if subscribed {
                            Metrics::ws_reconnect(LABEL);
                        }
                        subscribed = false;
                        warn!(source = LABEL, %reason, "Swap subscription lost");
                    }
                    WsEvent::Notification(payload) => {
                        match LogEntry::from_json(&payload)
                            .and_then(|log| decode_swap_sqrt_price(&log))
                        {
                            Ok(sqrt) => {
                                self.apply(sqrt, PriceSource::Push);
                            }
                            Err(e) => self.discard("malformed", &e),
                        }
                    }
                },
            }
        }

        join_push(push_handle, LABEL).await;
        info!("Oracle adapter stopped");
    }

    /// Start-up read: `slot0`, else the newest Swap log.
    async fn initial_read(&self) {
        match self.bounded(self.source.current_sqrt_price(), 1).await {
            Some(Ok(sqrt)) => {
                if self.apply(sqrt, PriceSource::Initial) {
                    return;
                }
            }
            Some(Err(e)) => self.discard("fetch", &e),
            None => return,
        }

        info!(
            chunks = self.config.backfill_chunks,
            chunk_size = self.config.backfill_chunk_size,
            "Initial price unavailable, scanning recent swaps"
        );
        // One request per chunk plus the block number lookup.
        let calls = self.config.backfill_chunks.saturating_add(1);
        let scan = self
            .source
            .latest_swap_sqrt_price(self.config.backfill_chunks, self.config.backfill_chunk_size);
        match self.bounded(scan, calls).await {
            Some(Ok(Some(sqrt))) => {
                self.apply(sqrt, PriceSource::Backfill);
            }
            Some(Ok(None)) => warn!("No recent swaps found, price unknown until next reading"),
            Some(Err(e)) => self.discard("fetch", &e),
            None => {}
        }
    }

    /// Await `fut` under `calls × request_timeout`. `None` on cancellation.
    async fn bounded<T>(
        &self,
        fut: impl Future<Output = FeedResult<T>>,
        calls: u32,
    ) -> Option<FeedResult<T>> {
        let limit = self.config.request_timeout.saturating_mul(calls.max(1));
        tokio::select! {
            biased;
            () = self.cancel.cancelled() => None,
            res = tokio::time::timeout(limit, fut) => Some(
                res.unwrap_or_else(|_| Err(FeedError::Timeout(limit.as_millis() as u64)))
            ),
        }
    }

    /// Validate and submit one reading. Returns whether it was accepted.
    fn apply(&self, sqrt_price_x96: U256, source: PriceSource) -> bool {
        if self.cancel.is_cancelled() {
            debug!(source = source.as_str(), "Discarding price read during teardown");
            return false;
        }
        let Some(price) = price_from_sqrt_x96(sqrt_price_x96, self.config.orientation) else {
            self.discard(
                "invalid",
                &FeedError::Malformed(format!("sqrtPriceX96 {sqrt_price_x96} has no price")),
            );
            return false;
        };
        if !self.store.set_price(price, source) {
            if !self.store.is_sealed() {
                self.discard("invalid", &FeedError::Malformed(format!("price {price} rejected")));
            }
            return false;
        }

        Metrics::oracle_update(source.as_str(), price);
        debug!(price, source = source.as_str(), "Price updated");
        true
    }

    fn discard(&self, reason: &str, error: &FeedError) {
        Metrics::oracle_discarded(reason);
        warn!(source = LABEL, reason, error = %error, "Oracle reading discarded");
    }
}
