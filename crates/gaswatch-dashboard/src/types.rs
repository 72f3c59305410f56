//! Dashboard API types.
//!
//! JSON shapes served over REST and pushed over the WebSocket.

use chrono::{DateTime, Utc};
use gaswatch_core::{Candle, Chain, Gwei, HistoryPoint, Mode, PriceSource, SimulatedCost};
use gaswatch_feed::FeedState;
use serde::{Deserialize, Serialize};

/// Full snapshot (REST and WebSocket).
#[derive(Debug, Clone, Serialize)]
pub struct DashboardSnapshot {
    /// Unix milliseconds.
    pub timestamp_ms: i64,
    pub mode: Mode,
    pub price: PriceView,
    pub tx_value: f64,
    /// One entry per chain, in `Chain::ALL` order.
    pub chains: Vec<ChainView>,
}

/// One chain's fee state, connection state and cost estimate.
#[derive(Debug, Clone, Serialize)]
pub struct ChainView {
    pub chain: Chain,
    pub feed_state: FeedState,
    pub base_fee: Gwei,
    pub priority_fee: Gwei,
    pub gas_price: Gwei,
    pub last_block: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub gas_limit_override: Option<u64>,
    pub history: Vec<HistoryPoint>,
    pub candles: Vec<Candle>,
    pub cost: SimulatedCost,
}

#[derive(Debug, Clone, Serialize)]
pub struct PriceView {
    pub price: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub source: Option<PriceSource>,
    /// Seconds since the last accepted reading.
    pub age_secs: Option<i64>,
}

/// WebSocket message envelope.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum DashboardMessage {
    /// Sent once right after the upgrade.
    Snapshot(DashboardSnapshot),
    /// Sent every `broadcast_interval_ms`.
    Update(DashboardSnapshot),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TxValueRequest {
    pub value: f64,
}

/// `null` clears the override.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct GasLimitRequest {
    pub value: Option<f64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ModeRequest {
    pub mode: Mode,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct TxValueResponse {
    pub value: f64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct GasLimitResponse {
    pub chain: Chain,
    pub value: Option<u64>,
    pub gas_used: u64,
}

#[derive(Debug, Clone, Copy, Serialize)]
pub struct ModeResponse {
    pub mode: Mode,
}
