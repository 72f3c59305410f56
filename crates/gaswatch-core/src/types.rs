//! Per-chain fee state: bounded history and time-bucketed candles.
//!
//! `ChainGasState::apply_sample` is the whole aggregation step for one
//! sample. It is a plain `&mut self` method; the feed crate wraps it in a
//! lock so that callers only ever observe the state before or after a
//! complete step.

use crate::decimal::Gwei;
use crate::error::{CoreError, Result};
use crate::fee::FeeSample;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Maximum history points kept per chain.
pub const HISTORY_CAP: usize = 60;

/// Maximum candles kept per chain.
pub const CANDLE_CAP: usize = 100;

/// Candle bucket width (15 minutes).
pub const CANDLE_INTERVAL_SECS: i64 = 15 * 60;

/// Floor a Unix timestamp (seconds) to its candle bucket.
#[inline]
pub fn bucket_start(unix_secs: i64) -> i64 {
    unix_secs.div_euclid(CANDLE_INTERVAL_SECS) * CANDLE_INTERVAL_SECS
}

/// One entry of the recent-history buffer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryPoint {
    pub timestamp: DateTime<Utc>,
    pub base_fee: Gwei,
    pub priority_fee: Gwei,
    pub effective_gas_price: Gwei,
}

/// OHLC aggregate of the gas price over one bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    /// Bucket start, Unix seconds, multiple of `CANDLE_INTERVAL_SECS`.
    pub bucket_start: i64,
    pub open: Gwei,
    pub high: Gwei,
    pub low: Gwei,
    pub close: Gwei,
}

impl Candle {
    /// Open a candle with a single price.
    pub fn new(bucket_start: i64, price: Gwei) -> Self {
        Self {
            bucket_start,
            open: price,
            high: price,
            low: price,
            close: price,
        }
    }

    /// Fold a price into this candle. `open` never changes.
    pub fn update(&mut self, price: Gwei) {
        self.high = self.high.max(price);
        self.low = self.low.min(price);
        self.close = price;
    }

    /// Whether the bucket start is aligned to the candle interval.
    pub fn is_aligned(&self) -> bool {
        self.bucket_start.rem_euclid(CANDLE_INTERVAL_SECS) == 0
    }
}

/// Result of submitting a sample.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// Sample applied.
    Applied,
    /// Sample belongs to a block that was already applied.
    Duplicate,
    /// Store no longer accepts updates (teardown in progress).
    Sealed,
}

/// Current fee state for one chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainGasState {
    pub base_fee: Gwei,
    pub priority_fee: Gwei,
    pub gas_price: Gwei,
    /// Oldest first, at most `HISTORY_CAP` entries.
    pub history: VecDeque<HistoryPoint>,
    /// Oldest first, at most `CANDLE_CAP` entries. Only the last is open.
    pub candles: VecDeque<Candle>,
    /// Highest block number applied, used to drop replayed blocks.
    pub last_block: Option<u64>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ChainGasState {
    /// Apply one sample: history append, candle upsert, scalar replace.
    pub fn apply_sample(&mut self, sample: &FeeSample) -> ApplyOutcome {
        if let (Some(block), Some(last)) = (sample.block_number, self.last_block) {
            if block <= last {
                return ApplyOutcome::Duplicate;
            }
        }

        // Timestamps never go backwards within a chain.
        let timestamp = match self.history.back() {
            Some(last) if last.timestamp > sample.observed_at => last.timestamp,
            _ => sample.observed_at,
        };

        self.history.push_back(HistoryPoint {
            timestamp,
            base_fee: sample.base_fee,
            priority_fee: sample.priority_fee,
            effective_gas_price: sample.gas_price,
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        let mut bucket = bucket_start(timestamp.timestamp());
        match self.candles.back_mut() {
            Some(open) if open.bucket_start >= bucket => {
                // Same bucket, or a bucket rebuilt ahead of local time by
                // overwrite_candles: fold into the open candle.
                bucket = open.bucket_start;
                open.update(sample.gas_price);
            }
            _ => {
                self.candles.push_back(Candle::new(bucket, sample.gas_price));
                while self.candles.len() > CANDLE_CAP {
                    self.candles.pop_front();
                }
            }
        }
        debug_assert!(self.candles.back().map(|c| c.bucket_start) == Some(bucket));

        self.base_fee = sample.base_fee;
        self.priority_fee = sample.priority_fee;
        self.gas_price = sample.gas_price;
        if sample.block_number.is_some() {
            self.last_block = sample.block_number;
        }
        self.updated_at = Some(timestamp);

        ApplyOutcome::Applied
    }

    /// Replace the candle sequence wholesale.
    ///
    /// Candles must be bucket-aligned with strictly increasing starts. Only
    /// the newest `CANDLE_CAP` are kept. On error the state is untouched.
    pub fn replace_candles(&mut self, candles: Vec<Candle>) -> Result<()> {
        if let Some(bad) = candles.iter().find(|c| !c.is_aligned()) {
            return Err(CoreError::InvalidCandles(format!(
                "bucket {} is not aligned to {CANDLE_INTERVAL_SECS}s",
                bad.bucket_start
            )));
        }
        if let Some(pair) = candles
            .windows(2)
            .find(|w| w[0].bucket_start >= w[1].bucket_start)
        {
            return Err(CoreError::InvalidCandles(format!(
                "bucket {} does not follow {}",
                pair[1].bucket_start, pair[0].bucket_start
            )));
        }

        let skip = candles.len().saturating_sub(CANDLE_CAP);
        self.candles = candles.into_iter().skip(skip).collect();
        Ok(())
    }

    /// Enforce the caps and orderings on state loaded from elsewhere.
    pub fn sanitize(&mut self) {
        let mut last_ts: Option<DateTime<Utc>> = None;
        self.history.retain(|p| {
            let keep = last_ts.map_or(true, |t| p.timestamp >= t);
            if keep {
                last_ts = Some(p.timestamp);
            }
            keep
        });
        while self.history.len() > HISTORY_CAP {
            self.history.pop_front();
        }

        let mut last_bucket: Option<i64> = None;
        self.candles.retain(|c| {
            let keep = c.is_aligned() && last_bucket.map_or(true, |b| c.bucket_start > b);
            if keep {
                last_bucket = Some(c.bucket_start);
            }
            keep
        });
        while self.candles.len() > CANDLE_CAP {
            self.candles.pop_front();
        }
    }
}

/// Process-wide display mode.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Live,
    Simulation,
}

/// Which oracle trigger produced a price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PriceSource {
    Initial,
    Push,
    Poll,
    Backfill,
}

impl PriceSource {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initial => "initial",
            Self::Push => "push",
            Self::Poll => "poll",
            Self::Backfill => "backfill",
        }
    }
}

/// External asset price in quote-currency units.
///
/// `price` is `None` until the first valid reading. Invalid readings never
/// overwrite it, so the last valid value is always retained and its age
/// stays observable through `updated_at`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct PriceState {
    pub price: Option<f64>,
    pub updated_at: Option<DateTime<Utc>>,
    pub source: Option<PriceSource>,
}

impl PriceState {
    /// Whether a reading passes validation (finite and strictly positive).
    #[inline]
    pub fn is_valid_reading(value: f64) -> bool {
        value.is_finite() && value > 0.0
    }

    /// Accept `value` if valid. Returns whether the state changed.
    pub fn accept(&mut self, value: f64, source: PriceSource, at: DateTime<Utc>) -> bool {
        if !Self::is_valid_reading(value) {
            return false;
        }
        self.price = Some(value);
        self.updated_at = Some(at);
        self.source = Some(source);
        true
    }

    /// Time since the last accepted reading.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.updated_at.map(|t| now - t)
    }
}
