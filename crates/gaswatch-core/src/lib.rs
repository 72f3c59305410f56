//! Core domain types for gaswatch.
//!
//! This crate provides the types every other crate speaks:
//! - `Chain`, `PerChain`: the closed set of tracked chains and indexed per-chain storage
//! - `Gwei`: precision-safe fee quantity
//! - `RawFeeReading` → `FeeSample`: fee normalization across fee models
//! - `ChainGasState`: bounded history and 15-minute OHLC candles
//! - `PriceState`: last valid quote price with staleness
//! - `simulate`: pure transaction cost estimate

pub mod chain;
pub mod decimal;
pub mod error;
pub mod fee;
pub mod pool;
pub mod simulation;
pub mod types;

pub use chain::{Chain, FeeModel, PerChain};
pub use decimal::{Gwei, MAX_EXPONENT};
pub use error::{CoreError, Result};
pub use fee::{normalize, FeeSample, RawFeeFields, RawFeeReading};
pub use pool::{price_from_sqrt_x96, PoolOrientation};
pub use simulation::{
    simulate, SimulatedCost, SimulationInputs, DEFAULT_GAS_USED, MAX_GAS_LIMIT,
};
pub use types::{
    bucket_start, ApplyOutcome, Candle, ChainGasState, HistoryPoint, Mode, PriceSource,
    PriceState, CANDLE_CAP, CANDLE_INTERVAL_SECS, HISTORY_CAP,
};
