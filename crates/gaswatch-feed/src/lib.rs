//! Fee ingestion, aggregation and price oracle for gaswatch.
//!
//! - `GasStore`: the single owner of all fee, price and input state
//! - `ChainFeed`: per-chain push/poll ingestion task
//! - `OracleAdapter`: pool-derived quote price with push and poll triggers
//! - `RpcClient`, `FeeSource`, `PoolPriceSource`: upstream access

pub mod error;
pub mod ingest;
pub mod oracle;
pub mod rpc;
pub mod source;
pub mod store;

pub use error::{FeedError, FeedResult};
pub use ingest::{ChainFeed, ChainFeedConfig, FeedState, PushSettings};
pub use oracle::{OracleAdapter, OracleConfig};
pub use rpc::{BlockHeader, LogEntry, RpcClient};
pub use source::{
    decode_swap_sqrt_price, swap_topic, BoxFuture, DynFeeSource, DynPoolSource, FeeSource,
    MockFeeSource, MockPoolSource, PoolPriceSource, RpcFeeSource, RpcPoolSource,
};
pub use store::{GasStore, StoreSnapshot};
