//! Upstream data source traits.
//!
//! The ingestion and oracle tasks talk to chains only through these traits:
//! - Dependency injection for tests (`MockFeeSource`, `MockPoolSource`)
//! - Separation of transport from aggregation
//!
//! `RpcFeeSource` and `RpcPoolSource` are the production implementations over
//! HTTP JSON-RPC.

use crate::error::{FeedError, FeedResult};
use crate::rpc::{BlockHeader, LogEntry, RpcClient};
use alloy::primitives::U256;
use alloy::sol;
use alloy::sol_types::{SolCall, SolEvent};
use chrono::Utc;
use gaswatch_core::{Chain, FeeModel, RawFeeFields, RawFeeReading};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Boxed future for dyn-compatible async trait methods.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

sol! {
    function slot0() external view returns (
        uint160 sqrtPriceX96,
        int24 tick,
        uint16 observationIndex,
        uint16 observationCardinality,
        uint16 observationCardinalityNext,
        uint8 feeProtocol,
        bool unlocked
    );

    event Swap(
        address indexed sender,
        address indexed recipient,
        int256 amount0,
        int256 amount1,
        uint160 sqrtPriceX96,
        uint128 liquidity,
        int24 tick
    );
}

/// Topic0 of the pool `Swap` event, lowercase hex with `0x`.
pub fn swap_topic() -> String {
    format!("0x{}", hex::encode(Swap::SIGNATURE_HASH))
}

/// Extract `sqrtPriceX96` from a `Swap` log.
///
/// The topic list must match the event, with a valid signature hash.
pub fn decode_swap_sqrt_price(log: &LogEntry) -> FeedResult<U256> {
    if log.removed {
        return Err(FeedError::Malformed("swap log was removed by a reorg".to_string()));
    }
    let swap = Swap::decode_raw_log(log.topics.iter().copied(), &log.data, true)
        .map_err(|e| FeedError::Malformed(format!("undecodable Swap log: {e}")))?;
    Ok(U256::from(swap.sqrtPriceX96))
}

/// Extract `sqrtPriceX96` from a `slot0()` return value.
pub fn decode_slot0_sqrt_price(data: &[u8]) -> FeedResult<U256> {
    let slot0 = slot0Call::abi_decode_returns(data, true)
        .map_err(|e| FeedError::Malformed(format!("undecodable slot0 result: {e}")))?;
    Ok(U256::from(slot0.sqrtPriceX96))
}

// ============================================================================
// Fee source
// ============================================================================

/// Fetches raw fee readings for one chain.
pub trait FeeSource: Send + Sync {
    /// Fetch the current fee components.
    ///
    /// `head` is the block header delivered by a push notification, when
    /// there is one; otherwise the source reads the latest block itself.
    fn fetch_reading(&self, head: Option<BlockHeader>) -> BoxFuture<'_, FeedResult<RawFeeReading>>;
}

/// Arc wrapper for FeeSource trait objects.
pub type DynFeeSource = Arc<dyn FeeSource>;

/// Fee source over HTTP JSON-RPC.
pub struct RpcFeeSource {
    chain: Chain,
    fee_model: FeeModel,
    client: RpcClient,
}

impl RpcFeeSource {
    pub fn new(chain: Chain, fee_model: FeeModel, client: RpcClient) -> Self {
        Self {
            chain,
            fee_model,
            client,
        }
    }

    async fn read(&self, head: Option<BlockHeader>) -> FeedResult<RawFeeReading> {
        let header = match head {
            Some(h) => h,
            None => self.client.latest_block().await?,
        };

        let fields = match self.fee_model {
            FeeModel::FeeMarket => {
                let base_fee = header.base_fee_per_gas.ok_or_else(|| {
                    FeedError::Malformed(format!("block {} has no base fee", header.number))
                })?;
                // An endpoint without the tip method answers with an RPC
                // error. Its legacy gas price (base + suggested tip) then
                // serves as the fee cap; without either the tip is zero.
                match self.client.max_priority_fee_per_gas().await {
                    Ok(tip) => RawFeeFields::FeeMarket {
                        base_fee,
                        fee_cap: None,
                        priority_fee: Some(tip),
                    },
                    Err(FeedError::Rpc { code, message }) => {
                        debug!(chain = %self.chain, code, %message, "Priority fee query unsupported");
                        let fee_cap = match self.client.gas_price().await {
                            Ok(cap) => Some(cap),
                            Err(FeedError::Rpc { .. }) => None,
                            Err(e) => return Err(e),
                        };
                        RawFeeFields::FeeMarket {
                            base_fee,
                            fee_cap,
                            priority_fee: None,
                        }
                    }
                    Err(e) => return Err(e),
                }
            }
            FeeModel::Flat => RawFeeFields::Flat {
                gas_price: self.client.gas_price().await?,
            },
        };

        Ok(RawFeeReading {
            chain: self.chain,
            block_number: Some(header.number),
            observed_at: Utc::now(),
            fields,
        })
    }
}

impl FeeSource for RpcFeeSource {
    fn fetch_reading(&self, head: Option<BlockHeader>) -> BoxFuture<'_, FeedResult<RawFeeReading>> {
        Box::pin(self.read(head))
    }
}

/// Scripted fee source for tests.
///
/// Pops one queued result per call; when the queue is empty it answers with
/// an RPC error. Calls are counted.
#[derive(Debug)]
pub struct MockFeeSource {
    chain: Chain,
    queue: Mutex<VecDeque<FeedResult<RawFeeReading>>>,
    calls: AtomicUsize,
    heads: Mutex<Vec<Option<u64>>>,
    delay: Duration,
}

impl MockFeeSource {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            queue: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            heads: Mutex::new(Vec::new()),
            delay: Duration::ZERO,
        }
    }

    /// Answer every call only after `delay`.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queue a fee-market reading (raw wei).
    pub fn push_fee_market(&self, block: u64, base_fee: u128, priority_fee: u128) {
        self.queue.lock().push_back(Ok(RawFeeReading {
            chain: self.chain,
            block_number: Some(block),
            observed_at: Utc::now(),
            fields: RawFeeFields::FeeMarket {
                base_fee,
                fee_cap: None,
                priority_fee: Some(priority_fee),
            },
        }));
    }

    /// Queue a flat gas price reading (raw wei).
    pub fn push_flat(&self, block: u64, gas_price: u128) {
        self.queue.lock().push_back(Ok(RawFeeReading {
            chain: self.chain,
            block_number: Some(block),
            observed_at: Utc::now(),
            fields: RawFeeFields::Flat { gas_price },
        }));
    }

    pub fn push_error(&self, error: FeedError) {
        self.queue.lock().push_back(Err(error));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Block numbers of the push heads passed in, per call.
    pub fn heads(&self) -> Vec<Option<u64>> {
        self.heads.lock().clone()
    }

    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }
}

impl FeeSource for MockFeeSource {
    fn fetch_reading(&self, head: Option<BlockHeader>) -> BoxFuture<'_, FeedResult<RawFeeReading>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.heads.lock().push(head.map(|h| h.number));
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.queue.lock().pop_front().unwrap_or(Err(FeedError::Rpc {
                code: -32000,
                message: "no scripted reading".to_string(),
            }))
        })
    }
}

// ============================================================================
// Pool price source
// ============================================================================

/// Reads a pool's raw sqrt price.
pub trait PoolPriceSource: Send + Sync {
    /// Current `sqrtPriceX96` from `slot0()`.
    fn current_sqrt_price(&self) -> BoxFuture<'_, FeedResult<U256>>;

    /// `sqrtPriceX96` of the newest Swap log within the last
    /// `chunks × chunk_size` blocks, scanning newest chunk first.
    fn latest_swap_sqrt_price(
        &self,
        chunks: u32,
        chunk_size: u64,
    ) -> BoxFuture<'_, FeedResult<Option<U256>>>;
}

/// Arc wrapper for PoolPriceSource trait objects.
pub type DynPoolSource = Arc<dyn PoolPriceSource>;

/// Pool price source over HTTP JSON-RPC.
pub struct RpcPoolSource {
    pool_address: String,
    client: RpcClient,
}

impl RpcPoolSource {
    pub fn new(pool_address: impl Into<String>, client: RpcClient) -> Self {
        Self {
            pool_address: pool_address.into(),
            client,
        }
    }

    async fn slot0(&self) -> FeedResult<U256> {
        let data = self
            .client
            .call_contract(&self.pool_address, &slot0Call::SELECTOR)
            .await?;
        decode_slot0_sqrt_price(&data)
    }

    async fn scan_logs(&self, chunks: u32, chunk_size: u64) -> FeedResult<Option<U256>> {
        let latest = self.client.block_number().await?;
        let topics = vec![swap_topic()];
        let span = chunk_size.max(1);

        for i in 0..u64::from(chunks) {
            let Some(to_block) = latest.checked_sub(i * span) else {
                break;
            };
            let from_block = to_block.saturating_sub(span - 1);

            let logs = match self
                .client
                .get_logs(&self.pool_address, &topics, from_block, to_block)
                .await
            {
                Ok(logs) => logs,
                Err(e) => {
                    warn!(from_block, to_block, error = %e, "Swap log chunk fetch failed");
                    continue;
                }
            };

            // Newest valid log in the newest non-empty chunk wins.
            for log in logs.iter().rev() {
                match decode_swap_sqrt_price(log) {
                    Ok(sqrt) => return Ok(Some(sqrt)),
                    Err(e) => debug!(error = %e, "Skipping undecodable swap log"),
                }
            }
        }
        Ok(None)
    }
}

impl PoolPriceSource for RpcPoolSource {
    fn current_sqrt_price(&self) -> BoxFuture<'_, FeedResult<U256>> {
        Box::pin(self.slot0())
    }

    fn latest_swap_sqrt_price(
        &self,
        chunks: u32,
        chunk_size: u64,
    ) -> BoxFuture<'_, FeedResult<Option<U256>>> {
        Box::pin(self.scan_logs(chunks, chunk_size))
    }
}

/// Scripted pool source for tests.
#[derive(Debug, Default)]
pub struct MockPoolSource {
    current: Mutex<VecDeque<FeedResult<U256>>>,
    backfill: Mutex<Option<U256>>,
    current_calls: AtomicUsize,
    backfill_calls: AtomicUsize,
}

impl MockPoolSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_current(&self, result: FeedResult<U256>) {
        self.current.lock().push_back(result);
    }

    pub fn set_backfill(&self, sqrt: Option<U256>) {
        *self.backfill.lock() = sqrt;
    }

    pub fn current_calls(&self) -> usize {
        self.current_calls.load(Ordering::SeqCst)
    }

    pub fn backfill_calls(&self) -> usize {
        self.backfill_calls.load(Ordering::SeqCst)
    }
}

impl PoolPriceSource for MockPoolSource {
    fn current_sqrt_price(&self) -> BoxFuture<'_, FeedResult<U256>> {
        Box::pin(async move {
            self.current_calls.fetch_add(1, Ordering::SeqCst);
            self.current.lock().pop_front().unwrap_or(Err(FeedError::Rpc {
                code: -32000,
                message: "no scripted price".to_string(),
            }))
        })
    }

    fn latest_swap_sqrt_price(
        &self,
        _chunks: u32,
        _chunk_size: u64,
    ) -> BoxFuture<'_, FeedResult<Option<U256>>> {
        Box::pin(async move {
            self.backfill_calls.fetch_add(1, Ordering::SeqCst);
            Ok(*self.backfill.lock())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::aliases::{I24, U160};
    use alloy::primitives::{Address, B256, I256};

    fn swap_log(sqrt: U256) -> LogEntry {
        let event = Swap {
            sender: Address::ZERO,
            recipient: Address::repeat_byte(0x11),
            amount0: I256::try_from(-1_000_000i64).unwrap(),
            amount1: I256::try_from(555_000_000_000_000i64).unwrap(),
            sqrtPriceX96: U160::from(sqrt),
            liquidity: 7,
            tick: I24::try_from(-201_000i32).unwrap(),
        };
        let data = event.encode_log_data();
        LogEntry {
            block_number: Some(1),
            log_index: Some(0),
            topics: data.topics().to_vec(),
            data: data.data,
            removed: false,
        }
    }

    #[test]
    fn test_abi_constants() {
        assert_eq!(hex::encode(slot0Call::SELECTOR), "3850c7bd");
        assert_eq!(
            swap_topic(),
            "0xc42079f94a6350d7e6235f29174924f928cc2ac818eb64fed8004e115fbcca67"
        );
    }

    #[test]
    fn test_decode_swap() {
        let sqrt = U256::from(3_361_366_258_487_168_395_123_916u128);
        assert_eq!(decode_swap_sqrt_price(&swap_log(sqrt)).unwrap(), sqrt);
    }

    #[test]
    fn test_decode_swap_rejects_bad_logs() {
        let sqrt = U256::from(1u8);

        let mut short = swap_log(sqrt);
        short.data = short.data.slice(..64).into();
        assert!(decode_swap_sqrt_price(&short).is_err());

        let mut unindexed = swap_log(sqrt);
        unindexed.topics.truncate(1);
        assert!(decode_swap_sqrt_price(&unindexed).is_err());

        let mut removed = swap_log(sqrt);
        removed.removed = true;
        assert!(decode_swap_sqrt_price(&removed).is_err());

        let mut other = swap_log(sqrt);
        other.topics[0] = B256::repeat_byte(0xde);
        assert!(decode_swap_sqrt_price(&other).is_err());
    }

    #[test]
    fn test_decode_slot0() {
        let mut data = vec![0u8; 7 * 32];
        data[31] = 42;
        assert_eq!(decode_slot0_sqrt_price(&data).unwrap(), U256::from(42u8));
        assert!(decode_slot0_sqrt_price(&data[..10]).is_err());
    }

    #[tokio::test]
    async fn test_mock_fee_source_scripted() {
        let source = MockFeeSource::new(Chain::Polygon);
        source.push_flat(7, 30_000_000_000);

        let reading = source.fetch_reading(None).await.unwrap();
        assert_eq!(reading.block_number, Some(7));
        assert!(source.fetch_reading(None).await.is_err());
        assert_eq!(source.calls(), 2);
    }
}
