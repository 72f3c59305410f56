//! HTTP JSON-RPC client for chain endpoints.
//!
//! Every call is bounded by the configured timeout; a call that exceeds it
//! fails with `FeedError::Timeout` and is treated as a skipped tick.

use crate::error::{FeedError, FeedResult};
use alloy::primitives::{Bytes, B256, U256};
use gaswatch_ws::{RpcRequest, RpcResponse};
use reqwest::Client;
use serde_json::{json, Value};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tracing::debug;

fn hex_str<'a>(value: &'a Value, field: &str) -> FeedResult<&'a str> {
    value
        .as_str()
        .ok_or_else(|| FeedError::Malformed(format!("{field} is not a hex string: {value}")))
}

/// Parse a hex quantity (`"0x1b4"`) into a 256-bit word.
pub fn parse_word(value: &Value, field: &str) -> FeedResult<U256> {
    let text = hex_str(value, field)?;
    let digits = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .filter(|d| !d.is_empty())
        .ok_or_else(|| FeedError::Malformed(format!("{field} is not a hex quantity: {text}")))?;
    U256::from_str_radix(digits, 16)
        .map_err(|e| FeedError::Malformed(format!("{field} ({text}): {e}")))
}

/// Parse a hex quantity that must fit in 128 bits.
pub fn parse_quantity(value: &Value, field: &str) -> FeedResult<u128> {
    let word = parse_word(value, field)?;
    u128::try_from(word).map_err(|_| FeedError::Malformed(format!("{field} out of range: {word}")))
}

/// Parse a hex quantity that must fit in 64 bits.
pub fn parse_u64(value: &Value, field: &str) -> FeedResult<u64> {
    let word = parse_word(value, field)?;
    u64::try_from(word).map_err(|_| FeedError::Malformed(format!("{field} out of range: {word}")))
}

/// Parse hex data (`"0xdeadbeef"`).
pub fn parse_bytes(value: &Value, field: &str) -> FeedResult<Bytes> {
    Bytes::from_str(hex_str(value, field)?)
        .map_err(|e| FeedError::Malformed(format!("{field}: {e}")))
}

/// The block header fields the feed needs.
///
/// Parsed from both `eth_getBlockByNumber` results and `newHeads`
/// notifications, which share the same shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    pub number: u64,
    pub timestamp: u64,
    /// Absent on chains without a fee market.
    pub base_fee_per_gas: Option<u128>,
}

impl BlockHeader {
    pub fn from_json(value: &Value) -> FeedResult<Self> {
        if !value.is_object() {
            return Err(FeedError::Malformed(format!("block is not an object: {value}")));
        }
        let base_fee_per_gas = match value.get("baseFeePerGas") {
            None | Some(Value::Null) => None,
            Some(v) => Some(parse_quantity(v, "baseFeePerGas")?),
        };
        Ok(Self {
            number: parse_u64(&value["number"], "number")?,
            timestamp: parse_u64(&value["timestamp"], "timestamp")?,
            base_fee_per_gas,
        })
    }
}

/// A contract log, from `eth_getLogs` or a `logs` subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub block_number: Option<u64>,
    pub log_index: Option<u64>,
    pub topics: Vec<B256>,
    pub data: Bytes,
    /// Set when the log was dropped by a reorg.
    pub removed: bool,
}

impl LogEntry {
    pub fn from_json(value: &Value) -> FeedResult<Self> {
        let optional_u64 = |field: &str| match value.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(v) => parse_u64(v, field).map(Some),
        };
        let topics = value
            .get("topics")
            .and_then(Value::as_array)
            .ok_or_else(|| FeedError::Malformed("log has no topics array".to_string()))?
            .iter()
            .map(|t| {
                B256::from_str(hex_str(t, "topic")?)
                    .map_err(|e| FeedError::Malformed(format!("topic {t}: {e}")))
            })
            .collect::<FeedResult<Vec<_>>>()?;

        Ok(Self {
            block_number: optional_u64("blockNumber")?,
            log_index: optional_u64("logIndex")?,
            topics,
            data: parse_bytes(&value["data"], "data")?,
            removed: value.get("removed").and_then(Value::as_bool).unwrap_or(false),
        })
    }
}

/// JSON-RPC over HTTP.
pub struct RpcClient {
    client: Client,
    url: String,
    timeout: Duration,
    next_id: AtomicU64,
}

impl RpcClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> FeedResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::Http(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: url.into(),
            timeout,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Issue one call and return its `result`.
    pub async fn call(&self, method: &str, params: Value) -> FeedResult<Value> {
        let request = RpcRequest::new(
            self.next_id.fetch_add(1, Ordering::Relaxed),
            method,
            params,
        );

        let exchange = async {
            let response = self
                .client
                .post(&self.url)
                .json(&request)
                .send()
                .await
                .map_err(|e| {
                    if e.is_timeout() {
                        FeedError::Timeout(self.timeout.as_millis() as u64)
                    } else {
                        FeedError::Http(format!("{method} request failed: {e}"))
                    }
                })?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(FeedError::Http(format!("{method}: HTTP {status}: {body}")));
            }

            let body: RpcResponse = response
                .json()
                .await
                .map_err(|e| FeedError::Malformed(format!("{method}: invalid response: {e}")))?;
            body.into_result().map_err(|e| FeedError::Rpc {
                code: e.code,
                message: e.message,
            })
        };

        let result = tokio::time::timeout(self.timeout, exchange)
            .await
            .map_err(|_| FeedError::Timeout(self.timeout.as_millis() as u64))??;
        debug!(method, "RPC call completed");
        Ok(result)
    }

    pub async fn latest_block(&self) -> FeedResult<BlockHeader> {
        let block = self
            .call("eth_getBlockByNumber", json!(["latest", false]))
            .await?;
        if block.is_null() {
            return Err(FeedError::Malformed("latest block is null".to_string()));
        }
        BlockHeader::from_json(&block)
    }

    pub async fn block_number(&self) -> FeedResult<u64> {
        let value = self.call("eth_blockNumber", json!([])).await?;
        parse_u64(&value, "blockNumber")
    }

    pub async fn max_priority_fee_per_gas(&self) -> FeedResult<u128> {
        let value = self.call("eth_maxPriorityFeePerGas", json!([])).await?;
        parse_quantity(&value, "maxPriorityFeePerGas")
    }

    pub async fn gas_price(&self) -> FeedResult<u128> {
        let value = self.call("eth_gasPrice", json!([])).await?;
        parse_quantity(&value, "gasPrice")
    }

    /// `eth_call` against the latest block.
    pub async fn call_contract(&self, to: &str, data: &[u8]) -> FeedResult<Bytes> {
        let value = self
            .call(
                "eth_call",
                json!([{ "to": to, "data": format!("0x{}", hex::encode(data)) }, "latest"]),
            )
            .await?;
        parse_bytes(&value, "eth_call result")
    }

    pub async fn get_logs(
        &self,
        address: &str,
        topics: &[String],
        from_block: u64,
        to_block: u64,
    ) -> FeedResult<Vec<LogEntry>> {
        let value = self
            .call(
                "eth_getLogs",
                json!([{
                    "address": address,
                    "topics": topics,
                    "fromBlock": format!("0x{from_block:x}"),
                    "toBlock": format!("0x{to_block:x}"),
                }]),
            )
            .await?;
        value
            .as_array()
            .ok_or_else(|| FeedError::Malformed("eth_getLogs result is not an array".to_string()))?
            .iter()
            .map(LogEntry::from_json)
            .collect()
    }
}
