//! Fee normalization.
//!
//! Chains report fees differently: fee-market chains expose a block base fee
//! and a priority tip, flat-fee chains a single gas price. `normalize` turns
//! either shape into one canonical `(base_fee, priority_fee, gas_price)`
//! triple in gwei-equivalent units.
//!
//! Rules:
//! - Fee market with a fee cap: `priority = fee_cap - base` (floored at zero)
//! - Fee market without a fee cap: `priority` = the explicit priority-fee
//!   query result, or zero when the endpoint did not answer it
//! - Fee market: `gas_price = base + priority`
//! - Flat: `base = gas_price`, `priority = 0`

use crate::chain::Chain;
use crate::decimal::Gwei;
use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw, chain-specific fee fields in integer base units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawFeeFields {
    FeeMarket {
        base_fee: u128,
        fee_cap: Option<u128>,
        priority_fee: Option<u128>,
    },
    Flat {
        gas_price: u128,
    },
}

/// A raw fee reading as fetched from a chain endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFeeReading {
    pub chain: Chain,
    /// Block the reading belongs to, when the endpoint reports one.
    pub block_number: Option<u64>,
    pub observed_at: DateTime<Utc>,
    pub fields: RawFeeFields,
}

/// A normalized, immutable fee reading.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeSample {
    pub chain: Chain,
    pub block_number: Option<u64>,
    pub base_fee: Gwei,
    pub priority_fee: Gwei,
    pub gas_price: Gwei,
    pub observed_at: DateTime<Utc>,
}

/// Normalize a raw reading, scaling every integer by `10^exponent`.
pub fn normalize(reading: &RawFeeReading, exponent: u32) -> Result<FeeSample> {
    let (base_fee, priority_fee, gas_price) = match reading.fields {
        RawFeeFields::FeeMarket {
            base_fee,
            fee_cap,
            priority_fee,
        } => {
            let priority_raw = match fee_cap {
                Some(cap) => cap.saturating_sub(base_fee),
                None => priority_fee.unwrap_or(0),
            };
            let base = Gwei::from_raw(base_fee, exponent)?;
            let priority = Gwei::from_raw(priority_raw, exponent)?;
            let total = base
                .checked_add(priority)
                .ok_or(CoreError::FeeOverflow {
                    raw: base_fee.saturating_add(priority_raw),
                    exponent,
                })?;
            (base, priority, total)
        }
        RawFeeFields::Flat { gas_price } => {
            let price = Gwei::from_raw(gas_price, exponent)?;
            (price, Gwei::ZERO, price)
        }
    };

    Ok(FeeSample {
        chain: reading.chain,
        block_number: reading.block_number,
        base_fee,
        priority_fee,
        gas_price,
        observed_at: reading.observed_at,
    })
}
