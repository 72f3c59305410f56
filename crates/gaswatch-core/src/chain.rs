//! Chain identifiers.
//!
//! The set of tracked chains is closed and fixed at compile time. Every
//! per-chain structure is indexed by `Chain::index()` instead of a string key,
//! so a lookup can never miss.

use crate::error::CoreError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};
use std::str::FromStr;

/// A supported chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    Ethereum,
    Polygon,
    Arbitrum,
}

impl Chain {
    /// All chains, in index order.
    pub const ALL: [Chain; 3] = [Chain::Ethereum, Chain::Polygon, Chain::Arbitrum];

    /// Number of supported chains.
    pub const COUNT: usize = Self::ALL.len();

    /// Position of this chain in `ALL` and in every `PerChain` table.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Lowercase identifier used in config, metrics labels and snapshots.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Ethereum => "ethereum",
            Self::Polygon => "polygon",
            Self::Arbitrum => "arbitrum",
        }
    }

    /// Fee model used when the config does not specify one.
    ///
    /// Arbitrum orders by gas price alone (tips are ignored by the sequencer),
    /// so it is read as a flat-fee chain.
    pub const fn default_fee_model(self) -> FeeModel {
        match self {
            Self::Ethereum | Self::Polygon => FeeModel::FeeMarket,
            Self::Arbitrum => FeeModel::Flat,
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Chain::ALL
            .into_iter()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::UnknownChain(s.to_string()))
    }
}

/// How a chain prices gas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeeModel {
    /// Base fee per block plus a priority tip (EIP-1559 style).
    FeeMarket,
    /// A single gas price.
    Flat,
}

/// Fixed-size table with one slot per chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerChain<T>([T; Chain::COUNT]);

impl<T> PerChain<T> {
    /// Build a table by evaluating `f` for every chain.
    pub fn from_fn(mut f: impl FnMut(Chain) -> T) -> Self {
        Self(std::array::from_fn(|i| f(Chain::ALL[i])))
    }

    /// Iterate `(chain, value)` pairs in index order.
    pub fn iter(&self) -> impl Iterator<Item = (Chain, &T)> {
        Chain::ALL.into_iter().zip(self.0.iter())
    }

    /// Map every slot into a new table.
    pub fn map<U>(&self, mut f: impl FnMut(Chain, &T) -> U) -> PerChain<U> {
        PerChain::from_fn(|chain| f(chain, &self.0[chain.index()]))
    }
}

impl<T: Default> Default for PerChain<T> {
    fn default() -> Self {
        Self::from_fn(|_| T::default())
    }
}

impl<T> Index<Chain> for PerChain<T> {
    type Output = T;

    fn index(&self, chain: Chain) -> &T {
        &self.0[chain.index()]
    }
}

impl<T> IndexMut<Chain> for PerChain<T> {
    fn index_mut(&mut self, chain: Chain) -> &mut T {
        &mut self.0[chain.index()]
    }
}
