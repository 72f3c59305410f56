//! Dashboard state.
//!
//! A thin read/write facade over the store plus each chain's feed state.
//! Every snapshot is built from a single store read.

use std::collections::VecDeque;
use std::sync::Arc;

use chrono::Utc;
use gaswatch_core::{
    Chain, Mode, PerChain, PriceState, SimulatedCost, CANDLE_CAP, HISTORY_CAP,
};
use gaswatch_feed::{FeedState, GasStore, StoreSnapshot};
use tokio::sync::watch;

use crate::types::{ChainView, DashboardSnapshot, PriceView};

#[derive(Clone)]
pub struct DashboardState {
    store: Arc<GasStore>,
    feed_states: Arc<PerChain<Option<watch::Receiver<FeedState>>>>,
    history_points: usize,
    candles: usize,
}

impl DashboardState {
    /// `feed_states` holds a receiver for every chain that has a running feed.
    pub fn new(
        store: Arc<GasStore>,
        feed_states: PerChain<Option<watch::Receiver<FeedState>>>,
    ) -> Self {
        Self {
            store,
            feed_states: Arc::new(feed_states),
            history_points: HISTORY_CAP,
            candles: CANDLE_CAP,
        }
    }

    /// Send only the newest `history_points` and `candles` per chain.
    pub fn with_limits(mut self, history_points: usize, candles: usize) -> Self {
        self.history_points = history_points;
        self.candles = candles;
        self
    }

    pub fn feed_state(&self, chain: Chain) -> FeedState {
        self.feed_states[chain]
            .as_ref()
            .map(|rx| *rx.borrow())
            .unwrap_or_default()
    }

    pub fn collect_snapshot(&self) -> DashboardSnapshot {
        let StoreSnapshot {
            mode,
            price,
            inputs,
            chains,
            costs,
        } = self.store.snapshot();

        let chains = Chain::ALL
            .into_iter()
            .map(|chain| {
                let state = &chains[chain];
                ChainView {
                    chain,
                    feed_state: self.feed_state(chain),
                    base_fee: state.base_fee,
                    priority_fee: state.priority_fee,
                    gas_price: state.gas_price,
                    last_block: state.last_block,
                    updated_at: state.updated_at,
                    gas_limit_override: inputs.gas_limit_overrides[chain],
                    history: newest(&state.history, self.history_points),
                    candles: newest(&state.candles, self.candles),
                    cost: costs[chain].clone(),
                }
            })
            .collect();

        DashboardSnapshot {
            timestamp_ms: Utc::now().timestamp_millis(),
            mode,
            price: price_view(&price),
            tx_value: inputs.tx_value,
            chains,
        }
    }

    pub fn chain_view(&self, chain: Chain) -> ChainView {
        let mut snapshot = self.collect_snapshot();
        snapshot.chains.swap_remove(chain.index())
    }

    pub fn price(&self) -> PriceView {
        price_view(&self.store.price())
    }

    pub fn simulated_cost(&self, chain: Chain) -> SimulatedCost {
        self.store.simulated_cost(chain)
    }

    pub fn set_transaction_value(&self, value: f64) -> f64 {
        self.store.set_transaction_value(value)
    }

    pub fn set_gas_limit(&self, chain: Chain, value: Option<f64>) -> Option<u64> {
        match value {
            Some(v) => self.store.set_gas_limit_override(chain, v),
            None => {
                self.store.clear_gas_limit_override(chain);
                None
            }
        }
    }

    pub fn set_mode(&self, mode: Mode) -> Mode {
        self.store.set_mode(mode)
    }
}

fn newest<T: Clone>(items: &VecDeque<T>, limit: usize) -> Vec<T> {
    items.iter().skip(items.len().saturating_sub(limit)).cloned().collect()
}

fn price_view(price: &PriceState) -> PriceView {
    PriceView {
        price: price.price,
        updated_at: price.updated_at,
        source: price.source,
        age_secs: price.age(Utc::now()).map(|d| d.num_seconds()),
    }
}
