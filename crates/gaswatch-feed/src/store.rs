//! Aggregation store.
//!
//! Sole owner of every chain's fee state, the oracle price and the user
//! inputs. Producers submit candidates through the mutation entry points;
//! each one runs under the write lock, so readers only ever see whole
//! transitions.

use crate::error::{FeedError, FeedResult};
use chrono::Utc;
use gaswatch_core::{
    simulate, ApplyOutcome, Candle, Chain, ChainGasState, CoreError, FeeSample, Mode, PerChain,
    PriceSource, PriceState, SimulatedCost, SimulationInputs,
};
use gaswatch_persistence::{PersistedChain, PersistedState, SNAPSHOT_VERSION};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, info, trace};

/// One consistent view of the whole store.
#[derive(Debug, Clone, Serialize)]
pub struct StoreSnapshot {
    pub mode: Mode,
    pub price: PriceState,
    pub inputs: SimulationInputs,
    pub chains: PerChain<ChainGasState>,
    pub costs: PerChain<SimulatedCost>,
}

#[derive(Debug, Default)]
struct StoreInner {
    chains: PerChain<ChainGasState>,
    price: PriceState,
    inputs: SimulationInputs,
    mode: Mode,
    sealed: bool,
}

/// Shared store. Wrap in `Arc` and hand clones to producers and readers.
#[derive(Debug, Default)]
pub struct GasStore {
    inner: RwLock<StoreInner>,
}

impl GasStore {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Fee mutation
    // ------------------------------------------------------------------

    /// Apply a normalized sample to its chain.
    pub fn update_chain_data(&self, sample: &FeeSample) -> ApplyOutcome {
        let mut inner = self.inner.write();
        if inner.sealed {
            return ApplyOutcome::Sealed;
        }
        let outcome = inner.chains[sample.chain].apply_sample(sample);
        trace!(
            chain = %sample.chain,
            block = ?sample.block_number,
            gas_price = %sample.gas_price,
            ?outcome,
            "Sample submitted"
        );
        outcome
    }

    /// Replace a chain's candles wholesale.
    pub fn overwrite_candles(&self, chain: Chain, candles: Vec<Candle>) -> FeedResult<ApplyOutcome> {
        let mut inner = self.inner.write();
        if inner.sealed {
            return Ok(ApplyOutcome::Sealed);
        }
        let count = candles.len();
        inner.chains[chain]
            .replace_candles(candles)
            .map_err(|e| match e {
                CoreError::InvalidCandles(msg) => FeedError::InvalidCandles(msg),
                other => FeedError::Core(other),
            })?;
        debug!(%chain, count, "Candles overwritten");
        Ok(ApplyOutcome::Applied)
    }

    /// Stop accepting any mutation. Used at teardown so late results are dropped.
    pub fn seal(&self) {
        let mut inner = self.inner.write();
        if !inner.sealed {
            inner.sealed = true;
            info!("Store sealed");
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.inner.read().sealed
    }

    // ------------------------------------------------------------------
    // Price
    // ------------------------------------------------------------------

    /// Record an oracle reading. Invalid readings leave the price untouched.
    pub fn set_price(&self, value: f64, source: PriceSource) -> bool {
        let mut inner = self.inner.write();
        if inner.sealed {
            return false;
        }
        inner.price.accept(value, source, Utc::now())
    }

    // ------------------------------------------------------------------
    // User inputs
    // ------------------------------------------------------------------

    /// Set the simulated transaction value. Returns the value now in effect.
    pub fn set_transaction_value(&self, value: f64) -> f64 {
        let mut inner = self.inner.write();
        if !inner.sealed {
            inner.inputs.tx_value = SimulationInputs::sanitize_tx_value(value);
        }
        inner.inputs.tx_value
    }

    /// Set a chain's gas limit override. Returns the override now in effect.
    pub fn set_gas_limit_override(&self, chain: Chain, value: f64) -> Option<u64> {
        let mut inner = self.inner.write();
        if !inner.sealed {
            inner.inputs.gas_limit_overrides[chain] = SimulationInputs::sanitize_gas_limit(value);
        }
        inner.inputs.gas_limit_overrides[chain]
    }

    pub fn clear_gas_limit_override(&self, chain: Chain) {
        let mut inner = self.inner.write();
        if !inner.sealed {
            inner.inputs.gas_limit_overrides[chain] = None;
        }
    }

    pub fn set_mode(&self, mode: Mode) -> Mode {
        let mut inner = self.inner.write();
        if !inner.sealed && inner.mode != mode {
            debug!(?mode, "Mode changed");
            inner.mode = mode;
        }
        inner.mode
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn chain_state(&self, chain: Chain) -> ChainGasState {
        self.inner.read().chains[chain].clone()
    }

    pub fn price(&self) -> PriceState {
        self.inner.read().price
    }

    pub fn mode(&self) -> Mode {
        self.inner.read().mode
    }

    pub fn inputs(&self) -> SimulationInputs {
        self.inner.read().inputs.clone()
    }

    /// Cost estimate for one chain, computed from a single read.
    pub fn simulated_cost(&self, chain: Chain) -> SimulatedCost {
        let inner = self.inner.read();
        simulate(chain, &inner.chains[chain], &inner.price, &inner.inputs)
    }

    pub fn simulated_costs(&self) -> PerChain<SimulatedCost> {
        let inner = self.inner.read();
        inner
            .chains
            .map(|chain, state| simulate(chain, state, &inner.price, &inner.inputs))
    }

    pub fn snapshot(&self) -> StoreSnapshot {
        let inner = self.inner.read();
        StoreSnapshot {
            mode: inner.mode,
            price: inner.price,
            inputs: inner.inputs.clone(),
            chains: inner.chains.clone(),
            costs: inner
                .chains
                .map(|chain, state| simulate(chain, state, &inner.price, &inner.inputs)),
        }
    }

    // ------------------------------------------------------------------
    // Warm restart
    // ------------------------------------------------------------------

    pub fn export(&self) -> PersistedState {
        let inner = self.inner.read();
        PersistedState {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            mode: inner.mode,
            price: inner.price,
            tx_value: inner.inputs.tx_value,
            chains: inner
                .chains
                .iter()
                .map(|(chain, state)| {
                    (
                        chain,
                        PersistedChain::from_state(state, inner.inputs.gas_limit_overrides[chain]),
                    )
                })
                .collect(),
        }
    }

    /// Load persisted state. Chains missing from the snapshot stay empty.
    pub fn restore(&self, persisted: PersistedState) {
        let mut inner = self.inner.write();
        if inner.sealed {
            return;
        }

        for chain in Chain::ALL {
            let (state, gas_limit) = match persisted.chains.get(&chain) {
                Some(saved) => (saved.to_state(), saved.gas_limit_override),
                None => (ChainGasState::default(), None),
            };
            inner.chains[chain] = state;
            inner.inputs.gas_limit_overrides[chain] = gas_limit;
        }

        inner.price = match persisted.price.price {
            Some(p) if PriceState::is_valid_reading(p) => persisted.price,
            _ => PriceState::default(),
        };
        inner.inputs.tx_value = SimulationInputs::sanitize_tx_value(persisted.tx_value);
        inner.mode = persisted.mode;

        info!(
            saved_at = %persisted.saved_at,
            price = ?inner.price.price,
            "Store restored from snapshot"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone};
    use gaswatch_core::{Gwei, CANDLE_CAP, CANDLE_INTERVAL_SECS, HISTORY_CAP};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Arc;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn sample(chain: Chain, block: u64, secs: i64, gas: Decimal) -> FeeSample {
        FeeSample {
            chain,
            block_number: Some(block),
            base_fee: Gwei::new(gas),
            priority_fee: Gwei::ZERO,
            gas_price: Gwei::new(gas),
            observed_at: at(secs),
        }
    }

    const T0: i64 = 1_700_000_100;

    #[test]
    fn test_caps_hold_for_long_runs() {
        let store = GasStore::new();
        for i in 0..5_000u64 {
            let secs = T0 + i as i64 * 30;
            store.update_chain_data(&sample(Chain::Ethereum, i + 1, secs, dec!(10)));
            let state = store.chain_state(Chain::Ethereum);
            assert!(state.history.len() <= HISTORY_CAP);
            assert!(state.candles.len() <= CANDLE_CAP);
        }
        let state = store.chain_state(Chain::Ethereum);
        assert_eq!(state.history.len(), HISTORY_CAP);
        assert_eq!(state.candles.len(), CANDLE_CAP);
    }

    #[test]
    fn test_chains_are_independent() {
        let store = GasStore::new();
        store.update_chain_data(&sample(Chain::Polygon, 1, T0, dec!(80)));

        assert_eq!(store.chain_state(Chain::Polygon).history.len(), 1);
        assert!(store.chain_state(Chain::Ethereum).history.is_empty());
        assert!(store.chain_state(Chain::Arbitrum).candles.is_empty());
    }

    #[test]
    fn test_replayed_blocks_are_applied_once() {
        let store = GasStore::new();
        // Reconnect cycles replay the same heads; every block lands once.
        for cycle in 0..3 {
            for block in 1..=10u64 {
                let outcome = store.update_chain_data(&sample(
                    Chain::Ethereum,
                    block,
                    T0 + block as i64,
                    dec!(12),
                ));
                if cycle == 0 {
                    assert_eq!(outcome, ApplyOutcome::Applied);
                } else {
                    assert_eq!(outcome, ApplyOutcome::Duplicate);
                }
            }
        }
        let state = store.chain_state(Chain::Ethereum);
        assert_eq!(state.history.len(), 10);
        assert_eq!(state.last_block, Some(10));
    }

    #[test]
    fn test_overwrite_candles() {
        let store = GasStore::new();
        let base = T0 - T0.rem_euclid(CANDLE_INTERVAL_SECS);
        let candles: Vec<Candle> = (0..3)
            .map(|i| Candle::new(base + i * CANDLE_INTERVAL_SECS, Gwei::new(dec!(5))))
            .collect();

        let outcome = store.overwrite_candles(Chain::Arbitrum, candles).unwrap();
        assert_eq!(outcome, ApplyOutcome::Applied);
        assert_eq!(store.chain_state(Chain::Arbitrum).candles.len(), 3);
    }

    #[test]
    fn test_overwrite_candles_rejects_and_keeps_state() {
        let store = GasStore::new();
        store.update_chain_data(&sample(Chain::Ethereum, 1, T0, dec!(20)));
        let before = store.chain_state(Chain::Ethereum);

        let misaligned = vec![Candle::new(T0 - T0.rem_euclid(900) + 1, Gwei::ZERO)];
        let err = store.overwrite_candles(Chain::Ethereum, misaligned).unwrap_err();
        assert!(matches!(err, FeedError::InvalidCandles(_)));
        assert_eq!(store.chain_state(Chain::Ethereum), before);
    }

    #[test]
    fn test_invalid_price_is_discarded() {
        let store = GasStore::new();
        assert!(store.set_price(1800.0, PriceSource::Initial));
        let before = store.price();

        for bad in [f64::NAN, f64::INFINITY, 0.0, -5.0] {
            assert!(!store.set_price(bad, PriceSource::Push));
            assert_eq!(store.price(), before);
        }
    }

    #[test]
    fn test_user_input_coercion() {
        let store = GasStore::new();
        assert_eq!(store.set_transaction_value(1.5), 1.5);
        assert_eq!(store.set_transaction_value(f64::NAN), 0.0);
        assert_eq!(store.set_transaction_value(-3.0), 0.0);

        assert_eq!(store.set_gas_limit_override(Chain::Polygon, 50_000.9), Some(50_000));
        assert_eq!(store.simulated_cost(Chain::Polygon).gas_used, 50_000);
        assert_eq!(store.set_gas_limit_override(Chain::Polygon, -1.0), None);
        assert_eq!(store.simulated_cost(Chain::Polygon).gas_used, 21_000);

        store.set_gas_limit_override(Chain::Ethereum, 90_000.0);
        store.clear_gas_limit_override(Chain::Ethereum);
        assert_eq!(store.inputs().gas_limit_overrides[Chain::Ethereum], None);

        assert_eq!(store.set_mode(Mode::Simulation), Mode::Simulation);
        assert_eq!(store.mode(), Mode::Simulation);
    }

    #[test]
    fn test_simulated_cost_follows_inputs() {
        let store = GasStore::new();
        store.update_chain_data(&sample(Chain::Ethereum, 1, T0, dec!(30)));
        store.set_price(2000.0, PriceSource::Poll);
        store.set_transaction_value(0.5);

        let cost = store.simulated_cost(Chain::Ethereum);
        assert!((cost.total_cost_quote - 1001.26).abs() < 1e-9);

        // Recomputed on every read, never patched.
        store.set_transaction_value(0.0);
        let cost = store.simulated_cost(Chain::Ethereum);
        assert!((cost.total_cost_quote - 1.26).abs() < 1e-9);
    }

    #[test]
    fn test_sealed_store_rejects_everything() {
        let store = GasStore::new();
        store.update_chain_data(&sample(Chain::Ethereum, 1, T0, dec!(10)));
        store.set_transaction_value(2.0);
        store.seal();
        assert!(store.is_sealed());

        assert_eq!(
            store.update_chain_data(&sample(Chain::Ethereum, 2, T0 + 1, dec!(11))),
            ApplyOutcome::Sealed
        );
        assert_eq!(
            store.overwrite_candles(Chain::Ethereum, Vec::new()).unwrap(),
            ApplyOutcome::Sealed
        );
        assert!(!store.set_price(1000.0, PriceSource::Poll));
        assert_eq!(store.set_transaction_value(9.0), 2.0);
        assert_eq!(store.set_mode(Mode::Simulation), Mode::Live);
        assert_eq!(store.chain_state(Chain::Ethereum).history.len(), 1);
    }

    #[test]
    fn test_export_restore() {
        let store = GasStore::new();
        store.update_chain_data(&sample(Chain::Ethereum, 7, T0, dec!(25)));
        store.set_price(1900.0, PriceSource::Initial);
        store.set_transaction_value(0.25);
        store.set_gas_limit_override(Chain::Arbitrum, 400_000.0);
        store.set_mode(Mode::Simulation);

        let restored = GasStore::new();
        restored.restore(store.export());

        assert_eq!(
            restored.chain_state(Chain::Ethereum),
            store.chain_state(Chain::Ethereum)
        );
        assert_eq!(restored.price().price, Some(1900.0));
        assert_eq!(restored.inputs(), store.inputs());
        assert_eq!(restored.mode(), Mode::Simulation);

        // Replayed block after restart is still a duplicate.
        assert_eq!(
            restored.update_chain_data(&sample(Chain::Ethereum, 7, T0 + 5, dec!(26))),
            ApplyOutcome::Duplicate
        );
    }

    #[test]
    fn test_restore_sanitizes() {
        let mut persisted = PersistedState::default();
        persisted.price.price = Some(-1.0);
        persisted.tx_value = f64::NEG_INFINITY;

        let store = GasStore::new();
        store.restore(persisted);
        assert!(store.price().price.is_none());
        assert_eq!(store.inputs().tx_value, 0.0);
        assert!(store.chain_state(Chain::Polygon).history.is_empty());
    }

    #[test]
    fn test_concurrent_writers_keep_invariants() {
        let store = Arc::new(GasStore::new());
        let handles: Vec<_> = Chain::ALL
            .into_iter()
            .map(|chain| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..500u64 {
                        store.update_chain_data(&sample(chain, i + 1, T0 + i as i64 * 60, dec!(3)));
                        let _ = store.snapshot();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        for chain in Chain::ALL {
            let state = store.chain_state(chain);
            assert_eq!(state.history.len(), HISTORY_CAP);
            assert_eq!(state.last_block, Some(500));
            assert!(state
                .candles
                .iter()
                .zip(state.candles.iter().skip(1))
                .all(|(a, b)| a.bucket_start < b.bucket_start));
        }
    }
}
