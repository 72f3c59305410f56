//! Transaction cost simulation.

use crate::chain::{Chain, PerChain};
use crate::decimal::Gwei;
use crate::types::{ChainGasState, PriceState};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Gas used by a plain value transfer.
pub const DEFAULT_GAS_USED: u64 = 21_000;

/// Largest accepted gas limit override, one full mainnet block.
pub const MAX_GAS_LIMIT: u64 = 30_000_000;

/// User-entered transaction parameters.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimulationInputs {
    /// Native value transferred, in whole native units.
    pub tx_value: f64,
    pub gas_limit_overrides: PerChain<Option<u64>>,
}

impl SimulationInputs {
    /// Coerce a user value: non-finite or negative becomes zero.
    pub fn sanitize_tx_value(value: f64) -> f64 {
        if value.is_finite() && value >= 0.0 {
            value
        } else {
            0.0
        }
    }

    /// Coerce a user gas limit: non-finite or negative means no override,
    /// anything above `MAX_GAS_LIMIT` is clamped to it.
    pub fn sanitize_gas_limit(value: f64) -> Option<u64> {
        if value.is_finite() && value >= 0.0 {
            Some((value.trunc() as u64).min(MAX_GAS_LIMIT))
        } else {
            None
        }
    }

    pub fn gas_used(&self, chain: Chain) -> u64 {
        self.gas_limit_overrides[chain]
            .map(|limit| limit.min(MAX_GAS_LIMIT))
            .unwrap_or(DEFAULT_GAS_USED)
    }
}

/// Cost estimate for one chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatedCost {
    pub chain: Chain,
    pub gas_used: u64,
    pub gas_price: Gwei,
    /// `gas_used × gas_price`, in whole native units.
    pub gas_cost_native: f64,
    pub gas_cost_quote: f64,
    pub tx_value_quote: f64,
    pub total_cost_quote: f64,
    /// False while no valid price has been seen; quote fields are then zero.
    pub price_known: bool,
}

/// Derive the cost of a hypothetical transaction.
pub fn simulate(
    chain: Chain,
    state: &ChainGasState,
    price: &PriceState,
    inputs: &SimulationInputs,
) -> SimulatedCost {
    let gas_used = inputs.gas_used(chain);
    // gwei -> native units
    let native = state
        .gas_price
        .inner()
        .checked_mul(Decimal::new(1, 9))
        .and_then(|per_gas| per_gas.checked_mul(Decimal::from(gas_used)));
    let gas_cost_native = native.and_then(|n| n.to_f64()).unwrap_or(0.0);
    let tx_value = SimulationInputs::sanitize_tx_value(inputs.tx_value);

    let (quote, price_known) = match price.price {
        Some(p) if PriceState::is_valid_reading(p) => (p, true),
        _ => (0.0, false),
    };
    let gas_cost_quote = gas_cost_native * quote;
    let tx_value_quote = tx_value * quote;

    SimulatedCost {
        chain,
        gas_used,
        gas_price: state.gas_price,
        gas_cost_native,
        gas_cost_quote,
        tx_value_quote,
        total_cost_quote: gas_cost_quote + tx_value_quote,
        price_known,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::PriceSource;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn state_at(gwei: Decimal) -> ChainGasState {
        ChainGasState {
            gas_price: Gwei::new(gwei),
            ..Default::default()
        }
    }

    fn price_at(value: f64) -> PriceState {
        let mut price = PriceState::default();
        price.accept(value, PriceSource::Initial, Utc::now());
        price
    }

    #[test]
    fn test_reference_cost() {
        let inputs = SimulationInputs {
            tx_value: 0.5,
            ..Default::default()
        };
        let cost = simulate(
            Chain::Ethereum,
            &state_at(dec!(30)),
            &price_at(2000.0),
            &inputs,
        );
        assert_eq!(cost.gas_used, 21_000);
        assert!((cost.gas_cost_quote - 1.26).abs() < 1e-9);
        assert!((cost.total_cost_quote - 1001.26).abs() < 1e-9);
        assert!(cost.price_known);
    }

    #[test]
    fn test_gas_limit_override_per_chain() {
        let mut inputs = SimulationInputs::default();
        inputs.gas_limit_overrides[Chain::Polygon] = Some(100_000);

        let polygon = simulate(
            Chain::Polygon,
            &state_at(dec!(10)),
            &price_at(1.0),
            &inputs,
        );
        let eth = simulate(
            Chain::Ethereum,
            &state_at(dec!(10)),
            &price_at(1.0),
            &inputs,
        );
        assert_eq!(polygon.gas_used, 100_000);
        assert_eq!(eth.gas_used, DEFAULT_GAS_USED);
        assert!((polygon.gas_cost_native - 0.001).abs() < 1e-12);
    }

    #[test]
    fn test_unknown_price_zeroes_quote() {
        let inputs = SimulationInputs {
            tx_value: 2.0,
            ..Default::default()
        };
        let cost = simulate(
            Chain::Arbitrum,
            &state_at(dec!(0.01)),
            &PriceState::default(),
            &inputs,
        );
        assert!(!cost.price_known);
        assert_eq!(cost.total_cost_quote, 0.0);
        assert!(cost.gas_cost_native > 0.0);
    }

    #[test]
    fn test_sanitizers() {
        assert_eq!(SimulationInputs::sanitize_tx_value(f64::NAN), 0.0);
        assert_eq!(SimulationInputs::sanitize_tx_value(-1.0), 0.0);
        assert_eq!(SimulationInputs::sanitize_tx_value(1.5), 1.5);
        assert_eq!(SimulationInputs::sanitize_gas_limit(f64::INFINITY), None);
        assert_eq!(SimulationInputs::sanitize_gas_limit(-3.0), None);
        assert_eq!(SimulationInputs::sanitize_gas_limit(50_000.9), Some(50_000));
        assert_eq!(SimulationInputs::sanitize_gas_limit(1e300), Some(MAX_GAS_LIMIT));
    }

    #[test]
    fn test_huge_inputs_do_not_panic() {
        let mut inputs = SimulationInputs::default();
        inputs.gas_limit_overrides[Chain::Ethereum] = SimulationInputs::sanitize_gas_limit(1e300);
        let state = ChainGasState {
            gas_price: Gwei::from_raw(10u128.pow(19), 9).unwrap(),
            ..Default::default()
        };
        let cost = simulate(Chain::Ethereum, &state, &price_at(2000.0), &inputs);
        assert_eq!(cost.gas_used, MAX_GAS_LIMIT);
        assert!((cost.gas_cost_native - 3e8).abs() < 1e-3);

        // Raw overrides bypassing the sanitizer are clamped too.
        inputs.gas_limit_overrides[Chain::Ethereum] = Some(u64::MAX);
        let cost = simulate(
            Chain::Ethereum,
            &state_at(Decimal::MAX),
            &price_at(2000.0),
            &inputs,
        );
        assert_eq!(cost.gas_used, MAX_GAS_LIMIT);
        assert!(cost.total_cost_quote.is_finite());
    }
}
