//! Prometheus metrics for gaswatch.
//!
//! Covers:
//! - Per-chain feed state machine
//! - Push reconnects and fetch failures
//! - Applied and duplicate samples
//! - Current gas price and fetch latency
//! - Oracle price, updates and discarded readings
//!
//! # Panics
//!
//! Metric registration uses `unwrap()` intentionally. A registration failure
//! means duplicate metric names, a startup bug that should crash at once.
//! These panics only occur during static initialization, never at runtime.

use crate::error::{TelemetryError, TelemetryResult};
use once_cell::sync::Lazy;
use prometheus::{
    register_counter_vec, register_gauge, register_gauge_vec, register_histogram_vec,
    CounterVec, Encoder, Gauge, GaugeVec, HistogramVec, TextEncoder,
};

/// Feed states, as used for the `state` label.
pub const FEED_STATES: [&str; 4] = ["disconnected", "connecting", "subscribed", "polling"];

/// Feed state machine current state.
/// Labels: chain, state (disconnected/connecting/subscribed/polling)
pub static FEED_STATE: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "gaswatch_feed_state",
        "Feed state machine current state (1=active, 0=inactive)",
        &["chain", "state"]
    )
    .unwrap()
});

/// Push connection losses, by source (chain name or "oracle").
pub static WS_RECONNECT_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gaswatch_ws_reconnect_total",
        "Total push connection losses followed by a reconnect",
        &["source"]
    )
    .unwrap()
});

/// Failed fetches. kind: rpc/timeout/malformed
pub static FETCH_FAILURES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gaswatch_fetch_failures_total",
        "Total failed fee fetches (tick skipped)",
        &["chain", "kind"]
    )
    .unwrap()
});

pub static SAMPLES_APPLIED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gaswatch_samples_applied_total",
        "Total fee samples applied to the store",
        &["chain"]
    )
    .unwrap()
});

pub static SAMPLES_DUPLICATE_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gaswatch_samples_duplicate_total",
        "Total fee samples dropped as already-applied blocks",
        &["chain"]
    )
    .unwrap()
});

pub static GAS_PRICE_GWEI: Lazy<GaugeVec> = Lazy::new(|| {
    register_gauge_vec!(
        "gaswatch_gas_price_gwei",
        "Current effective gas price in gwei",
        &["chain"]
    )
    .unwrap()
});

/// Fee fetch round-trip in milliseconds.
pub static FETCH_LATENCY_MS: Lazy<HistogramVec> = Lazy::new(|| {
    register_histogram_vec!(
        "gaswatch_fetch_latency_ms",
        "Fee fetch latency in milliseconds",
        &["chain"],
        vec![10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0, 10000.0]
    )
    .unwrap()
});

pub static ORACLE_PRICE: Lazy<Gauge> = Lazy::new(|| {
    register_gauge!(
        "gaswatch_oracle_price",
        "Last accepted oracle price in quote units"
    )
    .unwrap()
});

/// Accepted oracle readings. source: initial/push/poll/backfill
pub static ORACLE_UPDATES_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gaswatch_oracle_updates_total",
        "Total accepted oracle price readings",
        &["source"]
    )
    .unwrap()
});

/// Rejected oracle readings. reason: malformed/invalid/fetch
pub static ORACLE_DISCARDED_TOTAL: Lazy<CounterVec> = Lazy::new(|| {
    register_counter_vec!(
        "gaswatch_oracle_discarded_total",
        "Total oracle readings discarded",
        &["reason"]
    )
    .unwrap()
});

/// Metrics facade.
pub struct Metrics;

impl Metrics {
    /// Set the feed state for a chain.
    /// Only the active state is 1, all others 0.
    pub fn feed_state_set(chain: &str, state: &str) {
        for s in FEED_STATES {
            FEED_STATE.with_label_values(&[chain, s]).set(0.0);
        }
        FEED_STATE.with_label_values(&[chain, state]).set(1.0);
    }

    pub fn ws_reconnect(source: &str) {
        WS_RECONNECT_TOTAL.with_label_values(&[source]).inc();
    }

    pub fn fetch_failure(chain: &str, kind: &str) {
        FETCH_FAILURES_TOTAL.with_label_values(&[chain, kind]).inc();
    }

    pub fn sample_applied(chain: &str, gas_price_gwei: f64) {
        SAMPLES_APPLIED_TOTAL.with_label_values(&[chain]).inc();
        GAS_PRICE_GWEI.with_label_values(&[chain]).set(gas_price_gwei);
    }

    pub fn sample_duplicate(chain: &str) {
        SAMPLES_DUPLICATE_TOTAL.with_label_values(&[chain]).inc();
    }

    pub fn fetch_latency(chain: &str, latency_ms: f64) {
        FETCH_LATENCY_MS
            .with_label_values(&[chain])
            .observe(latency_ms);
    }

    pub fn oracle_update(source: &str, price: f64) {
        ORACLE_UPDATES_TOTAL.with_label_values(&[source]).inc();
        ORACLE_PRICE.set(price);
    }

    pub fn oracle_discarded(reason: &str) {
        ORACLE_DISCARDED_TOTAL.with_label_values(&[reason]).inc();
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode_text() -> TelemetryResult<String> {
        let families = prometheus::gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&families, &mut buffer)
            .map_err(|e| TelemetryError::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Metrics(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_state_is_exclusive() {
        Metrics::feed_state_set("testchain", "polling");
        Metrics::feed_state_set("testchain", "subscribed");

        let active: Vec<&str> = FEED_STATES
            .into_iter()
            .filter(|s| FEED_STATE.with_label_values(&["testchain", *s]).get() > 0.0)
            .collect();
        assert_eq!(active, vec!["subscribed"]);
    }

    #[test]
    fn test_encode_text_contains_metrics() {
        Metrics::sample_applied("encodechain", 12.5);
        Metrics::oracle_update("poll", 1800.0);

        let text = Metrics::encode_text().unwrap();
        assert!(text.contains("gaswatch_samples_applied_total"));
        assert!(text.contains("encodechain"));
        assert!(text.contains("gaswatch_oracle_price"));
    }
}
