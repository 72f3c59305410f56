//! Periodic WebSocket broadcast.
//!
//! Collects a snapshot every `interval_ms` and fans it out to every
//! connected client through a broadcast channel.

use std::time::Duration;

use tokio::sync::broadcast;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::state::DashboardState;
use crate::types::DashboardMessage;

pub async fn run_broadcaster(
    state: DashboardState,
    tx: broadcast::Sender<String>,
    interval_ms: u64,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval(Duration::from_millis(interval_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            () = cancel.cancelled() => {
                debug!("Broadcaster stopping");
                return;
            }
            _ = interval.tick() => {}
        }

        // Skip serialization entirely while nobody is listening.
        if tx.receiver_count() == 0 {
            continue;
        }

        let msg = DashboardMessage::Update(state.collect_snapshot());
        match serde_json::to_string(&msg) {
            Ok(json) => {
                if let Ok(n) = tx.send(json) {
                    trace!(receivers = n, "Broadcast update sent");
                }
            }
            Err(e) => debug!(error = %e, "Failed to serialize dashboard update"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gaswatch_core::PerChain;
    use gaswatch_feed::GasStore;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_broadcaster_sends_updates_until_cancelled() {
        let state = DashboardState::new(Arc::new(GasStore::new()), PerChain::default());
        let (tx, mut rx) = broadcast::channel::<String>(16);
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_broadcaster(state, tx, 10, cancel.clone()));

        let msg = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let value: serde_json::Value = serde_json::from_str(&msg).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["data"]["chains"].as_array().unwrap().len(), 3);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
