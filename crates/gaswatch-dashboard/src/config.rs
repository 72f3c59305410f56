//! Read API settings.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use gaswatch_core::{CANDLE_CAP, HISTORY_CAP};
use serde::{Deserialize, Serialize};

use crate::error::{DashboardError, DashboardResult};

/// `[dashboard]` section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub bind_address: IpAddr,
    pub port: u16,
    /// Cadence of the snapshot pushed to `/ws` clients.
    pub broadcast_interval_ms: u64,
    pub max_ws_clients: usize,
    /// Newest history points included per chain in a snapshot.
    pub snapshot_history_points: usize,
    /// Newest candles included per chain in a snapshot.
    pub snapshot_candles: usize,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8080,
            broadcast_interval_ms: 1_000,
            max_ws_clients: 16,
            snapshot_history_points: HISTORY_CAP,
            snapshot_candles: CANDLE_CAP,
        }
    }
}

impl DashboardConfig {
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }

    pub fn validate(&self) -> DashboardResult<()> {
        if self.broadcast_interval_ms == 0 {
            return Err(DashboardError::Config(
                "broadcast_interval_ms must be positive".to_string(),
            ));
        }
        if self.max_ws_clients == 0 {
            return Err(DashboardError::Config("max_ws_clients must be positive".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_section_keeps_defaults() {
        let config: DashboardConfig = toml::from_str(
            r#"
            bind_address = "127.0.0.1"
            snapshot_history_points = 10
            "#,
        )
        .unwrap();
        assert_eq!(config.socket_addr().to_string(), "127.0.0.1:8080");
        assert_eq!(config.snapshot_history_points, 10);
        assert_eq!(config.snapshot_candles, CANDLE_CAP);
        config.validate().unwrap();
    }

    #[test]
    fn test_zero_cadence_rejected() {
        let config = DashboardConfig {
            broadcast_interval_ms: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
