//! Application configuration.

use crate::error::{AppError, AppResult};
use gaswatch_core::{Chain, FeeModel, PoolOrientation, MAX_EXPONENT};
use gaswatch_dashboard::DashboardConfig;
use gaswatch_feed::PushSettings;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

/// One tracked chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub chain: Chain,
    /// JSON-RPC endpoint for fee reads.
    pub http_url: String,
    /// Push endpoint for `newHeads`. Without it the chain is polled.
    #[serde(default)]
    pub ws_url: Option<String>,
    /// Overrides the chain's default fee model.
    #[serde(default)]
    pub fee_model: Option<FeeModel>,
    /// Decimal exponent from raw fee units to gwei-equivalent units.
    #[serde(default = "default_decimals")]
    pub decimals: u32,
    #[serde(default = "default_chain_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl ChainConfig {
    pub fn fee_model(&self) -> FeeModel {
        self.fee_model
            .unwrap_or_else(|| self.chain.default_fee_model())
    }
}

fn default_decimals() -> u32 {
    9
}

fn default_chain_poll_interval_ms() -> u64 {
    12_000
}

fn default_chains() -> Vec<ChainConfig> {
    let public = |chain: Chain, host: &str| ChainConfig {
        chain,
        http_url: format!("https://{host}"),
        ws_url: Some(format!("wss://{host}")),
        fee_model: None,
        decimals: default_decimals(),
        poll_interval_ms: default_chain_poll_interval_ms(),
    };
    vec![
        public(Chain::Ethereum, "ethereum-rpc.publicnode.com"),
        public(Chain::Polygon, "polygon-bor-rpc.publicnode.com"),
        public(Chain::Arbitrum, "arbitrum-one-rpc.publicnode.com"),
    ]
}

/// Request and push connection tuning shared by every feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedConfig {
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_subscribe_timeout_ms")]
    pub subscribe_timeout_ms: u64,
    #[serde(default = "default_reconnect_base_delay_ms")]
    pub reconnect_base_delay_ms: u64,
    #[serde(default = "default_reconnect_max_delay_ms")]
    pub reconnect_max_delay_ms: u64,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    #[serde(default = "default_heartbeat_timeout_ms")]
    pub heartbeat_timeout_ms: u64,
}

fn default_request_timeout_ms() -> u64 {
    10_000
}

fn default_subscribe_timeout_ms() -> u64 {
    10_000
}

fn default_reconnect_base_delay_ms() -> u64 {
    1_000
}

fn default_reconnect_max_delay_ms() -> u64 {
    60_000
}

fn default_heartbeat_interval_ms() -> u64 {
    30_000
}

fn default_heartbeat_timeout_ms() -> u64 {
    10_000
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: default_request_timeout_ms(),
            subscribe_timeout_ms: default_subscribe_timeout_ms(),
            reconnect_base_delay_ms: default_reconnect_base_delay_ms(),
            reconnect_max_delay_ms: default_reconnect_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_timeout_ms: default_heartbeat_timeout_ms(),
        }
    }
}

impl FeedConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn push_settings(&self) -> PushSettings {
        PushSettings {
            subscribe_timeout_ms: self.subscribe_timeout_ms,
            reconnect_base_delay_ms: self.reconnect_base_delay_ms,
            reconnect_max_delay_ms: self.reconnect_max_delay_ms,
            heartbeat_interval_ms: self.heartbeat_interval_ms,
            heartbeat_timeout_ms: self.heartbeat_timeout_ms,
        }
    }
}

/// Pool price oracle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OracleSection {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_oracle_http_url")]
    pub http_url: String,
    #[serde(default = "default_oracle_ws_url")]
    pub ws_url: Option<String>,
    /// USDC/WETH 0.05% pool on Ethereum mainnet.
    #[serde(default = "default_pool_address")]
    pub pool_address: String,
    #[serde(default = "default_token0_decimals")]
    pub token0_decimals: u8,
    #[serde(default = "default_token1_decimals")]
    pub token1_decimals: u8,
    #[serde(default = "default_true")]
    pub quote_is_token0: bool,
    #[serde(default = "default_oracle_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_backfill_chunks")]
    pub backfill_chunks: u32,
    #[serde(default = "default_backfill_chunk_size")]
    pub backfill_chunk_size: u64,
}

fn default_true() -> bool {
    true
}

fn default_oracle_http_url() -> String {
    "https://ethereum-rpc.publicnode.com".to_string()
}

fn default_oracle_ws_url() -> Option<String> {
    Some("wss://ethereum-rpc.publicnode.com".to_string())
}

fn default_pool_address() -> String {
    "0x88e6A0c2dDD26FEEb64F039a2c41296FcB3f5640".to_string()
}

fn default_token0_decimals() -> u8 {
    6
}

fn default_token1_decimals() -> u8 {
    18
}

fn default_oracle_poll_interval_ms() -> u64 {
    60_000
}

fn default_backfill_chunks() -> u32 {
    5
}

fn default_backfill_chunk_size() -> u64 {
    500
}

impl Default for OracleSection {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            http_url: default_oracle_http_url(),
            ws_url: default_oracle_ws_url(),
            pool_address: default_pool_address(),
            token0_decimals: default_token0_decimals(),
            token1_decimals: default_token1_decimals(),
            quote_is_token0: default_true(),
            poll_interval_ms: default_oracle_poll_interval_ms(),
            backfill_chunks: default_backfill_chunks(),
            backfill_chunk_size: default_backfill_chunk_size(),
        }
    }
}

impl OracleSection {
    pub fn orientation(&self) -> PoolOrientation {
        PoolOrientation {
            token0_decimals: self.token0_decimals,
            token1_decimals: self.token1_decimals,
            quote_is_token0: self.quote_is_token0,
        }
    }
}

/// Warm-restart snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PersistenceConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
    #[serde(default = "default_save_interval_ms")]
    pub save_interval_ms: u64,
}

fn default_snapshot_path() -> String {
    "data/snapshot.json".to_string()
}

fn default_save_interval_ms() -> u64 {
    30_000
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            snapshot_path: default_snapshot_path(),
            save_interval_ms: default_save_interval_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryConfig {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default)]
    pub log_level: Option<String>,
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_chains")]
    pub chains: Vec<ChainConfig>,
    #[serde(default)]
    pub feed: FeedConfig,
    #[serde(default)]
    pub oracle: OracleSection,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chains: default_chains(),
            feed: FeedConfig::default(),
            oracle: OracleSection::default(),
            persistence: PersistenceConfig::default(),
            telemetry: TelemetryConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load `path`, or the defaults if the file does not exist.
    pub fn load(path: &str) -> AppResult<Self> {
        if Path::new(path).exists() {
            Self::from_file(path)
        } else {
            tracing::warn!(path, "Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load and validate a specific file.
    pub fn from_file(path: &str) -> AppResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("Failed to read config: {e}")))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> AppResult<Self> {
        let config: Self = toml::from_str(content)
            .map_err(|e| AppError::Config(format!("Failed to parse config: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> AppResult<()> {
        let mut seen = HashSet::new();
        for chain in &self.chains {
            if !seen.insert(chain.chain) {
                return Err(AppError::Config(format!("chain {} listed twice", chain.chain)));
            }
            if chain.http_url.trim().is_empty() {
                return Err(AppError::Config(format!("chain {} has no http_url", chain.chain)));
            }
            if chain.decimals > MAX_EXPONENT {
                return Err(AppError::Config(format!(
                    "chain {} decimals {} exceeds {MAX_EXPONENT}",
                    chain.chain, chain.decimals
                )));
            }
            if chain.poll_interval_ms == 0 {
                return Err(AppError::Config(format!(
                    "chain {} poll_interval_ms must be positive",
                    chain.chain
                )));
            }
        }

        let feed = &self.feed;
        for (name, value) in [
            ("request_timeout_ms", feed.request_timeout_ms),
            ("subscribe_timeout_ms", feed.subscribe_timeout_ms),
            ("reconnect_base_delay_ms", feed.reconnect_base_delay_ms),
            ("heartbeat_interval_ms", feed.heartbeat_interval_ms),
        ] {
            if value == 0 {
                return Err(AppError::Config(format!("feed.{name} must be positive")));
            }
        }
        if feed.reconnect_max_delay_ms < feed.reconnect_base_delay_ms {
            return Err(AppError::Config(
                "feed.reconnect_max_delay_ms is below reconnect_base_delay_ms".to_string(),
            ));
        }

        if self.oracle.enabled {
            if self.oracle.http_url.trim().is_empty() {
                return Err(AppError::Config("oracle.http_url is empty".to_string()));
            }
            if self.oracle.poll_interval_ms == 0 {
                return Err(AppError::Config(
                    "oracle.poll_interval_ms must be positive".to_string(),
                ));
            }
        }
        if self.persistence.enabled && self.persistence.save_interval_ms == 0 {
            return Err(AppError::Config(
                "persistence.save_interval_ms must be positive".to_string(),
            ));
        }
        if self.dashboard.enabled {
            self.dashboard
                .validate()
                .map_err(|e| AppError::Config(e.to_string()))?;
        }
        Ok(())
    }
}
