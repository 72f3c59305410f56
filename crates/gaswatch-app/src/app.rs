//! Main application orchestration.
//!
//! Wires one ingestion task per configured chain, the price oracle, the
//! dashboard server and the snapshot saver around a single `GasStore`.
//!
//! Teardown order:
//! 1. Seal the store (late results are dropped from here on)
//! 2. Cancel every task
//! 3. Join them, bounded by `TEARDOWN_GRACE`
//! 4. Write the final snapshot

use crate::config::AppConfig;
use crate::error::AppResult;
use gaswatch_core::PerChain;
use gaswatch_dashboard::DashboardState;
use gaswatch_feed::{
    ChainFeed, ChainFeedConfig, DynFeeSource, DynPoolSource, FeedState, GasStore, OracleAdapter,
    OracleConfig, RpcClient, RpcFeeSource, RpcPoolSource,
};
use gaswatch_persistence::SnapshotFile;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Upper bound on waiting for tasks to stop.
const TEARDOWN_GRACE: Duration = Duration::from_secs(5);

/// Upstream sources, one per configured chain plus the pool.
#[derive(Default)]
pub struct Sources {
    pub fees: PerChain<Option<DynFeeSource>>,
    pub pool: Option<DynPoolSource>,
}

impl Sources {
    /// JSON-RPC sources for every configured endpoint.
    pub fn from_config(config: &AppConfig) -> AppResult<Self> {
        let timeout = config.feed.request_timeout();
        let mut fees: PerChain<Option<DynFeeSource>> = PerChain::default();
        for chain in &config.chains {
            let client = RpcClient::new(chain.http_url.clone(), timeout)?;
            fees[chain.chain] = Some(Arc::new(RpcFeeSource::new(
                chain.chain,
                chain.fee_model(),
                client,
            )));
        }

        let pool = if config.oracle.enabled {
            let client = RpcClient::new(config.oracle.http_url.clone(), timeout)?;
            let source: DynPoolSource =
                Arc::new(RpcPoolSource::new(config.oracle.pool_address.clone(), client));
            Some(source)
        } else {
            None
        };

        Ok(Self { fees, pool })
    }
}

fn non_empty(url: &Option<String>) -> Option<String> {
    url.as_ref()
        .map(|u| u.trim())
        .filter(|u| !u.is_empty())
        .map(str::to_string)
}

/// Main application.
pub struct Application {
    config: AppConfig,
    sources: Sources,
    store: Arc<GasStore>,
    snapshot: Option<SnapshotFile>,
    /// Fired by the owner to request shutdown.
    shutdown: CancellationToken,
    /// Fired by teardown to stop every task.
    tasks: CancellationToken,
}

impl Application {
    pub fn new(config: AppConfig) -> AppResult<Self> {
        let sources = Sources::from_config(&config)?;
        Ok(Self::with_sources(config, sources))
    }

    pub fn with_sources(config: AppConfig, sources: Sources) -> Self {
        let snapshot = config
            .persistence
            .enabled
            .then(|| SnapshotFile::new(&config.persistence.snapshot_path));
        Self {
            config,
            sources,
            store: Arc::new(GasStore::new()),
            snapshot,
            shutdown: CancellationToken::new(),
            tasks: CancellationToken::new(),
        }
    }

    pub fn store(&self) -> Arc<GasStore> {
        self.store.clone()
    }

    /// Cancelling this token starts teardown, like Ctrl-C does.
    pub fn shutdown_handle(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Load the warm-restart snapshot, if any.
    pub fn restore(&self) -> AppResult<()> {
        if let Some(file) = &self.snapshot {
            if let Some(state) = file.load()? {
                self.store.restore(state);
            }
        }
        Ok(())
    }

    /// Run until Ctrl-C or the shutdown handle fires, then tear down.
    pub async fn run(self) -> AppResult<()> {
        self.restore()?;

        let mut handles: Vec<(String, JoinHandle<()>)> = Vec::new();
        let mut feed_states: PerChain<Option<watch::Receiver<FeedState>>> = PerChain::default();

        for chain_config in &self.config.chains {
            let chain = chain_config.chain;
            let Some(source) = self.sources.fees[chain].clone() else {
                warn!(%chain, "No fee source for configured chain, skipping");
                continue;
            };
            let feed = ChainFeed::new(
                ChainFeedConfig {
                    chain,
                    ws_url: non_empty(&chain_config.ws_url),
                    poll_interval: Duration::from_millis(chain_config.poll_interval_ms),
                    request_timeout: self.config.feed.request_timeout(),
                    exponent: chain_config.decimals,
                    push: self.config.feed.push_settings(),
                },
                source,
                self.store.clone(),
                self.tasks.clone(),
            );
            feed_states[chain] = Some(feed.state());
            handles.push((chain.to_string(), tokio::spawn(feed.run())));
        }

        if let Some(pool) = self.sources.pool.clone() {
            let oracle = &self.config.oracle;
            let adapter = OracleAdapter::new(
                OracleConfig {
                    ws_url: non_empty(&oracle.ws_url),
                    pool_address: oracle.pool_address.clone(),
                    orientation: oracle.orientation(),
                    poll_interval: Duration::from_millis(oracle.poll_interval_ms),
                    request_timeout: self.config.feed.request_timeout(),
                    backfill_chunks: oracle.backfill_chunks,
                    backfill_chunk_size: oracle.backfill_chunk_size,
                    push: self.config.feed.push_settings(),
                },
                pool,
                self.store.clone(),
                self.tasks.clone(),
            );
            handles.push(("oracle".to_string(), tokio::spawn(adapter.run())));
        }

        if self.config.dashboard.enabled {
            let state = DashboardState::new(self.store.clone(), feed_states);
            let config = self.config.dashboard.clone();
            let cancel = self.tasks.clone();
            handles.push((
                "dashboard".to_string(),
                tokio::spawn(async move {
                    if let Err(e) = gaswatch_dashboard::run_server(state, config, cancel).await {
                        error!(error = %e, "Dashboard server failed");
                    }
                }),
            ));
        }

        if let Some(file) = self.snapshot.clone() {
            let period = Duration::from_millis(self.config.persistence.save_interval_ms);
            handles.push((
                "snapshot".to_string(),
                tokio::spawn(run_saver(self.store.clone(), file, period, self.tasks.clone())),
            ));
        }

        info!(
            chains = self.config.chains.len(),
            oracle = self.sources.pool.is_some(),
            dashboard = self.config.dashboard.enabled,
            "gaswatch running"
        );

        tokio::select! {
            res = tokio::signal::ctrl_c() => {
                if let Err(e) = res {
                    error!(error = %e, "Failed to listen for Ctrl-C");
                }
                info!("Ctrl-C received, shutting down");
            }
            () = self.shutdown.cancelled() => {
                info!("Shutdown requested");
            }
        }

        self.teardown(handles).await
    }

    async fn teardown(&self, handles: Vec<(String, JoinHandle<()>)>) -> AppResult<()> {
        self.store.seal();
        self.tasks.cancel();

        let deadline = Instant::now() + TEARDOWN_GRACE;
        for (name, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => debug!(task = %name, "Task stopped"),
                Ok(Err(e)) => error!(task = %name, error = %e, "Task panicked"),
                Err(_) => {
                    warn!(task = %name, "Task did not stop in time, aborting");
                    handle.abort();
                }
            }
        }

        if let Some(file) = self.snapshot.clone() {
            save_snapshot(&self.store, file).await;
        }
        info!("Shutdown complete");
        Ok(())
    }
}

async fn save_snapshot(store: &GasStore, file: SnapshotFile) {
    let state = store.export();
    match tokio::task::spawn_blocking(move || file.save(&state)).await {
        Ok(Ok(())) => debug!("Snapshot written"),
        Ok(Err(e)) => warn!(error = %e, "Snapshot write failed"),
        Err(e) => error!(error = %e, "Snapshot task failed"),
    }
}

async fn run_saver(
    store: Arc<GasStore>,
    file: SnapshotFile,
    period: Duration,
    cancel: CancellationToken,
) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return,
            _ = interval.tick() => save_snapshot(&store, file.clone()).await,
        }
    }
}
