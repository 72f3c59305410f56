//! Snapshot file format and atomic load/save.

use crate::error::{PersistenceError, PersistenceResult};
use chrono::{DateTime, Utc};
use gaswatch_core::{Candle, Chain, ChainGasState, Gwei, HistoryPoint, Mode, PriceState};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, ErrorKind, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Current snapshot layout version.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Persisted state of one chain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedChain {
    pub base_fee: Gwei,
    pub priority_fee: Gwei,
    pub gas_price: Gwei,
    pub history: Vec<HistoryPoint>,
    pub candles: Vec<Candle>,
    pub gas_limit_override: Option<u64>,
    pub last_block: Option<u64>,
}

impl PersistedChain {
    pub fn from_state(state: &ChainGasState, gas_limit_override: Option<u64>) -> Self {
        Self {
            base_fee: state.base_fee,
            priority_fee: state.priority_fee,
            gas_price: state.gas_price,
            history: state.history.iter().cloned().collect(),
            candles: state.candles.iter().cloned().collect(),
            gas_limit_override,
            last_block: state.last_block,
        }
    }

    /// Rebuild the chain state. Caps and orderings are re-applied, so a
    /// hand-edited or older file can never break the store invariants.
    pub fn to_state(&self) -> ChainGasState {
        let mut state = ChainGasState {
            base_fee: self.base_fee,
            priority_fee: self.priority_fee,
            gas_price: self.gas_price,
            history: self.history.iter().cloned().collect(),
            candles: self.candles.iter().cloned().collect(),
            last_block: self.last_block,
            updated_at: self.history.last().map(|p| p.timestamp),
        };
        state.sanitize();
        state
    }
}

/// Whole-process snapshot, keyed by chain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedState {
    pub version: u32,
    pub saved_at: DateTime<Utc>,
    #[serde(default)]
    pub mode: Mode,
    #[serde(default)]
    pub price: PriceState,
    #[serde(default)]
    pub tx_value: f64,
    #[serde(default)]
    pub chains: BTreeMap<Chain, PersistedChain>,
}

impl Default for PersistedState {
    fn default() -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            saved_at: Utc::now(),
            mode: Mode::default(),
            price: PriceState::default(),
            tx_value: 0.0,
            chains: BTreeMap::new(),
        }
    }
}

/// Snapshot file on disk.
#[derive(Debug, Clone)]
pub struct SnapshotFile {
    path: PathBuf,
}

impl SnapshotFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.as_os_str().to_owned();
        name.push(".tmp");
        PathBuf::from(name)
    }

    /// Read and validate the snapshot, surfacing every failure.
    pub fn read(&self) -> PersistenceResult<PersistedState> {
        let file = File::open(&self.path)?;
        let state: PersistedState = serde_json::from_reader(BufReader::new(file))?;
        if state.version > SNAPSHOT_VERSION {
            return Err(PersistenceError::UnsupportedVersion {
                found: state.version,
                supported: SNAPSHOT_VERSION,
            });
        }
        Ok(state)
    }

    /// Load the snapshot for a warm start.
    ///
    /// A missing file gives `Ok(None)`. So does an unreadable one, after a
    /// warning, so startup never fails because of a bad snapshot.
    pub fn load(&self) -> PersistenceResult<Option<PersistedState>> {
        match self.read() {
            Ok(state) => {
                info!(
                    path = %self.path.display(),
                    saved_at = %state.saved_at,
                    chains = state.chains.len(),
                    "Loaded snapshot"
                );
                Ok(Some(state))
            }
            Err(PersistenceError::Io(e)) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No snapshot found, starting empty");
                Ok(None)
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Ignoring unreadable snapshot");
                Ok(None)
            }
        }
    }

    /// Write the snapshot atomically (temp file + rename).
    pub fn save(&self, state: &PersistedState) -> PersistenceResult<()> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.tmp_path();
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer(&mut writer, state)?;
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        fs::rename(&tmp, &self.path)?;

        debug!(path = %self.path.display(), "Snapshot saved");
        Ok(())
    }
}
