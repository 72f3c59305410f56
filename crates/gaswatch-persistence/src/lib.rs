//! Warm-restart snapshots for gaswatch.
//!
//! The bounded history, candles, price, mode and user inputs are written as
//! one JSON document keyed by chain. A missing or unreadable snapshot is
//! never an error for the caller: it simply means "start empty".

pub mod error;
pub mod snapshot;

pub use error::{PersistenceError, PersistenceResult};
pub use snapshot::{PersistedChain, PersistedState, SnapshotFile, SNAPSHOT_VERSION};
