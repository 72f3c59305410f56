//! Persistence error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Unsupported snapshot version {found} (max {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

pub type PersistenceResult<T> = Result<T, PersistenceError>;
