//! Feed error types.

use gaswatch_core::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum FeedError {
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Request timed out after {0}ms")]
    Timeout(u64),

    #[error("Malformed upstream data: {0}")]
    Malformed(String),

    #[error("Invalid candles: {0}")]
    InvalidCandles(String),

    #[error("Core error: {0}")]
    Core(#[from] CoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FeedError {
    /// Label for the `kind` dimension of the fetch-failure metric.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Http(_) | Self::Rpc { .. } => "rpc",
            Self::Timeout(_) => "timeout",
            Self::Malformed(_) | Self::Core(_) | Self::Json(_) | Self::InvalidCandles(_) => {
                "malformed"
            }
        }
    }
}

pub type FeedResult<T> = Result<T, FeedError>;
