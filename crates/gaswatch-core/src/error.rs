//! Error types for gaswatch-core.

use thiserror::Error;

/// Core error types.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Fee value {raw} cannot be scaled by 10^{exponent}")]
    FeeOverflow { raw: u128, exponent: u32 },

    #[error("Unknown chain: {0}")]
    UnknownChain(String),

    #[error("Invalid candles: {0}")]
    InvalidCandles(String),

    #[error("Decimal parse error: {0}")]
    DecimalParse(#[from] rust_decimal::Error),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
