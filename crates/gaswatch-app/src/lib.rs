//! gaswatch - multi-chain fee tracker.
//!
//! Orchestrates:
//! - Per-chain fee ingestion (push with poll fallback)
//! - Pool-derived quote price
//! - Aggregation store with warm-restart snapshots
//! - Dashboard API and metrics

pub mod app;
pub mod config;
pub mod error;

pub use app::{Application, Sources};
pub use config::AppConfig;
pub use error::{AppError, AppResult};
