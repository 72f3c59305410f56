//! Application error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Feed error: {0}")]
    Feed(#[from] gaswatch_feed::FeedError),

    #[error("Telemetry error: {0}")]
    Telemetry(#[from] gaswatch_telemetry::TelemetryError),

    #[error("Persistence error: {0}")]
    Persistence(#[from] gaswatch_persistence::PersistenceError),

    #[error("Dashboard error: {0}")]
    Dashboard(#[from] gaswatch_dashboard::DashboardError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type AppResult<T> = Result<T, AppError>;
