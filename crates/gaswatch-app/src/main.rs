//! gaswatch - entry point.

use anyhow::Result;
use clap::Parser;
use tracing::info;

/// Multi-chain fee tracker with price oracle and cost simulation.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Configuration file path (can also be set via GASWATCH_CONFIG env var)
    #[arg(short, long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // TLS provider must be installed before any wss:// connection.
    gaswatch_ws::init_crypto();

    let args = Args::parse();

    // CLI arg > GASWATCH_CONFIG > default path
    let config_path = args
        .config
        .or_else(|| std::env::var("GASWATCH_CONFIG").ok())
        .unwrap_or_else(|| "config/default.toml".to_string());
    let config = gaswatch_app::AppConfig::load(&config_path)?;

    gaswatch_telemetry::init_logging_with_level(config.telemetry.log_level.as_deref())?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        config_path = %config_path,
        chains = ?config.chains.iter().map(|c| c.chain).collect::<Vec<_>>(),
        "Starting gaswatch"
    );

    let app = gaswatch_app::Application::new(config)?;
    app.run().await?;

    Ok(())
}
