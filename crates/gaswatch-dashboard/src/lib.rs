//! gaswatch-dashboard - HTTP and WebSocket API over the fee store.
//!
//! - REST endpoints for chain state, price, simulated cost and the
//!   validated user-input setters
//! - WebSocket snapshot broadcast at a fixed interval
//! - Prometheus text exposition at `/metrics`
//!
//! ```text
//!  GasStore (Arc) ──┐
//!                   ├─► DashboardState ─► axum router
//!  FeedState rx ────┘                       GET  /api/snapshot
//!                                           GET  /api/chains/{chain}
//!                                           GET  /api/price
//!                                           GET  /api/simulation/{chain}
//!                                           POST /api/inputs/tx-value
//!                                           POST /api/inputs/gas-limit/{chain}
//!                                           POST /api/mode
//!                                           GET  /ws
//!                                           GET  /metrics
//! ```

mod broadcast;
mod config;
mod error;
mod server;
mod state;
mod types;

pub use config::DashboardConfig;
pub use error::{DashboardError, DashboardResult};
pub use server::{create_router, run_server, AppState};
pub use state::DashboardState;
pub use types::{
    ChainView, DashboardMessage, DashboardSnapshot, GasLimitRequest, ModeRequest, PriceView,
    TxValueRequest,
};
