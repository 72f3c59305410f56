//! HTTP server implementation using axum.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use futures_util::stream::StreamExt;
use futures_util::SinkExt;
use gaswatch_core::{Chain, SimulatedCost};
use gaswatch_telemetry::Metrics;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::config::DashboardConfig;
use crate::error::{DashboardError, DashboardResult};
use crate::state::DashboardState;
use crate::types::{
    ChainView, DashboardMessage, DashboardSnapshot, GasLimitRequest, GasLimitResponse,
    ModeRequest, ModeResponse, PriceView, TxValueRequest, TxValueResponse,
};

/// Caps concurrent WebSocket clients.
pub struct ConnectionLimiter {
    current: AtomicUsize,
    max: usize,
}

impl ConnectionLimiter {
    pub fn new(max: usize) -> Self {
        Self {
            current: AtomicUsize::new(0),
            max,
        }
    }

    /// Take a slot, released when the guard drops.
    pub fn try_acquire(self: &Arc<Self>) -> Option<ConnectionGuard> {
        let mut current = self.current.load(Ordering::Acquire);
        loop {
            if current >= self.max {
                return None;
            }
            match self.current.compare_exchange(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    return Some(ConnectionGuard {
                        limiter: Arc::clone(self),
                    })
                }
                Err(actual) => current = actual,
            }
        }
    }

    pub fn current_count(&self) -> usize {
        self.current.load(Ordering::Relaxed)
    }
}

pub struct ConnectionGuard {
    limiter: Arc<ConnectionLimiter>,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.limiter.current.fetch_sub(1, Ordering::Release);
    }
}

/// Shared application state for axum handlers.
#[derive(Clone)]
pub struct AppState {
    dashboard_state: DashboardState,
    broadcast_tx: broadcast::Sender<String>,
    connection_limiter: Arc<ConnectionLimiter>,
    max_ws_clients: usize,
}

impl AppState {
    pub fn new(
        dashboard_state: DashboardState,
        broadcast_tx: broadcast::Sender<String>,
        config: &DashboardConfig,
    ) -> Self {
        Self {
            dashboard_state,
            broadcast_tx,
            connection_limiter: Arc::new(ConnectionLimiter::new(config.max_ws_clients)),
            max_ws_clients: config.max_ws_clients,
        }
    }
}

/// Handler errors.
#[derive(Debug)]
pub enum ApiError {
    UnknownChain(String),
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::UnknownChain(name) => {
                (StatusCode::NOT_FOUND, format!("Unknown chain: {name}")).into_response()
            }
            Self::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg).into_response(),
        }
    }
}

fn parse_chain(name: &str) -> Result<Chain, ApiError> {
    name.parse()
        .map_err(|_| ApiError::UnknownChain(name.to_string()))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/api/snapshot", get(get_snapshot))
        .route("/api/chains/{chain}", get(get_chain))
        .route("/api/price", get(get_price))
        .route("/api/simulation/{chain}", get(get_simulation))
        .route("/api/inputs/tx-value", post(set_tx_value))
        .route("/api/inputs/gas-limit/{chain}", post(set_gas_limit))
        .route("/api/mode", post(set_mode))
        .route("/ws", get(ws_handler))
        .route("/metrics", get(get_metrics))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn get_snapshot(State(state): State<AppState>) -> Json<DashboardSnapshot> {
    Json(state.dashboard_state.collect_snapshot())
}

async fn get_chain(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Result<Json<ChainView>, ApiError> {
    let chain = parse_chain(&chain)?;
    Ok(Json(state.dashboard_state.chain_view(chain)))
}

async fn get_price(State(state): State<AppState>) -> Json<PriceView> {
    Json(state.dashboard_state.price())
}

async fn get_simulation(
    State(state): State<AppState>,
    Path(chain): Path<String>,
) -> Result<Json<SimulatedCost>, ApiError> {
    let chain = parse_chain(&chain)?;
    Ok(Json(state.dashboard_state.simulated_cost(chain)))
}

async fn set_tx_value(
    State(state): State<AppState>,
    Json(req): Json<TxValueRequest>,
) -> Json<TxValueResponse> {
    let value = state.dashboard_state.set_transaction_value(req.value);
    debug!(requested = req.value, value, "Transaction value set");
    Json(TxValueResponse { value })
}

async fn set_gas_limit(
    State(state): State<AppState>,
    Path(chain): Path<String>,
    Json(req): Json<GasLimitRequest>,
) -> Result<Json<GasLimitResponse>, ApiError> {
    let chain = parse_chain(&chain)?;
    let value = state.dashboard_state.set_gas_limit(chain, req.value);
    let gas_used = state.dashboard_state.simulated_cost(chain).gas_used;
    debug!(%chain, requested = ?req.value, ?value, "Gas limit override set");
    Ok(Json(GasLimitResponse {
        chain,
        value,
        gas_used,
    }))
}

async fn set_mode(
    State(state): State<AppState>,
    Json(req): Json<ModeRequest>,
) -> Json<ModeResponse> {
    Json(ModeResponse {
        mode: state.dashboard_state.set_mode(req.mode),
    })
}

async fn get_metrics() -> Result<Response, ApiError> {
    let text = Metrics::encode_text().map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok((
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        text,
    )
        .into_response())
}

async fn ws_handler(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    let Some(guard) = state.connection_limiter.try_acquire() else {
        warn!(
            current = state.connection_limiter.current_count(),
            max = state.max_ws_clients,
            "WebSocket connection limit reached"
        );
        return (StatusCode::SERVICE_UNAVAILABLE, "Too many connections").into_response();
    };

    info!(
        connections = state.connection_limiter.current_count(),
        "New WebSocket connection"
    );
    ws.on_upgrade(move |socket| handle_ws_connection(socket, state, guard))
}

async fn handle_ws_connection(socket: WebSocket, state: AppState, _guard: ConnectionGuard) {
    let (mut sender, mut receiver) = socket.split();
    let mut broadcast_rx = state.broadcast_tx.subscribe();

    let initial = DashboardMessage::Snapshot(state.dashboard_state.collect_snapshot());
    if let Ok(json) = serde_json::to_string(&initial) {
        if sender.send(Message::Text(json.into())).await.is_err() {
            debug!("Failed to send initial snapshot, client disconnected");
            return;
        }
    }

    // Clients only ever close; pings are answered by axum.
    let mut incoming_task = tokio::spawn(async move {
        while let Some(result) = receiver.next().await {
            match result {
                Ok(Message::Close(_)) => break,
                Err(e) => {
                    debug!(error = %e, "WebSocket receive error");
                    break;
                }
                _ => {}
            }
        }
    });

    loop {
        tokio::select! {
            result = broadcast_rx.recv() => {
                match result {
                    Ok(msg) => {
                        if sender.send(Message::Text(msg.into())).await.is_err() {
                            debug!("Failed to send update, client disconnected");
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "WebSocket client lagged, catching up");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            _ = &mut incoming_task => break,
        }
    }

    incoming_task.abort();
    debug!("WebSocket connection closed");
}

/// Serve until `cancel` fires.
pub async fn run_server(
    dashboard_state: DashboardState,
    config: DashboardConfig,
    cancel: CancellationToken,
) -> DashboardResult<()> {
    config.validate()?;
    let dashboard_state = dashboard_state.with_limits(
        config.snapshot_history_points,
        config.snapshot_candles,
    );
    let (broadcast_tx, _) = broadcast::channel::<String>(32);
    let state = AppState::new(dashboard_state.clone(), broadcast_tx.clone(), &config);
    let app = create_router(state);

    tokio::spawn(crate::broadcast::run_broadcaster(
        dashboard_state,
        broadcast_tx,
        config.broadcast_interval_ms,
        cancel.clone(),
    ));

    let addr = config.socket_addr();
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| DashboardError::Bind {
            port: config.port,
            source,
        })?;
    info!(%addr, "Dashboard server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move { cancel.cancelled().await })
        .await?;
    info!("Dashboard server stopped");
    Ok(())
}
