//! Minimal read-only HTTP surface: zone/client status for manual
//! inspection and the WS hub's initial snapshot (spec §6 / SPEC_FULL §E).
//! Not the "HTTP controller" the core scopes out: no command endpoints,
//! no request validation beyond what the core already performs.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::bus::SharedBus;
use crate::client::ClientManager;
use crate::domain::{ClientState, ZoneState};
use crate::error::SnapDogError;
use crate::notify::ws::ws_handler;
use crate::zone::ZoneManager;

#[derive(Clone)]
pub struct AppState {
    pub zones: Arc<ZoneManager>,
    pub clients: Arc<ClientManager>,
    pub bus: SharedBus,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(zones: Arc<ZoneManager>, clients: Arc<ClientManager>, bus: SharedBus) -> Self {
        AppState {
            zones,
            clients,
            bus,
            started_at: Instant::now(),
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    kind: &'static str,
}

fn error_response(err: SnapDogError) -> (StatusCode, Json<ErrorResponse>) {
    let status = StatusCode::from_u16(err.http_status_hint()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let kind = err.kind();
    (status, Json(ErrorResponse { error: err.to_string(), kind }))
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub service: &'static str,
    pub version: &'static str,
    pub uptime_secs: u64,
    pub zone_count: usize,
    pub bus_subscribers: usize,
}

/// GET /status — service health check.
pub async fn status_handler(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        service: "snapdog",
        version: env!("CARGO_PKG_VERSION"),
        uptime_secs: state.started_at.elapsed().as_secs(),
        zone_count: state.zones.zone_count(),
        bus_subscribers: state.bus.subscriber_count(),
    })
}

/// GET /zones — all zone states.
pub async fn zones_handler(State(state): State<AppState>) -> Json<Vec<ZoneState>> {
    Json(state.zones.get_all_zone_states().await)
}

/// GET /zones/:index — a single zone's state.
pub async fn zone_handler(State(state): State<AppState>, Path(index): Path<u32>) -> impl IntoResponse {
    match state.zones.get_zone_state(index).await {
        Ok(snapshot) => (StatusCode::OK, Json(snapshot.state)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// GET /clients — all client states.
pub async fn clients_handler(State(state): State<AppState>) -> Json<Vec<ClientState>> {
    Json(state.clients.get_all_clients().await)
}

/// GET /clients/:index — a single client's state.
pub async fn client_handler(State(state): State<AppState>, Path(index): Path<u32>) -> impl IntoResponse {
    match state.clients.get_client_state(index).await {
        Ok(client) => (StatusCode::OK, Json(client)).into_response(),
        Err(e) => error_response(e).into_response(),
    }
}

/// Builds the router: status/zone/client read surface plus the WS hub.
/// The hub carries its own narrower state (just the bus), so it is built
/// as a separate sub-router and merged in.
pub fn router(state: AppState) -> Router {
    let ws_router = Router::new().route("/ws", get(ws_handler)).with_state(state.bus.clone());

    Router::new()
        .route("/status", get(status_handler))
        .route("/zones", get(zones_handler))
        .route("/zones/{index}", get(zone_handler))
        .route("/clients", get(clients_handler))
        .route("/clients/{index}", get(client_handler))
        .with_state(state)
        .merge(ws_router)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}
