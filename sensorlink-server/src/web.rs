//! HTTP control API.
//!
//! Endpoints:
//! - `GET  /api/v1/health`: liveness and fleet size
//! - `GET  /api/v1/connections`: per-device connection state
//! - `POST /api/v1/connections/reset`: close everything, then start again

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use serde::Serialize;
use tower_http::cors::CorsLayer;

use crate::connection::ConnectionState;
use crate::supervisor::ConnectionSupervisor;

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    connections: usize,
    reconnect_allowed: bool,
}

#[derive(Serialize)]
struct ConnectionInfo {
    name: String,
    state: ConnectionState,
    connected: bool,
    retry_count: u32,
}

#[derive(Serialize)]
struct ResetResponse {
    spawned: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

pub fn router(supervisor: Arc<ConnectionSupervisor>) -> Router {
    Router::new()
        .route("/api/v1/health", get(api_health))
        .route("/api/v1/connections", get(api_connections))
        .route("/api/v1/connections/reset", post(api_reset))
        .layer(CorsLayer::permissive())
        .with_state(supervisor)
}

async fn api_health(State(supervisor): State<Arc<ConnectionSupervisor>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        connections: supervisor.status().len(),
        reconnect_allowed: supervisor.is_reconnect_allowed(),
    })
}

async fn api_connections(
    State(supervisor): State<Arc<ConnectionSupervisor>>,
) -> Json<BTreeMap<String, ConnectionInfo>> {
    let list = supervisor
        .status()
        .into_iter()
        .map(|(id, s)| {
            let info = ConnectionInfo {
                connected: s.is_connected(),
                name: s.name,
                state: s.state,
                retry_count: s.retry_count,
            };
            (id, info)
        })
        .collect();
    Json(list)
}

async fn api_reset(
    State(supervisor): State<Arc<ConnectionSupervisor>>,
) -> Result<Json<ResetResponse>, (StatusCode, Json<ErrorResponse>)> {
    supervisor.close_all(false);
    match supervisor.init_all().await {
        Ok(spawned) => Ok(Json(ResetResponse { spawned })),
        Err(e) => Err((StatusCode::BAD_GATEWAY, Json(ErrorResponse { error: e.to_string() }))),
    }
}
