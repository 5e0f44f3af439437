use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::admin::AdminState;
use crate::lifecycle::ConnectionInfo;

#[derive(Serialize)]
pub struct SystemStatus {
    pub version: &'static str,
    pub status: &'static str,
    pub uptime_secs: u64,
    pub routes: Vec<String>,
    pub sessions: usize,
    pub active_sessions: usize,
}

pub async fn get_status(State(state): State<AdminState>) -> Json<SystemStatus> {
    Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION"),
        status: "operational",
        uptime_secs: state.started_at.elapsed().as_secs(),
        routes: state.routes.as_ref().clone(),
        sessions: state.registry.len(),
        active_sessions: state.registry.active(),
    })
}

pub async fn get_connections(State(state): State<AdminState>) -> Json<Vec<ConnectionInfo>> {
    Json(state.registry.list())
}

pub async fn close_connection(State(state): State<AdminState>, Path(id): Path<String>) -> Response {
    if state.registry.close(&id) {
        tracing::info!(proxy_id = %id, "Session closed via admin API");
        Json(serde_json::json!({ "id": id, "closed": true })).into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "connection not found", "id": id })),
        )
            .into_response()
    }
}
