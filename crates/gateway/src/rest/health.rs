use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;
use std::sync::Arc;

use crate::state::GatewayState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub sessions: usize,
}

pub fn create_health_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/health", get(health_check))
}

pub async fn health_check(State(state): State<Arc<GatewayState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        timestamp: Utc::now().to_rfc3339(),
        sessions: state.hub().session_count(),
    })
}
