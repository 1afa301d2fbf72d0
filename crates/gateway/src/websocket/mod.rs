//! WebSocket endpoints for the gateway

pub mod connect;
pub mod session;

use axum::{routing::get, Router};
use std::sync::Arc;

use crate::state::GatewayState;

/// Create all WebSocket routes
pub fn create_websocket_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route("/ws/connect/", get(connect::connect_handler))
        .route("/ws/join/:conversation_id/", get(connect::join_conversation))
        .route("/ws/leave/:conversation_id/", get(connect::leave_conversation))
}

pub use session::{drive_session, SessionContext, SessionExit, SessionSummary};
