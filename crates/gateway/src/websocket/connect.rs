use axum::{
    extract::{ws::WebSocketUpgrade, Path, State},
    response::Response,
    Extension, Json,
};
use futures_util::StreamExt;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::GatewayResult;
use crate::middleware::AuthUser;
use crate::state::GatewayState;
use crate::websocket::session::{drive_session, SessionContext};

#[derive(Debug, Serialize)]
pub struct RoomMembershipResponse {
    pub conversation_id: i64,
    pub sessions: usize,
}

/// Upgrade an authenticated request into a live session subscribed to every
/// conversation the caller belongs to.
pub async fn connect_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Response> {
    // Load rooms before upgrading so a repository failure is still an HTTP error.
    let rooms = state.store().conversation_ids_for_user(user.id).await?;
    debug!(user_id = user.id, rooms = rooms.len(), "upgrading socket");

    let ctx = SessionContext {
        hub: state.hub().clone(),
        gate: state.gate().clone(),
        config: state.config().hub.clone(),
    };

    Ok(ws.on_upgrade(move |socket| async move {
        let (sink, stream) = socket.split();
        drive_session(stream, sink, ctx, user.id, user.company_id, rooms).await;
    }))
}

pub async fn join_conversation(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<RoomMembershipResponse>> {
    state.gate().require_access(user.id, conversation_id).await?;

    let sessions = state.hub().join_user(user.id, conversation_id);
    info!(user_id = user.id, conversation_id, sessions, "joined live sessions to room");

    Ok(Json(RoomMembershipResponse {
        conversation_id,
        sessions,
    }))
}

pub async fn leave_conversation(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<RoomMembershipResponse>> {
    let sessions = state.hub().leave_user(user.id, conversation_id);
    info!(user_id = user.id, conversation_id, sessions, "removed live sessions from room");

    Ok(Json(RoomMembershipResponse {
        conversation_id,
        sessions,
    }))
}
