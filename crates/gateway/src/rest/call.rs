//! Call-room signaling

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Extension, Json, Router,
};
use concierge_chats::{utils::generate_room_token, CallRoom, ChatError, Envelope};
use std::sync::Arc;
use tracing::{info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::AuthUser;
use crate::rest::notify;
use crate::state::GatewayState;

pub fn create_call_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/conversations/:id/call/", post(start_call))
}

/// Open a call room under a fresh token and announce it to the conversation.
pub async fn start_call(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<(StatusCode, Json<CallRoom>)> {
    state.gate().require_access(user.id, conversation_id).await?;

    let call = &state.config().call;
    let mut room = None;

    for attempt in 1..=call.token_attempts {
        let token = generate_room_token(call.token_length);
        if state.store().call_room_token_exists(token.clone()).await? {
            warn!(conversation_id, attempt, "call room token collision");
            continue;
        }
        match state
            .store()
            .create_call_room(conversation_id, user.id, token)
            .await
        {
            Ok(created) => {
                room = Some(created);
                break;
            }
            Err(ChatError::Conflict { .. }) => {
                warn!(conversation_id, attempt, "call room token taken concurrently");
            }
            Err(err) => return Err(err.into()),
        }
    }

    let room = room.ok_or_else(|| {
        GatewayError::InternalError("could not allocate a unique call room token".to_string())
    })?;

    info!(conversation_id, user_id = user.id, room_id = room.id, "call started");
    notify(
        state.hub(),
        &Envelope::notification(conversation_id, user.id, "call_started")
            .with_extra("room_token", room.token.clone()),
    );

    Ok((StatusCode::CREATED, Json(room)))
}
