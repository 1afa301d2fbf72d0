//! Server-to-server notification push

use axum::{
    extract::{rejection::JsonRejection, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use concierge_chats::{Envelope, MessageKind};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::require_system_token;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct SystemNotificationRequest {
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub user_ids: Vec<i64>,
    #[serde(default)]
    pub content: String,
    pub extras: Option<Map<String, Value>>,
}

#[derive(Debug, Serialize)]
pub struct SystemNotificationResponse {
    pub delivered: usize,
}

pub fn create_notification_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/ws-notification/", post(push_notification))
}

/// Push a notification to a conversation's room, to specific users, or both.
pub async fn push_notification(
    State(state): State<Arc<GatewayState>>,
    headers: HeaderMap,
    payload: Result<Json<SystemNotificationRequest>, JsonRejection>,
) -> GatewayResult<Json<SystemNotificationResponse>> {
    require_system_token(&headers, &state)?;
    let Json(request) = payload?;

    let conversation_id = request.conversation_id.filter(|id| *id > 0);
    if conversation_id.is_none() && request.user_ids.is_empty() {
        return Err(GatewayError::InvalidRequest(
            "conversation_id or user_ids is required".to_string(),
        ));
    }

    let mut envelope = Envelope::new(MessageKind::Notification, conversation_id.unwrap_or(0), 0)
        .with_content(request.content);
    envelope.extras = request.extras;

    let mut delivered = 0;
    if conversation_id.is_some() {
        delivered += state.hub().route(&envelope).delivered;
    }
    for user_id in &request.user_ids {
        delivered += state.hub().send_to_user(*user_id, envelope.clone());
    }

    info!(
        conversation_id = ?conversation_id,
        users = request.user_ids.len(),
        delivered,
        "system notification pushed"
    );

    Ok(Json(SystemNotificationResponse { delivered }))
}
