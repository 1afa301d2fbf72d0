//! Conversation REST endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::get,
    Extension, Json, Router,
};
use concierge_chats::{ChatType, Conversation, Envelope, Member, NewConversation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::AuthUser;
use crate::rest::notify;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct CreateConversationRequest {
    pub title: String,
    pub description: Option<String>,
    pub chat_type: ChatType,
    #[serde(default)]
    pub members: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateConversationRequest {
    pub title: Option<String>,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationDetail {
    #[serde(flatten)]
    pub conversation: Conversation,
    pub members: Vec<Member>,
}

pub fn create_conversation_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/conversations/",
            get(list_conversations).post(create_conversation),
        )
        .route(
            "/conversations/:id/",
            get(get_conversation)
                .put(update_conversation)
                .delete(delete_conversation),
        )
}

pub async fn list_conversations(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<Vec<Conversation>>> {
    let conversations = state.store().list_conversations(user.id).await?;
    Ok(Json(conversations))
}

pub async fn create_conversation(
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<CreateConversationRequest>, JsonRejection>,
) -> GatewayResult<(StatusCode, Json<ConversationDetail>)> {
    let Json(request) = payload?;

    let mut members: Vec<i64> = request
        .members
        .into_iter()
        .filter(|id| *id != user.id)
        .collect();
    members.sort_unstable();
    members.dedup();

    let conversation = state
        .store()
        .create_conversation(NewConversation {
            company_id: user.company_id,
            creator_id: user.id,
            chat_type: request.chat_type,
            title: request.title,
            description: request.description,
            members,
        })
        .await?;
    let members = state.store().list_members(conversation.id).await?;

    for member in &members {
        state.hub().join_user(member.user_id, conversation.id);
    }

    info!(
        conversation_id = conversation.id,
        user_id = user.id,
        chat_type = %conversation.chat_type,
        "conversation created"
    );

    notify(
        state.hub(),
        &Envelope::notification(conversation.id, user.id, "conversation_created")
            .with_extra("title", conversation.title.clone()),
    );

    Ok((
        StatusCode::CREATED,
        Json(ConversationDetail {
            conversation,
            members,
        }),
    ))
}

pub async fn get_conversation(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<ConversationDetail>> {
    state.gate().require_access(user.id, conversation_id).await?;

    let conversation = state.store().get_conversation(conversation_id).await?;
    let members = state.store().list_members(conversation_id).await?;

    Ok(Json(ConversationDetail {
        conversation,
        members,
    }))
}

pub async fn update_conversation(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<UpdateConversationRequest>, JsonRejection>,
) -> GatewayResult<Json<Conversation>> {
    let Json(request) = payload?;
    state.gate().require_admin(user.id, conversation_id).await?;

    let conversation = state
        .store()
        .update_conversation(conversation_id, request.title, request.description)
        .await?;

    let mut envelope = Envelope::notification(conversation_id, user.id, "conversation_updated")
        .with_extra("title", conversation.title.clone());
    if let Some(description) = &conversation.description {
        envelope = envelope.with_extra("description", description.clone());
    }
    notify(state.hub(), &envelope);

    Ok(Json(conversation))
}

/// Only the creator may delete a conversation.
pub async fn delete_conversation(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<StatusCode> {
    state.gate().require_access(user.id, conversation_id).await?;

    let conversation = state.store().get_conversation(conversation_id).await?;
    if conversation.creator_id != user.id {
        return Err(GatewayError::AuthorizationFailed(
            "only the creator can delete this conversation".to_string(),
        ));
    }

    state.store().delete_conversation(conversation_id).await?;

    notify(
        state.hub(),
        &Envelope::notification(conversation_id, user.id, "conversation_deleted"),
    );
    let evicted = state.hub().close_room(conversation_id);
    info!(conversation_id, user_id = user.id, evicted, "conversation deleted");

    Ok(StatusCode::NO_CONTENT)
}
