//! Message REST endpoints

use axum::{
    extract::{rejection::JsonRejection, Multipart, Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Extension, Json, Router,
};
use concierge_chats::{
    utils::Validator, ChatType, Envelope, MessageKind, NewMessage, PinnedMessage, ReactionUpdate,
    StoredMessage,
};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::AuthUser;
use crate::rest::notify;
use crate::state::GatewayState;

/// Name of the multipart field carrying the JSON message body.
const DATA_FIELD: &str = "data";

#[derive(Debug, Deserialize)]
pub struct ListMessagesQuery {
    pub before: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SendMessageRequest {
    #[serde(rename = "type", alias = "message_type", default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub content: String,
    pub reply_to_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub media_id: Option<i64>,
    pub sticker_id: Option<i64>,
    #[serde(default)]
    pub is_silent: bool,
    pub extras: Option<Map<String, Value>>,
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

#[derive(Debug, Deserialize)]
pub struct EditMessageRequest {
    pub message_id: i64,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct MessageRef {
    pub message_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct ReactRequest {
    pub message_id: i64,
    pub emoji: String,
}

#[derive(Debug, Deserialize)]
pub struct PinRequest {
    pub message_id: i64,
    /// Toggles the current state when absent.
    pub pinned: Option<bool>,
}

pub fn create_message_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/conversations/:id/message/",
            get(list_messages).post(send_message).put(edit_message),
        )
        .route("/conversations/:id/message/owner/", delete(delete_message))
        .route("/conversations/:id/message/react/", post(react_to_message))
        .route("/conversations/:id/pin/", post(pin_message))
        .route("/conversations/:id/pinned/", get(list_pinned))
}

pub async fn list_messages(
    Path(conversation_id): Path<i64>,
    Query(params): Query<ListMessagesQuery>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<Vec<StoredMessage>>> {
    state.gate().require_access(user.id, conversation_id).await?;

    let limit = Validator::page_size(params.limit);
    let messages = state
        .store()
        .list_messages(conversation_id, params.before, limit)
        .await?;

    Ok(Json(messages))
}

/// Send a message. The body is multipart with the JSON message in the `data`
/// field; media is uploaded elsewhere and referenced by `media_id`.
pub async fn send_message(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    mut multipart: Multipart,
) -> GatewayResult<(StatusCode, Json<StoredMessage>)> {
    let mut request: Option<SendMessageRequest> = None;

    while let Some(field) = multipart.next_field().await? {
        if field.file_name().is_some() {
            return Err(GatewayError::InvalidRequest(
                "file parts are not accepted; reference uploaded media by media_id".to_string(),
            ));
        }
        if field.name() == Some(DATA_FIELD) {
            let text = field.text().await?;
            request = Some(serde_json::from_str(&text)?);
        } else {
            debug!(field = ?field.name(), "ignoring unknown multipart field");
        }
    }

    let request = request.ok_or_else(|| {
        GatewayError::InvalidRequest(format!("missing '{DATA_FIELD}' field"))
    })?;

    if !matches!(
        request.kind,
        MessageKind::Message | MessageKind::Text | MessageKind::Sticker
    ) {
        return Err(GatewayError::InvalidRequest(format!(
            "'{}' cannot be sent as a message",
            request.kind
        )));
    }

    state.gate().require_access(user.id, conversation_id).await?;
    if let Some(source_id) = request.forwarded_from_id {
        state
            .gate()
            .require_message_access(user.id, source_id)
            .await?;
    }

    let message = state
        .store()
        .create_message(NewMessage {
            conversation_id,
            sender_id: user.id,
            kind: request.kind,
            content: request.content,
            reply_to_id: request.reply_to_id,
            forwarded_from_id: request.forwarded_from_id,
            media_id: request.media_id,
            sticker_id: request.sticker_id,
            is_silent: request.is_silent,
            extras: request.extras,
        })
        .await?;

    info!(
        conversation_id,
        message_id = message.id,
        user_id = user.id,
        "message sent"
    );
    notify(state.hub(), &Envelope::from_stored(message.kind, &message));

    Ok((StatusCode::CREATED, Json(message)))
}

pub async fn edit_message(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<EditMessageRequest>, JsonRejection>,
) -> GatewayResult<Json<StoredMessage>> {
    let Json(request) = payload?;

    let message = message_in_conversation(&state, &user, conversation_id, request.message_id).await?;
    if message.sender_id != user.id {
        return Err(GatewayError::AuthorizationFailed(
            "only the sender can edit a message".to_string(),
        ));
    }

    let edited = state
        .store()
        .edit_message(request.message_id, request.content)
        .await?;
    notify(state.hub(), &Envelope::from_stored(MessageKind::Edit, &edited));

    Ok(Json(edited))
}

/// Senders delete their own messages; owners and admins delete any.
pub async fn delete_message(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<MessageRef>, JsonRejection>,
) -> GatewayResult<StatusCode> {
    let Json(request) = payload?;

    let message = message_in_conversation(&state, &user, conversation_id, request.message_id).await?;
    if message.sender_id != user.id {
        state.gate().require_admin(user.id, conversation_id).await?;
    }

    let deleted = state.store().delete_message(request.message_id).await?;

    let mut envelope = Envelope::new(MessageKind::Delete, conversation_id, user.id);
    envelope.id = Some(deleted.id);
    envelope.created_at = deleted.deleted_at.clone();
    notify(state.hub(), &envelope);

    info!(conversation_id, message_id = deleted.id, user_id = user.id, "message deleted");
    Ok(StatusCode::NO_CONTENT)
}

pub async fn react_to_message(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<ReactRequest>, JsonRejection>,
) -> GatewayResult<Json<ReactionUpdate>> {
    let Json(request) = payload?;

    message_in_conversation(&state, &user, conversation_id, request.message_id).await?;

    let update = state
        .store()
        .toggle_reaction(request.message_id, user.id, request.emoji)
        .await?;

    let mut envelope = Envelope::new(MessageKind::Reaction, conversation_id, user.id)
        .with_extra("emoji", update.emoji.clone())
        .with_extra("added", update.added)
        .with_extra("reactions", serde_json::to_value(&update.reactions)?);
    envelope.id = Some(update.message_id);
    notify(state.hub(), &envelope);

    Ok(Json(update))
}

/// Pin or unpin a message. Channels restrict pinning to owners and admins.
pub async fn pin_message(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<PinRequest>, JsonRejection>,
) -> GatewayResult<Json<StoredMessage>> {
    let Json(request) = payload?;

    let message = message_in_conversation(&state, &user, conversation_id, request.message_id).await?;
    let conversation = state.store().get_conversation(conversation_id).await?;
    if conversation.chat_type == ChatType::Channel {
        state.gate().require_admin(user.id, conversation_id).await?;
    }

    let pinned = request.pinned.unwrap_or(!message.is_pinned);
    let updated = state
        .store()
        .set_pinned(request.message_id, user.id, pinned)
        .await?;

    notify(
        state.hub(),
        &Envelope::from_stored(MessageKind::Pin, &updated).with_extra("pinned", updated.is_pinned),
    );

    Ok(Json(updated))
}

pub async fn list_pinned(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<Vec<PinnedMessage>>> {
    state.gate().require_access(user.id, conversation_id).await?;
    let pinned = state.store().list_pinned(conversation_id).await?;
    Ok(Json(pinned))
}

/// Resolve a live message the caller may see and check it belongs to the
/// conversation in the path.
async fn message_in_conversation(
    state: &GatewayState,
    user: &AuthUser,
    conversation_id: i64,
    message_id: i64,
) -> GatewayResult<StoredMessage> {
    let message = state
        .gate()
        .require_message_access(user.id, message_id)
        .await?;
    if message.conversation_id != conversation_id {
        return Err(GatewayError::NotFound(format!(
            "message {message_id} is not in conversation {conversation_id}"
        )));
    }
    Ok(message)
}
