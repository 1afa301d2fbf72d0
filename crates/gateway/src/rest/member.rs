//! Member REST endpoints

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use concierge_chats::{Envelope, Member, MemberRole};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

use crate::error::{GatewayError, GatewayResult};
use crate::middleware::AuthUser;
use crate::rest::notify;
use crate::state::GatewayState;

#[derive(Debug, Deserialize)]
pub struct AddMembersRequest {
    pub user_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateMemberRoleRequest {
    pub user_id: i64,
    pub role: MemberRole,
}

#[derive(Debug, Deserialize)]
pub struct RemoveMemberRequest {
    pub user_id: i64,
}

#[derive(Debug, Serialize)]
pub struct OnlineUsersResponse {
    pub conversation_id: i64,
    pub user_ids: Vec<i64>,
}

pub fn create_member_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .route(
            "/conversations/:id/member/",
            post(add_members).put(update_member_role),
        )
        .route("/conversations/:id/member/remove/", post(remove_member))
        .route("/conversations/:id/online/", get(online_users))
}

pub async fn add_members(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<AddMembersRequest>, JsonRejection>,
) -> GatewayResult<Json<Vec<Member>>> {
    let Json(request) = payload?;
    state.gate().require_admin(user.id, conversation_id).await?;

    let added = state
        .store()
        .add_members(conversation_id, request.user_ids)
        .await?;

    for member in &added {
        state.hub().join_user(member.user_id, conversation_id);
    }

    if !added.is_empty() {
        let user_ids: Vec<Value> = added.iter().map(|m| Value::from(m.user_id)).collect();
        info!(conversation_id, user_id = user.id, added = added.len(), "members added");
        notify(
            state.hub(),
            &Envelope::notification(conversation_id, user.id, "members_added")
                .with_extra("user_ids", user_ids),
        );
    }

    Ok(Json(added))
}

pub async fn update_member_role(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<UpdateMemberRoleRequest>, JsonRejection>,
) -> GatewayResult<Json<Member>> {
    let Json(request) = payload?;
    state.gate().require_admin(user.id, conversation_id).await?;

    let member = state
        .store()
        .set_member_role(conversation_id, request.user_id, request.role)
        .await?;

    notify(
        state.hub(),
        &Envelope::notification(conversation_id, user.id, "member_role_changed")
            .with_extra("user_id", member.user_id)
            .with_extra("role", member.role.as_str()),
    );

    Ok(Json(member))
}

/// Admins remove anyone but the owner; everyone else may only remove
/// themselves.
pub async fn remove_member(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
    payload: Result<Json<RemoveMemberRequest>, JsonRejection>,
) -> GatewayResult<StatusCode> {
    let Json(request) = payload?;

    if request.user_id == user.id {
        state.gate().require_access(user.id, conversation_id).await?;
    } else {
        state.gate().require_admin(user.id, conversation_id).await?;
    }

    let target = state
        .store()
        .get_member(conversation_id, request.user_id)
        .await?
        .ok_or_else(|| {
            GatewayError::NotFound(format!(
                "user {} is not a member of conversation {conversation_id}",
                request.user_id
            ))
        })?;
    if target.role == MemberRole::Owner {
        return Err(GatewayError::AuthorizationFailed(
            "the owner cannot be removed".to_string(),
        ));
    }

    state
        .store()
        .remove_member(conversation_id, request.user_id)
        .await?;

    // Notify first so the removed user's sessions still hear about it.
    notify(
        state.hub(),
        &Envelope::notification(conversation_id, user.id, "member_removed")
            .with_extra("user_id", request.user_id),
    );
    let detached = state.hub().leave_user(request.user_id, conversation_id);
    info!(
        conversation_id,
        removed_user_id = request.user_id,
        user_id = user.id,
        detached,
        "member removed"
    );

    Ok(StatusCode::NO_CONTENT)
}

pub async fn online_users(
    Path(conversation_id): Path<i64>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<OnlineUsersResponse>> {
    state.gate().require_access(user.id, conversation_id).await?;

    Ok(Json(OnlineUsersResponse {
        conversation_id,
        user_ids: state.hub().online_users_in_room(conversation_id),
    }))
}
