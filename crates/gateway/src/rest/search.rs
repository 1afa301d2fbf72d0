use axum::{
    extract::{Query, State},
    routing::get,
    Extension, Json, Router,
};
use concierge_chats::StoredMessage;
use serde::Deserialize;
use std::sync::Arc;

use crate::error::GatewayResult;
use crate::middleware::AuthUser;
use crate::state::GatewayState;

const MAX_SEARCH_RESULTS: i64 = 50;

#[derive(Debug, Deserialize)]
pub struct SearchQuery {
    #[serde(default)]
    pub q: String,
    pub limit: Option<i64>,
}

pub fn create_search_routes() -> Router<Arc<GatewayState>> {
    Router::new().route("/search/", get(search_messages))
}

/// Search message content across every conversation the caller belongs to.
pub async fn search_messages(
    Query(params): Query<SearchQuery>,
    State(state): State<Arc<GatewayState>>,
    Extension(user): Extension<AuthUser>,
) -> GatewayResult<Json<Vec<StoredMessage>>> {
    let limit = params
        .limit
        .unwrap_or(MAX_SEARCH_RESULTS)
        .clamp(1, MAX_SEARCH_RESULTS);

    let messages = state
        .store()
        .search_messages(user.id, params.q, limit)
        .await?;
    Ok(Json(messages))
}
