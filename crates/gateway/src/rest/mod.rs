//! REST API endpoints for the gateway

pub mod call;
pub mod conversation;
pub mod health;
pub mod member;
pub mod message;
pub mod notification;
pub mod search;

use axum::Router;
use concierge_chats::Envelope;
use std::sync::Arc;
use tracing::debug;

use crate::hub::Hub;
use crate::state::GatewayState;

/// Routes that require an authenticated caller.
pub fn create_rest_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .merge(conversation::create_conversation_routes())
        .merge(message::create_message_routes())
        .merge(member::create_member_routes())
        .merge(call::create_call_routes())
        .merge(search::create_search_routes())
}

/// Routes reachable without a session token.
pub fn create_public_routes() -> Router<Arc<GatewayState>> {
    Router::new()
        .merge(health::create_health_routes())
        .merge(notification::create_notification_routes())
}

/// Fire-and-forget fan-out after a successful write.
pub(crate) fn notify(hub: &Hub, envelope: &Envelope) {
    let outcome = hub.route(envelope);
    debug!(
        conversation_id = envelope.conversation_id,
        kind = %envelope.kind,
        delivered = outcome.delivered,
        dropped = outcome.dropped,
        "notification routed"
    );
}
