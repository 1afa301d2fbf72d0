//! Membership policy consulted before any state-changing operation.

use std::sync::Arc;

use tracing::debug;

use crate::entities::{Member, StoredMessage};
use crate::repositories::ChatStore;
use crate::types::{ChatError, ChatResult};

/// Stateless predicate over the store. Answers are never cached, so a
/// member removed over HTTP loses access on the very next check.
#[derive(Clone)]
pub struct AccessGate {
    store: Arc<dyn ChatStore>,
}

impl AccessGate {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<dyn ChatStore> {
        &self.store
    }

    /// Whether the user is an active member of the conversation.
    pub async fn can_access(&self, user_id: i64, conversation_id: i64) -> ChatResult<bool> {
        let allowed = self.store.is_member(user_id, conversation_id).await?;
        if !allowed {
            debug!(user_id, conversation_id, "conversation access denied");
        }
        Ok(allowed)
    }

    pub async fn require_access(&self, user_id: i64, conversation_id: i64) -> ChatResult<Member> {
        self.store
            .get_member(conversation_id, user_id)
            .await?
            .ok_or_else(|| ChatError::access_denied("not a member of this conversation"))
    }

    /// Owners and admins only.
    pub async fn require_admin(&self, user_id: i64, conversation_id: i64) -> ChatResult<Member> {
        let member = self.require_access(user_id, conversation_id).await?;
        if !member.is_admin() {
            return Err(ChatError::permission_denied(
                "only owners and admins can manage this conversation",
            ));
        }
        Ok(member)
    }

    /// Resolve the message's conversation first, then apply the membership
    /// check to it.
    pub async fn require_message_access(
        &self,
        user_id: i64,
        message_id: i64,
    ) -> ChatResult<StoredMessage> {
        let message = self.store.get_message(message_id).await?;
        self.require_access(user_id, message.conversation_id).await?;
        Ok(message)
    }
}
