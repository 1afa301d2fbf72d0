//! The repository seam between the real-time core and persistence.

use async_trait::async_trait;

use crate::entities::{
    CallRoom, Conversation, Media, Member, MemberRole, NewConversation, NewMessage,
    PinnedMessage, ReactionUpdate, ReadReceipt, StoredMessage,
};
use crate::types::ChatResult;

/// Persistence and membership queries used by sessions and HTTP handlers.
///
/// Implementations run multi-statement writes inside one transaction.
#[cfg_attr(feature = "mock", mockall::automock)]
#[async_trait]
pub trait ChatStore: Send + Sync {
    // Conversations

    async fn create_conversation(&self, new: NewConversation) -> ChatResult<Conversation>;

    async fn get_conversation(&self, conversation_id: i64) -> ChatResult<Conversation>;

    async fn list_conversations(&self, user_id: i64) -> ChatResult<Vec<Conversation>>;

    async fn update_conversation(
        &self,
        conversation_id: i64,
        title: Option<String>,
        description: Option<String>,
    ) -> ChatResult<Conversation>;

    async fn delete_conversation(&self, conversation_id: i64) -> ChatResult<()>;

    /// IDs of every conversation the user is an active member of.
    async fn conversation_ids_for_user(&self, user_id: i64) -> ChatResult<Vec<i64>>;

    // Members

    async fn is_member(&self, user_id: i64, conversation_id: i64) -> ChatResult<bool>;

    async fn get_member(&self, conversation_id: i64, user_id: i64) -> ChatResult<Option<Member>>;

    async fn list_members(&self, conversation_id: i64) -> ChatResult<Vec<Member>>;

    /// Adds or reactivates members and returns only the ones that changed.
    async fn add_members(&self, conversation_id: i64, user_ids: Vec<i64>)
        -> ChatResult<Vec<Member>>;

    async fn set_member_role(
        &self,
        conversation_id: i64,
        user_id: i64,
        role: MemberRole,
    ) -> ChatResult<Member>;

    async fn remove_member(&self, conversation_id: i64, user_id: i64) -> ChatResult<()>;

    // Messages

    async fn create_message(&self, new: NewMessage) -> ChatResult<StoredMessage>;

    async fn get_message(&self, message_id: i64) -> ChatResult<StoredMessage>;

    /// Newest `limit` live messages older than `before`, oldest first.
    async fn list_messages(
        &self,
        conversation_id: i64,
        before: Option<i64>,
        limit: i64,
    ) -> ChatResult<Vec<StoredMessage>>;

    async fn edit_message(&self, message_id: i64, content: String) -> ChatResult<StoredMessage>;

    async fn delete_message(&self, message_id: i64) -> ChatResult<StoredMessage>;

    /// Advance the member's read position. `None` means the latest message.
    async fn mark_read(
        &self,
        conversation_id: i64,
        user_id: i64,
        message_id: Option<i64>,
    ) -> ChatResult<ReadReceipt>;

    async fn toggle_reaction(
        &self,
        message_id: i64,
        user_id: i64,
        emoji: String,
    ) -> ChatResult<ReactionUpdate>;

    async fn set_pinned(
        &self,
        message_id: i64,
        user_id: i64,
        pinned: bool,
    ) -> ChatResult<StoredMessage>;

    async fn list_pinned(&self, conversation_id: i64) -> ChatResult<Vec<PinnedMessage>>;

    async fn search_messages(
        &self,
        user_id: i64,
        query: String,
        limit: i64,
    ) -> ChatResult<Vec<StoredMessage>>;

    // Media and calls

    async fn register_media(
        &self,
        owner_id: i64,
        file_name: String,
        content_type: String,
        size_bytes: i64,
    ) -> ChatResult<Media>;

    async fn call_room_token_exists(&self, token: String) -> ChatResult<bool>;

    async fn create_call_room(
        &self,
        conversation_id: i64,
        created_by: i64,
        token: String,
    ) -> ChatResult<CallRoom>;
}
