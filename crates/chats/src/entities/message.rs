use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::MessageKind;

/// A persisted message row. Deleted messages keep their row with `deleted_at` set.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StoredMessage {
    pub id: i64,
    pub conversation_id: i64,
    pub sender_id: i64,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub media_id: Option<i64>,
    pub sticker_id: Option<i64>,
    pub is_silent: bool,
    pub extras: Option<Map<String, Value>>,
    pub created_at: String,
    pub edited_at: Option<String>,
    pub deleted_at: Option<String>,
    pub is_pinned: bool,
}

impl StoredMessage {
    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }
}

/// Input for inserting a message.
#[derive(Debug, Clone, PartialEq)]
pub struct NewMessage {
    pub conversation_id: i64,
    pub sender_id: i64,
    pub kind: MessageKind,
    pub content: String,
    pub reply_to_id: Option<i64>,
    pub forwarded_from_id: Option<i64>,
    pub media_id: Option<i64>,
    pub sticker_id: Option<i64>,
    pub is_silent: bool,
    pub extras: Option<Map<String, Value>>,
}

impl NewMessage {
    pub fn text(conversation_id: i64, sender_id: i64, content: impl Into<String>) -> Self {
        Self {
            conversation_id,
            sender_id,
            kind: MessageKind::Text,
            content: content.into(),
            reply_to_id: None,
            forwarded_from_id: None,
            media_id: None,
            sticker_id: None,
            is_silent: false,
            extras: None,
        }
    }
}

/// Uploaded media metadata. Bytes live outside this service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Media {
    pub id: i64,
    pub owner_id: i64,
    pub file_name: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub message_id: Option<i64>,
    pub created_at: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionCount {
    pub emoji: String,
    pub count: i64,
}

/// Result of toggling a reaction: whether it was added and the new totals.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReactionUpdate {
    pub message_id: i64,
    pub emoji: String,
    pub added: bool,
    pub reactions: Vec<ReactionCount>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PinnedMessage {
    pub message: StoredMessage,
    pub pinned_by: i64,
    pub pinned_at: String,
}
