use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ChatError;

/// A conversation owned by one company.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Conversation {
    pub id: i64,
    pub company_id: i64,
    pub chat_type: ChatType,
    pub title: String,
    pub description: Option<String>,
    pub creator_id: i64,
    /// Active (not departed) members
    pub member_count: i64,
    /// Messages that have not been deleted
    pub message_count: i64,
    pub created_at: String,
    pub updated_at: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ChatType {
    Direct,
    Group,
    Channel,
}

impl ChatType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChatType::Direct => "direct",
            ChatType::Group => "group",
            ChatType::Channel => "channel",
        }
    }
}

impl fmt::Display for ChatType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChatType {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "direct" => Ok(ChatType::Direct),
            "group" => Ok(ChatType::Group),
            "channel" => Ok(ChatType::Channel),
            other => Err(ChatError::validation(format!("unknown chat type '{other}'"))),
        }
    }
}

/// Input for creating a conversation. The creator is added as owner and must
/// not be repeated in `members`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub company_id: i64,
    pub creator_id: i64,
    pub chat_type: ChatType,
    pub title: String,
    pub description: Option<String>,
    pub members: Vec<i64>,
}
