use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::types::ChatError;

/// Active membership of a user in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Member {
    pub conversation_id: i64,
    pub user_id: i64,
    pub role: MemberRole,
    pub joined_at: String,
    pub last_read_message_id: Option<i64>,
}

impl Member {
    /// Owners and admins manage membership and conversation details.
    pub fn is_admin(&self) -> bool {
        matches!(self.role, MemberRole::Owner | MemberRole::Admin)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum MemberRole {
    Owner,
    Admin,
    Member,
}

impl MemberRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberRole::Owner => "owner",
            MemberRole::Admin => "admin",
            MemberRole::Member => "member",
        }
    }
}

impl fmt::Display for MemberRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MemberRole {
    type Err = ChatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "owner" => Ok(MemberRole::Owner),
            "admin" => Ok(MemberRole::Admin),
            "member" => Ok(MemberRole::Member),
            other => Err(ChatError::validation(format!("unknown member role '{other}'"))),
        }
    }
}

/// Read position of one member after a `message_read` event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReadReceipt {
    pub conversation_id: i64,
    pub user_id: i64,
    pub last_read_message_id: Option<i64>,
    pub last_read_at: String,
}
