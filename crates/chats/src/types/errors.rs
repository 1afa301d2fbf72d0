//! Error types for the chat system.

use thiserror::Error;

/// Result type alias for chat operations
pub type ChatResult<T> = Result<T, ChatError>;

/// Main error type for the chat system
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Conversation not found: {id}")]
    ConversationNotFound { id: i64 },

    #[error("Message not found: {id}")]
    MessageNotFound { id: i64 },

    #[error("Member {user_id} not found in conversation {conversation_id}")]
    MemberNotFound { conversation_id: i64, user_id: i64 },

    #[error("Media not found: {id}")]
    MediaNotFound { id: i64 },

    #[error("Access denied: {reason}")]
    AccessDenied { reason: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Conflict: {message}")]
    Conflict { message: String },

    #[error("Internal server error: {message}")]
    Internal { message: String },
}

impl ChatError {
    pub fn conversation_not_found(id: i64) -> Self {
        Self::ConversationNotFound { id }
    }

    pub fn message_not_found(id: i64) -> Self {
        Self::MessageNotFound { id }
    }

    pub fn member_not_found(conversation_id: i64, user_id: i64) -> Self {
        Self::MemberNotFound {
            conversation_id,
            user_id,
        }
    }

    pub fn media_not_found(id: i64) -> Self {
        Self::MediaNotFound { id }
    }

    /// Create an access denied error
    pub fn access_denied(reason: impl Into<String>) -> Self {
        Self::AccessDenied {
            reason: reason.into(),
        }
    }

    /// Create a permission denied error
    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::PermissionDenied {
            reason: reason.into(),
        }
    }

    /// Create a validation error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict {
            message: message.into(),
        }
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ConversationNotFound { .. }
                | Self::MessageNotFound { .. }
                | Self::MemberNotFound { .. }
                | Self::MediaNotFound { .. }
        )
    }
}

impl From<serde_json::Error> for ChatError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: format!("JSON serialization error: {}", err),
        }
    }
}
