//! Validation utilities.

use crate::entities::ChatType;
use crate::types::ChatError;

pub const MAX_TITLE_LENGTH: usize = 255;
pub const MAX_DESCRIPTION_LENGTH: usize = 2_000;
pub const MAX_CONTENT_LENGTH: usize = 100_000;
pub const MAX_EMOJI_LENGTH: usize = 32;
pub const MAX_SEARCH_LENGTH: usize = 200;
pub const DEFAULT_PAGE_SIZE: i64 = 50;
pub const MAX_PAGE_SIZE: i64 = 200;

/// Validation utilities
pub struct Validator;

impl Validator {
    /// Group and channel conversations need a title; direct ones may go without.
    pub fn conversation_title(chat_type: ChatType, title: &str) -> Result<(), ChatError> {
        if chat_type != ChatType::Direct && title.trim().is_empty() {
            return Err(ChatError::validation("Conversation title cannot be empty"));
        }

        if title.chars().count() > MAX_TITLE_LENGTH {
            return Err(ChatError::validation(format!(
                "Conversation title too long (max {MAX_TITLE_LENGTH} characters)"
            )));
        }

        Ok(())
    }

    pub fn description(description: Option<&str>) -> Result<(), ChatError> {
        if description.is_some_and(|d| d.chars().count() > MAX_DESCRIPTION_LENGTH) {
            return Err(ChatError::validation(format!(
                "Description too long (max {MAX_DESCRIPTION_LENGTH} characters)"
            )));
        }
        Ok(())
    }

    /// Validate message content. Media and sticker messages may carry no text.
    pub fn message_content(content: &str, has_attachment: bool) -> Result<(), ChatError> {
        if content.trim().is_empty() && !has_attachment {
            return Err(ChatError::validation("Message content cannot be empty"));
        }

        if content.len() > MAX_CONTENT_LENGTH {
            return Err(ChatError::validation(
                "Message content too long (max 100,000 characters)",
            ));
        }

        Ok(())
    }

    pub fn emoji(emoji: &str) -> Result<(), ChatError> {
        let trimmed = emoji.trim();
        if trimmed.is_empty() {
            return Err(ChatError::validation("Reaction cannot be empty"));
        }
        if trimmed.chars().count() > MAX_EMOJI_LENGTH {
            return Err(ChatError::validation("Reaction too long"));
        }
        Ok(())
    }

    pub fn search_query(query: &str) -> Result<(), ChatError> {
        let trimmed = query.trim();
        if trimmed.is_empty() {
            return Err(ChatError::validation("Search query cannot be empty"));
        }
        if trimmed.chars().count() > MAX_SEARCH_LENGTH {
            return Err(ChatError::validation(format!(
                "Search query too long (max {MAX_SEARCH_LENGTH} characters)"
            )));
        }
        Ok(())
    }

    /// Clamp a requested page size into `1..=MAX_PAGE_SIZE`.
    pub fn page_size(limit: Option<i64>) -> i64 {
        limit.unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, MAX_PAGE_SIZE)
    }
}
