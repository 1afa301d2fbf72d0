//! Persisted chat entities.

pub mod conversation;
pub mod member;
pub mod message;
pub mod room;

pub use conversation::{ChatType, Conversation, NewConversation};
pub use member::{Member, MemberRole, ReadReceipt};
pub use message::{
    Media, NewMessage, PinnedMessage, ReactionCount, ReactionUpdate, StoredMessage,
};
pub use room::CallRoom;
