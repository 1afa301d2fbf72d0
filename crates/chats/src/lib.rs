//! # Concierge Chats Crate
//!
//! Domain model and persistence for company chat: conversations, members,
//! messages and their side tables, the [`ChatStore`] repository seam with its
//! SQLite implementation, the [`AccessGate`] membership policy and the
//! [`Envelope`] exchanged with connected clients.
//!
//! ## Architecture
//!
//! - **Entities**: rows as the rest of the system sees them
//! - **Repositories**: the async [`ChatStore`] trait and [`SqliteChatStore`]
//! - **Services**: policy built on top of the store
//! - **Types**: errors and the wire envelope
//! - **Utils**: input validation and call-room tokens

pub mod entities;
pub mod repositories;
pub mod services;
pub mod types;
pub mod utils;

pub use entities::{
    CallRoom, ChatType, Conversation, Media, Member, MemberRole, NewConversation, NewMessage,
    PinnedMessage, ReactionCount, ReactionUpdate, ReadReceipt, StoredMessage,
};
pub use repositories::{ChatStore, SqliteChatStore};
pub use services::AccessGate;
pub use types::{ChatError, ChatResult, Envelope, MessageKind, OnlineStatus};

#[cfg(feature = "mock")]
pub use repositories::MockChatStore;
