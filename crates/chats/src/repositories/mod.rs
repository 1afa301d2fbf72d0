//! Data access layer.

pub mod sqlite;
pub mod store;

pub use sqlite::SqliteChatStore;
pub use store::ChatStore;

#[cfg(feature = "mock")]
pub use store::MockChatStore;
