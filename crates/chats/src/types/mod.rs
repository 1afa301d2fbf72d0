//! Shared types: errors and the wire envelope.

pub mod envelope;
pub mod errors;

pub use envelope::{Envelope, MessageKind, OnlineStatus};
pub use errors::{ChatError, ChatResult};
