//! In-memory routing core: registry, reaper and presence relay.

pub mod presence;
pub mod reaper;
pub mod registry;

pub use presence::{run_presence_relay, spawn_presence_relay};
pub use reaper::Reaper;
pub use registry::{Hub, RouteOutcome, SessionClosed, SessionHandle};
