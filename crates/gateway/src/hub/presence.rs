//! Offline announcements driven by [`SessionClosed`] events.

use std::sync::{Arc, Weak};

use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::{Hub, SessionClosed};

pub fn spawn_presence_relay(hub: &Arc<Hub>) -> JoinHandle<()> {
    let closed = hub.subscribe_closed();
    tokio::spawn(run_presence_relay(Arc::downgrade(hub), closed))
}

/// Broadcast offline status for every closed session, unless the user still
/// has another live session.
pub async fn run_presence_relay(hub: Weak<Hub>, mut closed: broadcast::Receiver<SessionClosed>) {
    loop {
        let event = match closed.recv().await {
            Ok(event) => event,
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "presence relay fell behind");
                continue;
            }
            Err(RecvError::Closed) => break,
        };

        let Some(hub) = hub.upgrade() else { break };

        if hub.is_online(event.user_id) {
            debug!(user_id = event.user_id, "user still connected elsewhere, keeping online");
            continue;
        }

        let delivered = hub.broadcast_user_presence(event.user_id, &event.rooms, false);
        debug!(
            session_id = %event.session_id,
            user_id = event.user_id,
            delivered,
            "announced offline"
        );
    }
}
