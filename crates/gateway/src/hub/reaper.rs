//! Deferred removal of dead peers.

use std::sync::Weak;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::registry::Hub;

/// Drains the reap channel filled by [`Hub::route`] and runs the periodic
/// stale sweep. Exits once the hub is dropped.
pub struct Reaper {
    hub: Weak<Hub>,
    reap_rx: mpsc::UnboundedReceiver<Uuid>,
}

impl Reaper {
    pub(crate) fn new(hub: Weak<Hub>, reap_rx: mpsc::UnboundedReceiver<Uuid>) -> Self {
        Self { hub, reap_rx }
    }

    pub async fn run(mut self, sweep_interval: Duration) {
        let mut sweep = time::interval_at(time::Instant::now() + sweep_interval, sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                next = self.reap_rx.recv() => {
                    let Some(session_id) = next else { break };
                    let Some(hub) = self.hub.upgrade() else { break };
                    if hub.unregister(session_id) {
                        warn!(%session_id, "reaped unresponsive session");
                    }
                }
                _ = sweep.tick() => {
                    let Some(hub) = self.hub.upgrade() else { break };
                    let stale = hub.sweep_stale();
                    if !stale.is_empty() {
                        info!(count = stale.len(), "swept stale sessions");
                    }
                }
            }
        }

        debug!("reaper stopped");
    }

    /// Process every queued reap request without waiting. Returns how many
    /// sessions were actually removed.
    pub fn drain_pending(&mut self) -> usize {
        let Some(hub) = self.hub.upgrade() else {
            return 0;
        };
        let mut removed = 0;
        while let Ok(session_id) = self.reap_rx.try_recv() {
            if hub.unregister(session_id) {
                removed += 1;
            }
        }
        removed
    }
}
