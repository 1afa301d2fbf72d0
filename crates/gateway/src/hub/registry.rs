//! The authoritative registry of live sessions and their rooms.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use concierge_chats::Envelope;
use parking_lot::RwLock;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::reaper::Reaper;

const CLOSED_EVENT_CAPACITY: usize = 1024;

/// Registration record for one connection. The hub keeps the only sender of
/// the outbound queue, so dropping the handle closes the queue.
#[derive(Debug)]
pub struct SessionHandle {
    pub id: Uuid,
    pub user_id: i64,
    pub company_id: i64,
    outbound: mpsc::Sender<Envelope>,
}

impl SessionHandle {
    /// Create a handle and the receiving end of its bounded outbound queue.
    pub fn channel(
        user_id: i64,
        company_id: i64,
        capacity: usize,
    ) -> (Self, mpsc::Receiver<Envelope>) {
        let (outbound, receiver) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: Uuid::new_v4(),
            user_id,
            company_id,
            outbound,
        };
        (handle, receiver)
    }
}

/// Emitted once per unregistered session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionClosed {
    pub session_id: Uuid,
    pub user_id: i64,
    pub company_id: i64,
    pub rooms: Vec<i64>,
}

/// Counts from one fan-out, for logging and tests only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RouteOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

#[derive(Debug)]
struct SessionEntry {
    handle: SessionHandle,
    rooms: HashSet<i64>,
    full_at_last_sweep: bool,
}

#[derive(Debug, Default)]
struct HubState {
    sessions: HashMap<Uuid, SessionEntry>,
    rooms: HashMap<i64, HashSet<Uuid>>,
}

impl HubState {
    fn detach(&mut self, session_id: Uuid, room: i64) {
        if let Some(members) = self.rooms.get_mut(&room) {
            members.remove(&session_id);
            if members.is_empty() {
                self.rooms.remove(&room);
            }
        }
    }
}

/// In-memory message router.
///
/// Every method is synchronous and infallible. A session whose queue is full
/// or closed during fan-out is handed to the [`Reaper`] instead of being
/// removed under the read lock.
pub struct Hub {
    state: RwLock<HubState>,
    reap_tx: mpsc::UnboundedSender<Uuid>,
    closed_tx: broadcast::Sender<SessionClosed>,
}

impl Hub {
    /// Build a hub and the reaper that must be spawned next to it.
    pub fn new() -> (Arc<Self>, Reaper) {
        let (reap_tx, reap_rx) = mpsc::unbounded_channel();
        let (closed_tx, _) = broadcast::channel(CLOSED_EVENT_CAPACITY);
        let hub = Arc::new(Self {
            state: RwLock::new(HubState::default()),
            reap_tx,
            closed_tx,
        });
        let reaper = Reaper::new(Arc::downgrade(&hub), reap_rx);
        (hub, reaper)
    }

    /// Stream of [`SessionClosed`] events.
    pub fn subscribe_closed(&self) -> broadcast::Receiver<SessionClosed> {
        self.closed_tx.subscribe()
    }

    /// Add a session and join it to `rooms`. Registering an ID that is already
    /// live merges the rooms and keeps the original queue.
    pub fn register(&self, handle: SessionHandle, rooms: impl IntoIterator<Item = i64>) {
        let session_id = handle.id;
        let user_id = handle.user_id;
        let rooms: Vec<i64> = rooms.into_iter().filter(|room| *room > 0).collect();

        let mut state = self.state.write();
        let HubState {
            sessions,
            rooms: index,
        } = &mut *state;

        let entry = sessions.entry(session_id).or_insert_with(|| SessionEntry {
            handle,
            rooms: HashSet::new(),
            full_at_last_sweep: false,
        });

        for room in rooms {
            entry.rooms.insert(room);
            index.entry(room).or_default().insert(session_id);
        }

        debug!(%session_id, user_id, rooms = entry.rooms.len(), "session registered");
    }

    /// Remove a session from the live set and every room, closing its queue.
    /// Returns false when the session was already gone.
    pub fn unregister(&self, session_id: Uuid) -> bool {
        let entry = {
            let mut state = self.state.write();
            let Some(entry) = state.sessions.remove(&session_id) else {
                return false;
            };
            for room in &entry.rooms {
                state.detach(session_id, *room);
            }
            entry
        };

        let SessionEntry { handle, rooms, .. } = entry;
        let mut rooms: Vec<i64> = rooms.into_iter().collect();
        rooms.sort_unstable();

        let event = SessionClosed {
            session_id,
            user_id: handle.user_id,
            company_id: handle.company_id,
            rooms,
        };
        drop(handle);

        info!(%session_id, user_id = event.user_id, "session unregistered");
        // Nobody listening is fine.
        let _ = self.closed_tx.send(event);
        true
    }

    pub fn join_room(&self, session_id: Uuid, room: i64) -> bool {
        if room <= 0 {
            return false;
        }
        let mut state = self.state.write();
        let HubState {
            sessions,
            rooms: index,
        } = &mut *state;

        let Some(entry) = sessions.get_mut(&session_id) else {
            return false;
        };
        entry.rooms.insert(room);
        index.entry(room).or_default().insert(session_id);
        true
    }

    pub fn leave_room(&self, session_id: Uuid, room: i64) -> bool {
        let mut state = self.state.write();
        let Some(entry) = state.sessions.get_mut(&session_id) else {
            return false;
        };
        let was_member = entry.rooms.remove(&room);
        state.detach(session_id, room);
        was_member
    }

    /// Join every live session of `user_id` to `room`. Returns how many
    /// sessions were affected.
    pub fn join_user(&self, user_id: i64, room: i64) -> usize {
        if room <= 0 {
            return 0;
        }
        let mut state = self.state.write();
        let HubState {
            sessions,
            rooms: index,
        } = &mut *state;

        let mut joined = 0;
        for (session_id, entry) in sessions.iter_mut() {
            if entry.handle.user_id != user_id {
                continue;
            }
            entry.rooms.insert(room);
            index.entry(room).or_default().insert(*session_id);
            joined += 1;
        }
        joined
    }

    pub fn leave_user(&self, user_id: i64, room: i64) -> usize {
        let mut state = self.state.write();
        let affected: Vec<Uuid> = state
            .sessions
            .iter_mut()
            .filter(|(_, entry)| entry.handle.user_id == user_id)
            .filter_map(|(session_id, entry)| entry.rooms.remove(&room).then_some(*session_id))
            .collect();

        for session_id in &affected {
            state.detach(*session_id, room);
        }
        affected.len()
    }

    /// Drop a room entirely, e.g. after its conversation was deleted.
    pub fn close_room(&self, room: i64) -> usize {
        let mut state = self.state.write();
        let Some(members) = state.rooms.remove(&room) else {
            return 0;
        };
        for session_id in &members {
            if let Some(entry) = state.sessions.get_mut(session_id) {
                entry.rooms.remove(&room);
            }
        }
        debug!(room, sessions = members.len(), "room closed");
        members.len()
    }

    /// Fan an envelope out to every session in its room, honouring the echo
    /// rule of its kind. Never blocks.
    pub fn route(&self, envelope: &Envelope) -> RouteOutcome {
        let mut outcome = RouteOutcome::default();
        let state = self.state.read();

        let Some(members) = state.rooms.get(&envelope.conversation_id) else {
            return outcome;
        };

        let skip_sender = !envelope.kind.echoes_to_sender();
        for session_id in members {
            let Some(entry) = state.sessions.get(session_id) else {
                continue;
            };
            if skip_sender && entry.handle.user_id == envelope.sender_id {
                continue;
            }
            if self.deliver(entry, envelope.clone()) {
                outcome.delivered += 1;
            } else {
                outcome.dropped += 1;
            }
        }

        debug!(
            conversation_id = envelope.conversation_id,
            kind = %envelope.kind,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "routed envelope"
        );
        outcome
    }

    /// Deliver to one session only. Same drop policy as [`Hub::route`].
    pub fn send_to_session(&self, session_id: Uuid, envelope: Envelope) -> bool {
        let state = self.state.read();
        match state.sessions.get(&session_id) {
            Some(entry) => self.deliver(entry, envelope),
            None => false,
        }
    }

    /// Deliver to every live session of one user. Returns the number of
    /// sessions that accepted the envelope.
    pub fn send_to_user(&self, user_id: i64, envelope: Envelope) -> usize {
        let state = self.state.read();
        state
            .sessions
            .values()
            .filter(|entry| entry.handle.user_id == user_id)
            .filter(|entry| self.deliver(entry, envelope.clone()))
            .count()
    }

    /// Distinct user IDs with at least one session in `room`, ascending.
    pub fn online_users_in_room(&self, room: i64) -> Vec<i64> {
        let state = self.state.read();
        let mut users: Vec<i64> = state
            .rooms
            .get(&room)
            .into_iter()
            .flatten()
            .filter_map(|session_id| state.sessions.get(session_id))
            .map(|entry| entry.handle.user_id)
            .collect();
        users.sort_unstable();
        users.dedup();
        users
    }

    /// Announce a session's user as online or offline in all of its rooms.
    pub fn broadcast_presence(&self, session_id: Uuid, is_online: bool) -> usize {
        let (user_id, rooms) = {
            let state = self.state.read();
            let Some(entry) = state.sessions.get(&session_id) else {
                return 0;
            };
            (
                entry.handle.user_id,
                entry.rooms.iter().copied().collect::<Vec<_>>(),
            )
        };
        self.broadcast_user_presence(user_id, &rooms, is_online)
    }

    /// Presence fan-out for a user who may no longer have a live session.
    /// A full queue drops the status update; it never marks the peer dead.
    pub fn broadcast_user_presence(&self, user_id: i64, rooms: &[i64], is_online: bool) -> usize {
        let state = self.state.read();
        let mut delivered = 0;

        for room in rooms {
            let Some(members) = state.rooms.get(room) else {
                continue;
            };
            let envelope = Envelope::presence(*room, user_id, is_online);
            for session_id in members {
                let Some(entry) = state.sessions.get(session_id) else {
                    continue;
                };
                if entry.handle.user_id == user_id {
                    continue;
                }
                match entry.handle.outbound.try_send(envelope.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Full(_)) => {
                        warn!(%session_id, user_id, room, "dropping presence update for saturated session");
                    }
                    Err(TrySendError::Closed(_)) => {}
                }
            }
        }
        delivered
    }

    /// Unregister sessions whose receiver is gone or whose queue was full at
    /// this sweep and the one before it.
    pub fn sweep_stale(&self) -> Vec<Uuid> {
        let stale: Vec<Uuid> = {
            let mut state = self.state.write();
            state
                .sessions
                .iter_mut()
                .filter_map(|(session_id, entry)| {
                    if entry.handle.outbound.is_closed() {
                        return Some(*session_id);
                    }
                    let full = entry.handle.outbound.capacity() == 0;
                    let stale = full && entry.full_at_last_sweep;
                    entry.full_at_last_sweep = full;
                    stale.then_some(*session_id)
                })
                .collect()
        };

        stale
            .into_iter()
            .filter(|session_id| self.unregister(*session_id))
            .collect()
    }

    pub fn is_online(&self, user_id: i64) -> bool {
        self.state
            .read()
            .sessions
            .values()
            .any(|entry| entry.handle.user_id == user_id)
    }

    pub fn sessions_for_user(&self, user_id: i64) -> Vec<Uuid> {
        self.state
            .read()
            .sessions
            .iter()
            .filter(|(_, entry)| entry.handle.user_id == user_id)
            .map(|(session_id, _)| *session_id)
            .collect()
    }

    /// Rooms of one session, ascending. `None` if the session is not live.
    pub fn session_rooms(&self, session_id: Uuid) -> Option<Vec<i64>> {
        let state = self.state.read();
        let entry = state.sessions.get(&session_id)?;
        let mut rooms: Vec<i64> = entry.rooms.iter().copied().collect();
        rooms.sort_unstable();
        Some(rooms)
    }

    pub fn room_members(&self, room: i64) -> Vec<Uuid> {
        self.state
            .read()
            .rooms
            .get(&room)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub fn is_member(&self, session_id: Uuid, room: i64) -> bool {
        self.state
            .read()
            .rooms
            .get(&room)
            .is_some_and(|members| members.contains(&session_id))
    }

    pub fn contains_session(&self, session_id: Uuid) -> bool {
        self.state.read().sessions.contains_key(&session_id)
    }

    pub fn session_count(&self) -> usize {
        self.state.read().sessions.len()
    }

    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    fn deliver(&self, entry: &SessionEntry, envelope: Envelope) -> bool {
        match entry.handle.outbound.try_send(envelope) {
            Ok(()) => true,
            Err(err) => {
                let reason = match err {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "outbound queue closed",
                };
                warn!(session_id = %entry.handle.id, user_id = entry.handle.user_id, reason, "scheduling session for removal");
                // Fails only once the reaper is gone, i.e. during shutdown.
                let _ = self.reap_tx.send(entry.handle.id);
                false
            }
        }
    }
}
