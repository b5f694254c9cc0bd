//! The hub: single source of truth for room membership.
//!
//! All membership reads and writes funnel through one registry-wide mutex,
//! held only for map manipulation. Broadcast copies the member set under the
//! lock, releases it, and then attempts non-blocking delivery against the
//! copy, so a slow consumer never stalls the broadcaster or unrelated rooms.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, trace};

use crate::room::{validate_room_id, Room};
use crate::session::{EnqueueOutcome, Session, SessionId};

/// Hub errors.
#[derive(Debug, Error)]
pub enum HubError {
    /// Invalid room id.
    #[error("invalid room id: {0}")]
    InvalidRoom(&'static str),
}

/// Result of one broadcast fan-out.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    /// Frames accepted onto member queues.
    pub delivered: usize,
    /// Frames discarded because a member's queue was full.
    pub dropped: usize,
    /// Members already closing when delivery was attempted.
    pub skipped: usize,
}

/// Hub statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HubStats {
    /// Connected sessions.
    pub sessions: usize,
    /// Rooms with at least one member.
    pub rooms: usize,
    /// Total memberships across all rooms.
    pub members: usize,
}

/// Process-wide room registry.
///
/// Constructed once by the process entry point and passed by reference to
/// every component that needs it; tests construct an isolated hub per case.
#[derive(Debug, Default)]
pub struct Hub {
    /// Rooms indexed by id. The single exclusion point for membership.
    rooms: Mutex<HashMap<String, Room>>,
    /// All connected sessions, for stats and lifecycle tracking.
    sessions: DashMap<SessionId, Arc<Session>>,
}

impl Hub {
    /// Create an empty hub.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn table(&self) -> MutexGuard<'_, HashMap<String, Room>> {
        self.rooms.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Track a newly connected session.
    pub fn register(&self, session: Arc<Session>) {
        debug!(session = %session.id(), user = %session.user().user_id, "session registered");
        self.sessions.insert(session.id().clone(), session);
    }

    /// Join a session to a room, superseding any prior membership.
    ///
    /// The removal from the old room and insertion into the new one happen
    /// under the same lock acquisition, so the session is never visible in
    /// two rooms. Idempotent when already a member of `room_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the room id is invalid.
    pub fn join(&self, room_id: &str, session: &Arc<Session>) -> Result<(), HubError> {
        validate_room_id(room_id).map_err(HubError::InvalidRoom)?;

        let mut rooms = self.table();

        if session.current_room().as_deref() == Some(room_id) {
            return Ok(());
        }

        if let Some(prev) = session.take_room() {
            remove_member(&mut rooms, &prev, session.id());
        }

        let room = rooms
            .entry(room_id.to_string())
            .or_insert_with(|| {
                debug!(room = %room_id, "creating room");
                Room::new(room_id)
            });
        room.insert(session.clone());
        session.set_room(Some(room_id.to_string()));

        debug!(
            room = %room_id,
            session = %session.id(),
            members = room.len(),
            "joined"
        );

        Ok(())
    }

    /// Remove a session from its current room, if any.
    ///
    /// Discards the room entry when it empties. No-op for a session without
    /// a room.
    pub fn leave(&self, session: &Session) {
        let mut rooms = self.table();

        let Some(room_id) = session.take_room() else {
            return;
        };
        remove_member(&mut rooms, &room_id, session.id());

        debug!(room = %room_id, session = %session.id(), "left");
    }

    /// Fan a pre-encoded frame out to every current member of a room.
    ///
    /// Delivery runs against a snapshot taken under the lock: sessions that
    /// join after the snapshot miss the frame, sessions that leave in between
    /// may still receive it. Broadcast to an unknown room is a no-op.
    pub fn broadcast(&self, room_id: &str, frame: Arc<str>) -> BroadcastOutcome {
        let members = {
            let rooms = self.table();
            match rooms.get(room_id) {
                Some(room) => room.snapshot(),
                None => Vec::new(),
            }
        };

        let mut outcome = BroadcastOutcome::default();
        for member in members {
            match member.enqueue(frame.clone()) {
                EnqueueOutcome::Enqueued => outcome.delivered += 1,
                EnqueueOutcome::Dropped => outcome.dropped += 1,
                EnqueueOutcome::Closed => outcome.skipped += 1,
            }
        }

        trace!(
            room = %room_id,
            delivered = outcome.delivered,
            dropped = outcome.dropped,
            "broadcast"
        );

        outcome
    }

    /// Tear a session down: vacate its room and stop tracking it.
    ///
    /// Idempotent; concurrent teardown paths (read failure racing an explicit
    /// close) vacate the room exactly once.
    pub fn disconnect(&self, session: &Arc<Session>) {
        if !session.begin_close() {
            return;
        }
        self.leave(session);
        self.sessions.remove(session.id());
        debug!(session = %session.id(), "session disconnected");
    }

    /// Get the member count of a room. Zero for unknown rooms.
    #[must_use]
    pub fn member_count(&self, room_id: &str) -> usize {
        self.table().get(room_id).map_or(0, Room::len)
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let rooms = self.table();
        HubStats {
            sessions: self.sessions.len(),
            rooms: rooms.len(),
            members: rooms.values().map(Room::len).sum(),
        }
    }
}

fn remove_member(rooms: &mut HashMap<String, Room>, room_id: &str, session_id: &SessionId) {
    if let Some(room) = rooms.get_mut(room_id) {
        room.remove(session_id);
        if room.is_empty() {
            rooms.remove(room_id);
            debug!(room = %room_id, "deleted empty room");
        }
    }
}
