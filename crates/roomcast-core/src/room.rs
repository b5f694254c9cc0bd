//! Room: a named set of sessions eligible for the same broadcasts.
//!
//! Rooms exist implicitly. The hub creates an entry on first join and
//! discards it when the last member leaves; an empty room is never
//! addressable.

use std::collections::HashMap;
use std::sync::Arc;

use crate::session::{Session, SessionId};

/// Maximum room id length.
pub const MAX_ROOM_ID_LENGTH: usize = 128;

/// Validate a room id.
///
/// # Errors
///
/// Returns an error message if the room id is invalid.
pub fn validate_room_id(id: &str) -> Result<(), &'static str> {
    if id.is_empty() {
        return Err("room id cannot be empty");
    }
    if id.len() > MAX_ROOM_ID_LENGTH {
        return Err("room id too long");
    }
    if !id.chars().all(|c| c.is_ascii() && !c.is_ascii_control()) {
        return Err("room id contains invalid characters");
    }
    Ok(())
}

/// A room's member set.
#[derive(Debug)]
pub struct Room {
    name: String,
    members: HashMap<SessionId, Arc<Session>>,
}

impl Room {
    /// Create an empty room.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            members: HashMap::new(),
        }
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of members.
    #[must_use]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// Check if the room has no members.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Check if a session is a member.
    #[must_use]
    pub fn contains(&self, session_id: &SessionId) -> bool {
        self.members.contains_key(session_id)
    }

    /// Add a session to the member set.
    pub fn insert(&mut self, session: Arc<Session>) {
        self.members.insert(session.id().clone(), session);
    }

    /// Remove a session from the member set.
    ///
    /// Returns `true` if the session was a member.
    pub fn remove(&mut self, session_id: &SessionId) -> bool {
        self.members.remove(session_id).is_some()
    }

    /// Copy out the current member set.
    ///
    /// The snapshot is what broadcast delivers to, independent of later
    /// membership changes.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Arc<Session>> {
        self.members.values().cloned().collect()
    }
}
