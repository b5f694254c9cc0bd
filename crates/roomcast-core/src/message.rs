//! Message and identity types shared between the hub and its collaborators.

use std::time::{SystemTime, UNIX_EPOCH};

/// Milliseconds since the unix epoch.
#[must_use]
pub fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// User identity resolved at connect time, immutable for the session's life.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    /// Stable user id.
    pub user_id: String,
    /// Display name.
    pub nickname: String,
}

impl UserIdentity {
    /// Create a new identity.
    #[must_use]
    pub fn new(user_id: impl Into<String>, nickname: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            nickname: nickname.into(),
        }
    }
}

/// A message as persisted by the message store.
///
/// Created only through the send operation; never mutated afterwards.
/// Ordering is by creation sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    /// Store-assigned message id.
    pub id: String,
    /// Room the message was sent to.
    pub room_id: String,
    /// Sender's user id.
    pub sender_id: String,
    /// Message body.
    pub content: String,
    /// Creation timestamp, milliseconds since the unix epoch.
    pub created_at: u64,
}
