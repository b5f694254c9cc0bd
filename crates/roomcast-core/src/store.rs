//! Message store collaborator interface.
//!
//! Persistence of chat messages is owned by an external collaborator; the
//! broadcast subsystem only appends and reads back recent history. The
//! in-memory implementation here backs the demo binary and the tests.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use thiserror::Error;

use crate::message::{unix_millis, StoredMessage};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The store could not serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Optional statistics capability of a message store.
///
/// Checked at the point of use; callers fall back to a linear scan over
/// `recent(room, 0)` when the store does not provide it.
pub trait MessageStats: Send + Sync {
    /// Number of messages persisted for a room.
    fn room_message_count(&self, room_id: &str) -> usize;
}

/// Persistence interface consumed by the send and history operations.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Append a message to a room's history, assigning id and timestamp.
    async fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError>;

    /// The up-to-`limit` most recent messages for a room, oldest first.
    ///
    /// A `limit` of zero or below returns the full history.
    async fn recent(&self, room_id: &str, limit: i64) -> Result<Vec<StoredMessage>, StoreError>;

    /// The store's statistics capability, when it has one.
    fn stats(&self) -> Option<&dyn MessageStats> {
        None
    }
}

#[derive(Debug, Default)]
struct MemoryInner {
    messages: HashMap<String, Vec<StoredMessage>>,
    next_id: u64,
}

/// In-memory message store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<MemoryInner>,
}

impl MemoryStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl MessageStore for MemoryStore {
    async fn append(
        &self,
        room_id: &str,
        sender_id: &str,
        content: &str,
    ) -> Result<StoredMessage, StoreError> {
        let mut inner = self.lock();
        inner.next_id += 1;
        let message = StoredMessage {
            id: format!("m_{}", inner.next_id),
            room_id: room_id.to_string(),
            sender_id: sender_id.to_string(),
            content: content.to_string(),
            created_at: unix_millis(),
        };
        inner
            .messages
            .entry(room_id.to_string())
            .or_default()
            .push(message.clone());
        Ok(message)
    }

    async fn recent(&self, room_id: &str, limit: i64) -> Result<Vec<StoredMessage>, StoreError> {
        let inner = self.lock();
        let Some(history) = inner.messages.get(room_id) else {
            return Ok(Vec::new());
        };
        let start = if limit <= 0 || limit as usize >= history.len() {
            0
        } else {
            history.len() - limit as usize
        };
        Ok(history[start..].to_vec())
    }

    fn stats(&self) -> Option<&dyn MessageStats> {
        Some(self)
    }
}

impl MessageStats for MemoryStore {
    fn room_message_count(&self, room_id: &str) -> usize {
        self.lock().messages.get(room_id).map_or(0, Vec::len)
    }
}
