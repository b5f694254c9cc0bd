//! Session: the server-side representation of one live connection.
//!
//! A session owns the ordered delivery path for its connection. Outbound
//! envelopes are enqueued onto a bounded queue; a dedicated delivery task
//! drains the queue in FIFO order and is the connection's only writer.
//! Enqueue never blocks: a full queue drops the frame (at-most-once,
//! best-effort delivery is the contract of this subsystem).

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;

use crate::message::UserIdentity;

const ACTIVE: u8 = 0;
const CLOSING: u8 = 1;
const CLOSED: u8 = 2;

/// Counter ensuring unique session ids even within the same nanosecond.
static SESSION_SEQ: AtomicU64 = AtomicU64::new(0);

/// Unique identifier for a session.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh session id.
    #[must_use]
    pub fn generate() -> Self {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos() as u64;
        let seq = SESSION_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("s_{nanos:x}_{seq:x}"))
    }

    /// Get the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connected; frames are accepted for delivery.
    Active,
    /// Teardown started; the queue is closed, remaining frames drain.
    Closing,
    /// Delivery has finished and the connection is gone.
    Closed,
}

/// Outcome of a non-blocking enqueue attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueOutcome {
    /// Frame accepted for ordered delivery.
    Enqueued,
    /// Queue full; the frame was discarded.
    Dropped,
    /// Session is closing or closed; the frame was discarded.
    Closed,
}

/// One live connection: identity, room membership, and the outbound queue.
///
/// The room field is written only by the [`Hub`](crate::hub::Hub) while it
/// holds its registry lock, which keeps membership and the recorded room
/// consistent.
#[derive(Debug)]
pub struct Session {
    id: SessionId,
    user: UserIdentity,
    state: AtomicU8,
    outbound: Mutex<Option<mpsc::Sender<Arc<str>>>>,
    room: Mutex<Option<String>>,
}

impl Session {
    /// Create a session with a bounded outbound queue.
    ///
    /// Returns the session handle and the receiving end of the queue, to be
    /// drained by the connection's delivery task.
    #[must_use]
    pub fn new(user: UserIdentity, queue_capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<str>>) {
        let (tx, rx) = mpsc::channel(queue_capacity.max(1));
        let session = Arc::new(Self {
            id: SessionId::generate(),
            user,
            state: AtomicU8::new(ACTIVE),
            outbound: Mutex::new(Some(tx)),
            room: Mutex::new(None),
        });
        (session, rx)
    }

    /// Get the session id.
    #[must_use]
    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Get the user identity bound at connect time.
    #[must_use]
    pub fn user(&self) -> &UserIdentity {
        &self.user
    }

    /// Get the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        match self.state.load(Ordering::Acquire) {
            ACTIVE => SessionState::Active,
            CLOSING => SessionState::Closing,
            _ => SessionState::Closed,
        }
    }

    /// Get the room this session is currently joined to, if any.
    #[must_use]
    pub fn current_room(&self) -> Option<String> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub(crate) fn set_room(&self, room: Option<String>) {
        *self.room.lock().unwrap_or_else(PoisonError::into_inner) = room;
    }

    pub(crate) fn take_room(&self) -> Option<String> {
        self.room
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Attempt to enqueue a pre-encoded frame for delivery.
    ///
    /// Non-blocking: a full queue drops the frame rather than stalling the
    /// caller, so a broadcaster is never held up by a slow recipient.
    pub fn enqueue(&self, frame: Arc<str>) -> EnqueueOutcome {
        if self.state.load(Ordering::Acquire) != ACTIVE {
            return EnqueueOutcome::Closed;
        }

        let sender = self
            .outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let Some(sender) = sender else {
            return EnqueueOutcome::Closed;
        };

        match sender.try_send(frame) {
            Ok(()) => EnqueueOutcome::Enqueued,
            Err(TrySendError::Full(_)) => {
                debug!(session = %self.id, "outbound queue full, dropping frame");
                EnqueueOutcome::Dropped
            }
            Err(TrySendError::Closed(_)) => EnqueueOutcome::Closed,
        }
    }

    /// Transition Active -> Closing and close the outbound queue.
    ///
    /// Returns `true` for the caller that performed the transition; later
    /// callers get `false`, which makes teardown idempotent.
    pub fn begin_close(&self) -> bool {
        if self
            .state
            .compare_exchange(ACTIVE, CLOSING, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        // Dropping the sender lets the delivery task drain and terminate.
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        debug!(session = %self.id, "session closing");
        true
    }

    /// Mark delivery as finished. Called once the delivery task has drained.
    pub fn mark_closed(&self) {
        self.state.store(CLOSED, Ordering::Release);
    }
}
