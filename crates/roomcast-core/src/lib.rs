//! # roomcast-core
//!
//! Room membership, session lifecycle, and collaborator interfaces for the
//! roomcast chat server.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Hub** - process-wide room registry and broadcast fan-out
//! - **Room** - named set of member sessions, alive only while non-empty
//! - **Session** - one connection: identity, lifecycle, bounded outbound queue
//! - **MessageStore** / **TokenResolver** - consumed collaborator interfaces
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Gateway   │────▶│     Hub     │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │MessageStore │     │   Session   │
//!                     └─────────────┘     └─────────────┘
//! ```
//!
//! Broadcast takes a membership snapshot under the hub lock, releases it, and
//! then attempts a non-blocking enqueue onto each member's bounded queue. A
//! slow consumer loses frames; it never stalls the hub or the sender.

pub mod hub;
pub mod identity;
pub mod message;
pub mod room;
pub mod session;
pub mod store;

pub use hub::{BroadcastOutcome, Hub, HubError, HubStats};
pub use identity::{MemoryTokens, TokenResolver};
pub use message::{unix_millis, StoredMessage, UserIdentity};
pub use room::{validate_room_id, Room, MAX_ROOM_ID_LENGTH};
pub use session::{EnqueueOutcome, Session, SessionId, SessionState};
pub use store::{MemoryStore, MessageStats, MessageStore, StoreError};
