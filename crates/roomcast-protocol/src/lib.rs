//! # roomcast-protocol
//!
//! Wire envelope definitions for the roomcast chat server.
//!
//! Every message exchanged over a connection is a JSON text frame carrying an
//! [`Envelope`]: a protocol version, a string type tag, an optional correlation
//! id echoed back on replies, and either a type-specific payload or an error.
//!
//! ## Event types
//!
//! - `chat.join` / `chat.joined` - room membership
//! - `chat.send` / `chat.message` - broadcast messages
//! - `chat.history` / `chat.history.result` - recent-message queries
//! - `system.ping` / `system.pong` - keepalive
//! - `error` - protocol errors
//!
//! ## Example
//!
//! ```rust
//! use roomcast_protocol::{codec, events, Envelope, JoinedPayload};
//!
//! let envelope = Envelope::event(
//!     events::JOINED,
//!     Some("req-1".to_string()),
//!     &JoinedPayload { room_id: "r1".to_string() },
//! )
//! .unwrap();
//!
//! let encoded = codec::encode(&envelope).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(envelope, decoded);
//! ```

pub mod codec;
pub mod envelope;
pub mod version;

pub use codec::{decode, encode, ProtocolError};
pub use envelope::{
    codes, events, ConnectedPayload, Envelope, HistoryItem, HistoryPayload, HistoryResultPayload,
    JoinPayload, JoinedPayload, MessagePayload, SendPayload, SenderInfo, WireError,
};
pub use version::{is_supported, WIRE_VERSION};
