//! Envelope and payload types for the roomcast protocol.
//!
//! An envelope is the unit of wire communication. Exactly one of `data` and
//! `error` is populated on any outbound envelope; inbound envelopes carry
//! `data` (possibly empty, as for `system.ping`).

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::codec::ProtocolError;
use crate::version;

/// Event type tags recognized on the wire.
pub mod events {
    /// Inbound: join a room, superseding any prior membership.
    pub const JOIN: &str = "chat.join";
    /// Inbound: broadcast a message to the sender's current room.
    pub const SEND: &str = "chat.send";
    /// Inbound: query recent messages for a room.
    pub const HISTORY: &str = "chat.history";
    /// Inbound: keepalive probe.
    pub const PING: &str = "system.ping";

    /// Outbound: connection established, identity resolved.
    pub const CONNECTED: &str = "system.connected";
    /// Outbound: join confirmed.
    pub const JOINED: &str = "chat.joined";
    /// Outbound: a message broadcast into a room.
    pub const MESSAGE: &str = "chat.message";
    /// Outbound: ordered history query result.
    pub const HISTORY_RESULT: &str = "chat.history.result";
    /// Outbound: keepalive reply.
    pub const PONG: &str = "system.pong";
    /// Outbound: protocol error.
    pub const ERROR: &str = "error";
}

/// Business error codes carried in the `error` member.
pub mod codes {
    /// Missing or invalid access token at connect time.
    pub const UNAUTHORIZED: u16 = 1001;
    /// Envelope text could not be decoded.
    pub const MALFORMED: u16 = 2001;
    /// Unrecognized event type.
    pub const UNKNOWN_EVENT: u16 = 3001;
    /// Malformed `chat.join` payload.
    pub const INVALID_JOIN: u16 = 3002;
    /// Malformed `chat.send` payload.
    pub const INVALID_SEND: u16 = 3003;
    /// `chat.send` into a room the session has not joined.
    pub const NOT_JOINED: u16 = 3004;
    /// Malformed `chat.history` payload.
    pub const INVALID_HISTORY: u16 = 3005;
    /// Message store failed mid-request.
    pub const STORE_UNAVAILABLE: u16 = 5001;
}

/// Error detail carried by an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireError {
    /// Business error code, see [`codes`].
    pub code: u16,
    /// Human-readable message.
    pub message: String,
}

/// The wire envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Wire protocol version.
    #[serde(default = "version::wire_default")]
    pub v: u8,

    /// Event type tag.
    #[serde(rename = "type")]
    pub kind: String,

    /// Caller-supplied correlation id, echoed back on replies.
    #[serde(rename = "requestId", default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,

    /// Type-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,

    /// Error detail, populated instead of `data` on failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<WireError>,
}

impl Envelope {
    /// Build a success envelope carrying a serialized payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the payload cannot be represented as JSON.
    pub fn event<T: Serialize>(
        kind: &str,
        request_id: Option<String>,
        data: &T,
    ) -> Result<Self, ProtocolError> {
        let data = serde_json::to_value(data).map_err(ProtocolError::Encode)?;
        Ok(Self {
            v: version::WIRE_VERSION,
            kind: kind.to_string(),
            request_id,
            data: Some(data),
            error: None,
        })
    }

    /// Build an error envelope.
    #[must_use]
    pub fn error(request_id: Option<String>, code: u16, message: impl Into<String>) -> Self {
        Self {
            v: version::WIRE_VERSION,
            kind: events::ERROR.to_string(),
            request_id,
            data: None,
            error: Some(WireError {
                code,
                message: message.into(),
            }),
        }
    }

    /// Deserialize the payload into a typed struct.
    ///
    /// # Errors
    ///
    /// Returns an error on schema mismatch or a missing required field.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        let data = self.data.clone().unwrap_or(Value::Null);
        serde_json::from_value(data).map_err(ProtocolError::Payload)
    }
}

/// `chat.join` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub room_id: String,
}

/// `chat.send` request payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendPayload {
    pub room_id: String,
    pub content: String,
}

/// `chat.history` request payload.
///
/// A `limit` of zero or below requests the full history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryPayload {
    pub room_id: String,
    #[serde(default)]
    pub limit: i64,
}

/// `system.connected` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedPayload {
    pub user_id: String,
}

/// `chat.joined` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    pub room_id: String,
}

/// Sender identity embedded in a `chat.message` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SenderInfo {
    pub id: String,
    pub nickname: String,
}

/// `chat.message` broadcast payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagePayload {
    pub id: String,
    pub room_id: String,
    pub sender: SenderInfo,
    pub content: String,
    pub created_at: u64,
}

/// One entry of a `chat.history.result` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryItem {
    pub id: String,
    pub content: String,
    pub created_at: u64,
}

/// `chat.history.result` payload, ordered oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryResultPayload {
    pub items: Vec<HistoryItem>,
}
