//! Codec for encoding and decoding roomcast envelopes.
//!
//! Envelopes travel as self-delimiting JSON text frames; the WebSocket layer
//! provides message boundaries, so no length prefix is needed.

use thiserror::Error;

use crate::envelope::Envelope;
use crate::version;

/// Maximum encoded frame size (64 KiB).
pub const MAX_FRAME_SIZE: usize = 64 * 1024;

/// Protocol errors that can occur during encoding/decoding.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame exceeds maximum size.
    #[error("Frame size {0} exceeds maximum {MAX_FRAME_SIZE}")]
    FrameTooLarge(usize),

    /// Envelope version this server does not speak.
    #[error("Unsupported protocol version {0}")]
    UnsupportedVersion(u8),

    /// Payload could not be serialized.
    #[error("Encoding error: {0}")]
    Encode(#[source] serde_json::Error),

    /// Envelope text could not be parsed.
    #[error("Decoding error: {0}")]
    Decode(#[source] serde_json::Error),

    /// Payload did not match the expected schema.
    #[error("Invalid payload: {0}")]
    Payload(#[source] serde_json::Error),
}

/// Encode an envelope to a JSON text frame.
///
/// # Errors
///
/// Returns an error if the envelope is too large or serialization fails.
pub fn encode(envelope: &Envelope) -> Result<String, ProtocolError> {
    let text = serde_json::to_string(envelope).map_err(ProtocolError::Encode)?;

    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    Ok(text)
}

/// Decode an envelope from a JSON text frame.
///
/// # Errors
///
/// Returns an error if the frame is too large, is not a valid envelope, or
/// carries an unsupported protocol version.
pub fn decode(text: &str) -> Result<Envelope, ProtocolError> {
    if text.len() > MAX_FRAME_SIZE {
        return Err(ProtocolError::FrameTooLarge(text.len()));
    }

    let envelope: Envelope = serde_json::from_str(text).map_err(ProtocolError::Decode)?;

    if !version::is_supported(envelope.v) {
        return Err(ProtocolError::UnsupportedVersion(envelope.v));
    }

    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::{codes, events, JoinedPayload};

    #[test]
    fn test_encode_decode_roundtrip() {
        let envelopes = vec![
            Envelope::event(
                events::JOINED,
                Some("req-1".to_string()),
                &JoinedPayload {
                    room_id: "r1".to_string(),
                },
            )
            .unwrap(),
            Envelope::event(events::PONG, None, &serde_json::json!({})).unwrap(),
            Envelope::error(Some("req-2".to_string()), codes::NOT_JOINED, "not joined"),
        ];

        for envelope in envelopes {
            let encoded = encode(&envelope).unwrap();
            let decoded = decode(&encoded).unwrap();
            assert_eq!(envelope, decoded);
        }
    }

    #[test]
    fn test_decode_malformed() {
        match decode("{not json") {
            Err(ProtocolError::Decode(_)) => {}
            other => panic!("Expected Decode error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_unsupported_version() {
        match decode(r#"{"v":9,"type":"chat.join","data":{"roomId":"r1"}}"#) {
            Err(ProtocolError::UnsupportedVersion(9)) => {}
            other => panic!("Expected UnsupportedVersion error, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_missing_version_defaults() {
        let envelope = decode(r#"{"type":"system.ping"}"#).unwrap();
        assert_eq!(envelope.v, version::WIRE_VERSION);
        assert_eq!(envelope.kind, events::PING);
    }

    #[test]
    fn test_frame_too_large() {
        let content = "x".repeat(MAX_FRAME_SIZE + 1);
        let envelope = Envelope::event(events::SEND, None, &serde_json::json!({ "content": content }))
            .unwrap();

        match encode(&envelope) {
            Err(ProtocolError::FrameTooLarge(_)) => {}
            other => panic!("Expected FrameTooLarge error, got {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_type_decodes() {
        // Unknown tags are a dispatch concern, not a codec failure.
        let envelope = decode(r#"{"v":1,"type":"chat.dance","requestId":"r"}"#).unwrap();
        assert_eq!(envelope.kind, "chat.dance");
    }
}
