//! Per-envelope dispatch.
//!
//! Interprets a decoded envelope's type and invokes the corresponding
//! operation against the hub and the message store. Every reply goes through
//! the session's outbound queue; nothing here touches the socket. Protocol
//! failures produce an `error` envelope and leave session state untouched;
//! only transport failures (handled by the caller) terminate a session.

use std::sync::Arc;

use roomcast_core::{EnqueueOutcome, Session};
use roomcast_protocol::{
    codec, codes, events, Envelope, HistoryItem, HistoryPayload, HistoryResultPayload, JoinPayload,
    JoinedPayload, MessagePayload, SendPayload, SenderInfo,
};
use serde::Serialize;
use tracing::{debug, warn};

use crate::handlers::AppState;
use crate::metrics;

/// Route one decoded envelope.
pub(crate) async fn handle_envelope(state: &AppState, session: &Arc<Session>, envelope: Envelope) {
    match envelope.kind.as_str() {
        events::JOIN => handle_join(state, session, envelope),
        events::SEND => handle_send(state, session, envelope).await,
        events::HISTORY => handle_history(state, session, envelope).await,
        events::PING => {
            send_event(session, events::PONG, envelope.request_id, &serde_json::json!({}));
        }
        other => {
            debug!(session = %session.id(), event = other, "unknown event");
            send_error(session, envelope.request_id, codes::UNKNOWN_EVENT, "unknown event");
        }
    }
}

fn handle_join(state: &AppState, session: &Arc<Session>, envelope: Envelope) {
    let Ok(req) = envelope.payload::<JoinPayload>() else {
        send_error(
            session,
            envelope.request_id,
            codes::INVALID_JOIN,
            "invalid join payload",
        );
        return;
    };

    match state.hub.join(&req.room_id, session) {
        Ok(()) => {
            metrics::set_active_rooms(state.hub.stats().rooms);
            send_event(
                session,
                events::JOINED,
                envelope.request_id,
                &JoinedPayload {
                    room_id: req.room_id,
                },
            );
        }
        Err(err) => {
            send_error(session, envelope.request_id, codes::INVALID_JOIN, err.to_string());
        }
    }
}

async fn handle_send(state: &AppState, session: &Arc<Session>, envelope: Envelope) {
    let Ok(req) = envelope.payload::<SendPayload>() else {
        send_error(
            session,
            envelope.request_id,
            codes::INVALID_SEND,
            "invalid send payload",
        );
        return;
    };
    if req.room_id.is_empty()
        || req.content.is_empty()
        || req.content.len() > state.config.limits.max_content_bytes
    {
        send_error(
            session,
            envelope.request_id,
            codes::INVALID_SEND,
            "invalid send payload",
        );
        return;
    }

    if session.current_room().as_deref() != Some(req.room_id.as_str()) {
        send_error(session, envelope.request_id, codes::NOT_JOINED, "not joined");
        return;
    }

    // Persist first: a message only reaches the hub once it has an identity
    // in the store, so per-sender persisted order matches call order.
    let stored = match state
        .store
        .append(&req.room_id, &session.user().user_id, &req.content)
        .await
    {
        Ok(stored) => stored,
        Err(err) => {
            warn!(session = %session.id(), room = %req.room_id, error = %err, "append failed");
            metrics::record_error("store");
            send_error(
                session,
                envelope.request_id,
                codes::STORE_UNAVAILABLE,
                "store unavailable",
            );
            return;
        }
    };

    let payload = MessagePayload {
        id: stored.id,
        room_id: stored.room_id,
        sender: SenderInfo {
            id: session.user().user_id.clone(),
            nickname: session.user().nickname.clone(),
        },
        content: stored.content,
        created_at: stored.created_at,
    };

    match Envelope::event(events::MESSAGE, None, &payload).and_then(|env| codec::encode(&env)) {
        Ok(text) => {
            metrics::record_message(text.len(), "broadcast");
            let outcome = state.hub.broadcast(&req.room_id, Arc::from(text));
            metrics::record_dropped(outcome.dropped);
            debug!(
                session = %session.id(),
                room = %req.room_id,
                delivered = outcome.delivered,
                "message broadcast"
            );
        }
        Err(err) => {
            warn!(session = %session.id(), error = %err, "failed to encode broadcast");
        }
    }
}

async fn handle_history(state: &AppState, session: &Arc<Session>, envelope: Envelope) {
    let Ok(req) = envelope.payload::<HistoryPayload>() else {
        send_error(
            session,
            envelope.request_id,
            codes::INVALID_HISTORY,
            "invalid history payload",
        );
        return;
    };
    if req.room_id.is_empty() {
        send_error(
            session,
            envelope.request_id,
            codes::INVALID_HISTORY,
            "invalid history payload",
        );
        return;
    }

    match state.store.recent(&req.room_id, req.limit).await {
        Ok(history) => {
            let items: Vec<HistoryItem> = history
                .into_iter()
                .map(|msg| HistoryItem {
                    id: msg.id,
                    content: msg.content,
                    created_at: msg.created_at,
                })
                .collect();
            send_event(
                session,
                events::HISTORY_RESULT,
                envelope.request_id,
                &HistoryResultPayload { items },
            );
        }
        Err(err) => {
            warn!(session = %session.id(), room = %req.room_id, error = %err, "history failed");
            metrics::record_error("store");
            send_error(
                session,
                envelope.request_id,
                codes::STORE_UNAVAILABLE,
                "store unavailable",
            );
        }
    }
}

/// Encode a success envelope and enqueue it on the session.
pub(crate) fn send_event<T: Serialize>(
    session: &Session,
    kind: &str,
    request_id: Option<String>,
    data: &T,
) {
    match Envelope::event(kind, request_id, data).and_then(|env| codec::encode(&env)) {
        Ok(text) => deliver(session, text),
        Err(err) => {
            warn!(session = %session.id(), event = kind, error = %err, "failed to encode envelope");
        }
    }
}

/// Encode an error envelope and enqueue it on the session.
pub(crate) fn send_error(
    session: &Session,
    request_id: Option<String>,
    code: u16,
    message: impl Into<String>,
) {
    let envelope = Envelope::error(request_id, code, message);
    match codec::encode(&envelope) {
        Ok(text) => deliver(session, text),
        Err(err) => {
            warn!(session = %session.id(), error = %err, "failed to encode error envelope");
        }
    }
}

fn deliver(session: &Session, text: String) {
    if session.enqueue(Arc::from(text)) == EnqueueOutcome::Dropped {
        metrics::record_dropped(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use async_trait::async_trait;
    use roomcast_core::{
        MemoryStore, MemoryTokens, MessageStore, StoreError, StoredMessage, UserIdentity,
    };
    use serde_json::{json, Value};
    use tokio::sync::mpsc;

    struct FailingStore;

    #[async_trait]
    impl MessageStore for FailingStore {
        async fn append(
            &self,
            _room_id: &str,
            _sender_id: &str,
            _content: &str,
        ) -> Result<StoredMessage, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }

        async fn recent(
            &self,
            _room_id: &str,
            _limit: i64,
        ) -> Result<Vec<StoredMessage>, StoreError> {
            Err(StoreError::Unavailable("down".to_string()))
        }
    }

    fn test_state() -> AppState {
        AppState::new(
            Config::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryTokens::new()),
        )
    }

    fn failing_state() -> AppState {
        AppState::new(
            Config::default(),
            Arc::new(FailingStore),
            Arc::new(MemoryTokens::new()),
        )
    }

    fn connect(state: &AppState, user_id: &str) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
        let (session, rx) = Session::new(UserIdentity::new(user_id, "alice"), 16);
        state.hub.register(session.clone());
        (session, rx)
    }

    fn inbound(kind: &str, request_id: Option<&str>, data: Value) -> Envelope {
        Envelope {
            v: 1,
            kind: kind.to_string(),
            request_id: request_id.map(String::from),
            data: Some(data),
            error: None,
        }
    }

    fn next(rx: &mut mpsc::Receiver<Arc<str>>) -> Envelope {
        codec::decode(&rx.try_recv().expect("expected an outbound envelope")).unwrap()
    }

    #[tokio::test]
    async fn test_join_emits_joined() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(
            &state,
            &session,
            inbound(events::JOIN, Some("q1"), json!({"roomId": "r1"})),
        )
        .await;

        let reply = next(&mut rx);
        assert_eq!(reply.kind, events::JOINED);
        assert_eq!(reply.request_id.as_deref(), Some("q1"));
        assert_eq!(reply.data.unwrap()["roomId"], "r1");
        assert_eq!(session.current_room().as_deref(), Some("r1"));
    }

    #[tokio::test]
    async fn test_malformed_join_leaves_state_unchanged() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(
            &state,
            &session,
            inbound(events::JOIN, Some("q1"), json!({"room": "r1"})),
        )
        .await;

        let reply = next(&mut rx);
        assert_eq!(reply.kind, events::ERROR);
        assert_eq!(reply.error.unwrap().code, codes::INVALID_JOIN);
        assert_eq!(session.current_room(), None);
        assert_eq!(state.hub.stats().rooms, 0);
    }

    #[tokio::test]
    async fn test_send_broadcasts_to_room() {
        let state = test_state();
        let (a, mut a_rx) = connect(&state, "u1");
        let (b, mut b_rx) = connect(&state, "u2");

        handle_envelope(&state, &a, inbound(events::JOIN, None, json!({"roomId": "r1"}))).await;
        handle_envelope(&state, &b, inbound(events::JOIN, None, json!({"roomId": "r1"}))).await;
        next(&mut a_rx);
        next(&mut b_rx);

        handle_envelope(
            &state,
            &a,
            inbound(events::SEND, None, json!({"roomId": "r1", "content": "hi"})),
        )
        .await;

        // Every member of the room, sender included, receives the message.
        for rx in [&mut a_rx, &mut b_rx] {
            let message = next(rx);
            assert_eq!(message.kind, events::MESSAGE);
            let data = message.data.unwrap();
            assert_eq!(data["content"], "hi");
            assert_eq!(data["sender"]["id"], "u1");
            assert_eq!(data["roomId"], "r1");
        }

        assert_eq!(state.store.recent("r1", 0).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_send_without_join_is_rejected() {
        let state = test_state();
        let (a, mut a_rx) = connect(&state, "u1");
        let (b, mut b_rx) = connect(&state, "u2");

        handle_envelope(&state, &a, inbound(events::JOIN, None, json!({"roomId": "r1"}))).await;
        next(&mut a_rx);

        handle_envelope(
            &state,
            &b,
            inbound(events::SEND, Some("q2"), json!({"roomId": "r1", "content": "x"})),
        )
        .await;

        let reply = next(&mut b_rx);
        assert_eq!(reply.kind, events::ERROR);
        let error = reply.error.unwrap();
        assert_eq!(error.code, codes::NOT_JOINED);
        assert_eq!(error.message, "not joined");

        // Nothing persisted, nothing broadcast.
        assert!(state.store.recent("r1", 0).await.unwrap().is_empty());
        assert!(a_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_send_to_other_room_is_rejected() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(&state, &session, inbound(events::JOIN, None, json!({"roomId": "r1"})))
            .await;
        next(&mut rx);

        handle_envelope(
            &state,
            &session,
            inbound(events::SEND, None, json!({"roomId": "r2", "content": "x"})),
        )
        .await;

        assert_eq!(next(&mut rx).error.unwrap().code, codes::NOT_JOINED);
    }

    #[tokio::test]
    async fn test_send_empty_content_is_rejected() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(&state, &session, inbound(events::JOIN, None, json!({"roomId": "r1"})))
            .await;
        next(&mut rx);

        handle_envelope(
            &state,
            &session,
            inbound(events::SEND, None, json!({"roomId": "r1", "content": ""})),
        )
        .await;

        assert_eq!(next(&mut rx).error.unwrap().code, codes::INVALID_SEND);
        assert!(state.store.recent("r1", 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_send_oversized_content_is_rejected() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(&state, &session, inbound(events::JOIN, None, json!({"roomId": "r1"})))
            .await;
        next(&mut rx);

        let content = "x".repeat(state.config.limits.max_content_bytes + 1);
        handle_envelope(
            &state,
            &session,
            inbound(events::SEND, None, json!({"roomId": "r1", "content": content})),
        )
        .await;

        assert_eq!(next(&mut rx).error.unwrap().code, codes::INVALID_SEND);
    }

    #[tokio::test]
    async fn test_store_failure_reaches_caller_not_hub() {
        let state = failing_state();
        let (a, mut a_rx) = connect(&state, "u1");
        let (b, mut b_rx) = connect(&state, "u2");

        handle_envelope(&state, &a, inbound(events::JOIN, None, json!({"roomId": "r1"}))).await;
        handle_envelope(&state, &b, inbound(events::JOIN, None, json!({"roomId": "r1"}))).await;
        next(&mut a_rx);
        next(&mut b_rx);

        handle_envelope(
            &state,
            &a,
            inbound(events::SEND, Some("q3"), json!({"roomId": "r1", "content": "hi"})),
        )
        .await;

        let reply = next(&mut a_rx);
        assert_eq!(reply.error.unwrap().code, codes::STORE_UNAVAILABLE);
        // No partial broadcast on collaborator failure.
        assert!(b_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_history_returns_recent_oldest_first() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        for i in 1..=5 {
            state
                .store
                .append("r1", "u1", &format!("msg {i}"))
                .await
                .unwrap();
        }

        handle_envelope(
            &state,
            &session,
            inbound(events::HISTORY, Some("q4"), json!({"roomId": "r1", "limit": 2})),
        )
        .await;

        let reply = next(&mut rx);
        assert_eq!(reply.kind, events::HISTORY_RESULT);
        assert_eq!(reply.request_id.as_deref(), Some("q4"));
        let items = reply.data.unwrap()["items"].as_array().unwrap().clone();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["content"], "msg 4");
        assert_eq!(items[1]["content"], "msg 5");
    }

    #[tokio::test]
    async fn test_history_without_limit_returns_everything() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        for i in 1..=3 {
            state
                .store
                .append("r1", "u1", &format!("msg {i}"))
                .await
                .unwrap();
        }

        handle_envelope(
            &state,
            &session,
            inbound(events::HISTORY, None, json!({"roomId": "r1"})),
        )
        .await;

        let reply = next(&mut rx);
        assert_eq!(reply.data.unwrap()["items"].as_array().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn test_history_missing_room_is_rejected() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(&state, &session, inbound(events::HISTORY, None, json!({}))).await;

        assert_eq!(next(&mut rx).error.unwrap().code, codes::INVALID_HISTORY);
    }

    #[tokio::test]
    async fn test_ping_echoes_request_id() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(&state, &session, inbound(events::PING, Some("p1"), json!({}))).await;

        let reply = next(&mut rx);
        assert_eq!(reply.kind, events::PONG);
        assert_eq!(reply.request_id.as_deref(), Some("p1"));
    }

    #[tokio::test]
    async fn test_unknown_event_yields_protocol_error() {
        let state = test_state();
        let (session, mut rx) = connect(&state, "u1");

        handle_envelope(&state, &session, inbound("chat.dance", Some("q5"), json!({}))).await;

        let reply = next(&mut rx);
        assert_eq!(reply.kind, events::ERROR);
        assert_eq!(reply.request_id.as_deref(), Some("q5"));
        let error = reply.error.unwrap();
        assert_eq!(error.code, codes::UNKNOWN_EVENT);
        assert_eq!(error.message, "unknown event");
    }
}
