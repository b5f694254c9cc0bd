//! Connection handling for the roomcast server.
//!
//! The gateway authenticates the upgrade request before any protocol traffic
//! is accepted, then runs two tasks per connection: an inbound read loop that
//! decodes and dispatches envelopes, and a delivery task that is the socket's
//! only writer, draining the session's bounded queue in enqueue order.

use std::sync::Arc;

use anyhow::Result;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use roomcast_core::{Hub, MessageStore, Session, StoreError, TokenResolver, UserIdentity};
use roomcast_protocol::{codec, codes, events, ConnectedPayload};

use crate::config::Config;
use crate::dispatch;
use crate::metrics::{self, ConnectionMetricsGuard};

/// Shared server state.
///
/// Constructed once by the entry point and injected everywhere; tests build
/// an isolated state per case.
pub struct AppState {
    /// Room membership registry.
    pub hub: Hub,
    /// Message persistence collaborator.
    pub store: Arc<dyn MessageStore>,
    /// Token resolution collaborator.
    pub identity: Arc<dyn TokenResolver>,
    /// Server configuration.
    pub config: Config,
}

impl AppState {
    /// Create new app state.
    #[must_use]
    pub fn new(
        config: Config,
        store: Arc<dyn MessageStore>,
        identity: Arc<dyn TokenResolver>,
    ) -> Self {
        Self {
            hub: Hub::new(),
            store,
            identity,
            config,
        }
    }
}

/// Run the HTTP/WebSocket server.
///
/// # Errors
///
/// Returns an error if the server fails to start.
pub async fn run_server(state: Arc<AppState>) -> Result<()> {
    // Start metrics exporter if enabled
    if state.config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(state.config.metrics.port) {
            error!("Failed to start metrics exporter: {}", e);
        }
    }

    let app = Router::new()
        .route(&state.config.websocket_path, get(ws_handler))
        .route("/healthz", get(health_handler))
        .route("/stats", get(stats_handler))
        .route("/rooms/:room/stats", get(room_stats_handler))
        .with_state(state.clone());

    let addr = state.config.bind_addr();
    let listener = TcpListener::bind(addr).await?;

    info!("roomcast listening on {}", addr);
    info!(
        "WebSocket endpoint: ws://{}{}",
        addr, state.config.websocket_path
    );

    axum::serve(listener, app).await?;

    Ok(())
}

/// Health check handler.
async fn health_handler() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION")
    }))
}

/// Hub statistics handler.
async fn stats_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let stats = state.hub.stats();
    Json(json!({
        "sessions": stats.sessions,
        "rooms": stats.rooms,
        "members": stats.members,
    }))
}

/// Per-room statistics handler.
async fn room_stats_handler(
    Path(room): Path<String>,
    State(state): State<Arc<AppState>>,
) -> Response {
    match room_message_count(state.store.as_ref(), &room).await {
        Ok(messages) => Json(json!({
            "room": room,
            "members": state.hub.member_count(&room),
            "messages": messages,
        }))
        .into_response(),
        Err(err) => (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"code": codes::STORE_UNAVAILABLE, "message": err.to_string()})),
        )
            .into_response(),
    }
}

/// Count a room's persisted messages.
///
/// Uses the store's statistics capability when present; otherwise falls back
/// to a linear scan of the full history.
async fn room_message_count(store: &dyn MessageStore, room_id: &str) -> Result<usize, StoreError> {
    match store.stats() {
        Some(stats) => Ok(stats.room_message_count(room_id)),
        None => Ok(store.recent(room_id, 0).await?.len()),
    }
}

/// Query parameters of the upgrade request.
#[derive(Debug, Deserialize)]
struct ConnectParams {
    token: Option<String>,
}

/// WebSocket upgrade handler.
///
/// The access token is verified before the upgrade; failures are refused at
/// the transport layer with no envelope exchanged.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let Some(token) = params.token.filter(|t| !t.is_empty()) else {
        return unauthorized("missing token");
    };

    match state.identity.resolve(&token).await {
        Some(user) => ws
            .on_upgrade(move |socket| handle_socket(socket, state, user))
            .into_response(),
        None => unauthorized("invalid token"),
    }
}

fn unauthorized(message: &str) -> Response {
    metrics::record_error("auth");
    (
        StatusCode::UNAUTHORIZED,
        Json(json!({"code": codes::UNAUTHORIZED, "message": message})),
    )
        .into_response()
}

/// Handle one authenticated WebSocket connection.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, user: UserIdentity) {
    let _metrics_guard = ConnectionMetricsGuard::new();

    let (session, mut outbound_rx) =
        Session::new(user, state.config.limits.outbound_queue_capacity);
    state.hub.register(session.clone());
    debug!(session = %session.id(), user = %session.user().user_id, "websocket connected");

    let (mut sink, mut stream) = socket.split();

    // Sole writer to the socket: drains the queue strictly in enqueue order,
    // then closes the connection once the queue is closed and drained.
    let delivery = tokio::spawn(async move {
        while let Some(frame) = outbound_rx.recv().await {
            metrics::record_message(frame.len(), "outbound");
            if sink.send(Message::Text(frame.to_string())).await.is_err() {
                break;
            }
        }
        let _ = sink.close().await;
    });

    // The greeting rides the queue like every other outbound envelope, so
    // per-session delivery order stays total.
    dispatch::send_event(
        &session,
        events::CONNECTED,
        None,
        &ConnectedPayload {
            user_id: session.user().user_id.clone(),
        },
    );

    while let Some(incoming) = stream.next().await {
        match incoming {
            Ok(Message::Text(text)) => handle_frame(&state, &session, &text).await,
            Ok(Message::Binary(data)) => match std::str::from_utf8(&data) {
                Ok(text) => handle_frame(&state, &session, text).await,
                Err(_) => {
                    metrics::record_error("protocol");
                    dispatch::send_error(&session, None, codes::MALFORMED, "malformed envelope");
                }
            },
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                debug!(session = %session.id(), "received close frame");
                break;
            }
            Err(err) => {
                warn!(session = %session.id(), error = %err, "websocket error");
                metrics::record_error("websocket");
                break;
            }
        }
    }

    state.hub.disconnect(&session);
    metrics::set_active_rooms(state.hub.stats().rooms);

    let _ = delivery.await;
    session.mark_closed();
    debug!(session = %session.id(), "websocket disconnected");
}

/// Decode one inbound text frame and dispatch it.
async fn handle_frame(state: &Arc<AppState>, session: &Arc<Session>, text: &str) {
    metrics::record_message(text.len(), "inbound");
    match codec::decode(text) {
        Ok(envelope) => dispatch::handle_envelope(state, session, envelope).await,
        Err(err) => {
            debug!(session = %session.id(), error = %err, "undecodable frame");
            metrics::record_error("protocol");
            dispatch::send_error(session, None, codes::MALFORMED, "malformed envelope");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use roomcast_core::{MemoryStore, StoredMessage};

    /// A store without the statistics capability.
    struct ScanOnlyStore(MemoryStore);

    #[async_trait]
    impl MessageStore for ScanOnlyStore {
        async fn append(
            &self,
            room_id: &str,
            sender_id: &str,
            content: &str,
        ) -> Result<StoredMessage, StoreError> {
            self.0.append(room_id, sender_id, content).await
        }

        async fn recent(
            &self,
            room_id: &str,
            limit: i64,
        ) -> Result<Vec<StoredMessage>, StoreError> {
            self.0.recent(room_id, limit).await
        }
    }

    #[tokio::test]
    async fn test_room_message_count_uses_capability() {
        let store = MemoryStore::new();
        store.append("r1", "u_1", "a").await.unwrap();
        store.append("r1", "u_1", "b").await.unwrap();

        assert!(store.stats().is_some());
        assert_eq!(room_message_count(&store, "r1").await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_room_message_count_falls_back_to_scan() {
        let store = ScanOnlyStore(MemoryStore::new());
        store.append("r1", "u_1", "a").await.unwrap();
        store.append("r1", "u_1", "b").await.unwrap();
        store.append("r2", "u_1", "c").await.unwrap();

        assert!(store.stats().is_none());
        assert_eq!(room_message_count(&store, "r1").await.unwrap(), 2);
        assert_eq!(room_message_count(&store, "nowhere").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unauthorized_response_status() {
        let response = unauthorized("missing token");
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}
