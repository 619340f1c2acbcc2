//! HTTP surface sharing the signaling port
//!
//! `/ws` upgrades to the signaling WebSocket; `/api/turn`, `/health` and
//! `/stats` are plain JSON endpoints. A permissive CORS layer answers
//! preflight requests and tags every response so browser clients can fetch
//! credentials directly.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{CloseFrame as AxumCloseFrame, Message as AxumMessage, WebSocket, WebSocketUpgrade},
        ConnectInfo, RawQuery, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tower_http::cors::CorsLayer;
use tracing::debug;

use crate::connection::{HeartbeatConfig, HeartbeatConnection};
use crate::signaler::Signaler;
use crate::{CREDENTIALS_PATH, WS_PATH};

/// State shared by every route
#[derive(Clone)]
pub struct HubState {
    pub signaler: Arc<Signaler>,
    pub heartbeat: HeartbeatConfig,
}

/// Build the router with all endpoints
pub fn router(state: HubState) -> Router {
    Router::new()
        .route(WS_PATH, get(websocket_handler))
        .route(CREDENTIALS_PATH, get(credentials_handler))
        .route("/health", get(health_handler))
        .route("/stats", get(stats_handler))
        .fallback(not_found)
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// WebSocket upgrade; the connection is dispatched until it closes
async fn websocket_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(peer_addr): ConnectInfo<SocketAddr>,
    State(state): State<HubState>,
) -> Response {
    ws.on_upgrade(move |socket| async move {
        let (conn, events) = HeartbeatConnection::spawn(
            tungstenite_socket(socket),
            peer_addr.to_string(),
            state.heartbeat,
        );
        state.signaler.run(conn, events).await;
        debug!("Connection closed: {}", peer_addr);
    })
}

/// Relay credentials for `service=turn&username=<id>`
async fn credentials_handler(
    RawQuery(query): RawQuery,
    State(state): State<HubState>,
) -> Response {
    match state
        .signaler
        .handle_credential_request(query.as_deref().unwrap_or(""))
    {
        Ok(record) => Json(record).into_response(),
        Err(e) => (StatusCode::BAD_REQUEST, e.to_string()).into_response(),
    }
}

async fn health_handler(State(state): State<HubState>) -> impl IntoResponse {
    Json(json!({
        "status": "healthy",
        "peers": state.signaler.peer_count(),
        "credentials": state.signaler.credential_count(),
    }))
}

async fn stats_handler(State(state): State<HubState>) -> impl IntoResponse {
    Json(json!({
        "peers": state.signaler.peer_count(),
        "credentials": state.signaler.credential_count(),
    }))
}

async fn not_found() -> impl IntoResponse {
    (StatusCode::NOT_FOUND, Json(json!({ "error": "not found" })))
}

/// View an upgraded axum socket as a tungstenite message stream and sink
pub fn tungstenite_socket(
    socket: WebSocket,
) -> impl Stream<Item = Result<Message, WsError>> + Sink<Message, Error = WsError> + Send + 'static {
    socket
        .sink_map_err(into_ws_error)
        .with(|message: Message| future::ready(Ok::<_, WsError>(to_axum(message))))
        .map(|received| received.map(from_axum).map_err(into_ws_error))
}

fn into_ws_error(e: axum::Error) -> WsError {
    match e.into_inner().downcast::<WsError>() {
        Ok(inner) => *inner,
        Err(other) => WsError::Io(std::io::Error::new(std::io::ErrorKind::Other, other)),
    }
}

fn to_axum(message: Message) -> AxumMessage {
    match message {
        Message::Text(text) => AxumMessage::Text(text),
        Message::Binary(data) => AxumMessage::Binary(data),
        Message::Ping(data) => AxumMessage::Ping(data),
        Message::Pong(data) => AxumMessage::Pong(data),
        Message::Close(frame) => AxumMessage::Close(frame.map(|f| AxumCloseFrame {
            code: f.code.into(),
            reason: f.reason,
        })),
        Message::Frame(frame) => AxumMessage::Binary(frame.into_data()),
    }
}

fn from_axum(message: AxumMessage) -> Message {
    match message {
        AxumMessage::Text(text) => Message::Text(text),
        AxumMessage::Binary(data) => Message::Binary(data),
        AxumMessage::Ping(data) => Message::Ping(data),
        AxumMessage::Pong(data) => Message::Pong(data),
        AxumMessage::Close(frame) => Message::Close(frame.map(|f| CloseFrame {
            code: CloseCode::from(f.code),
            reason: f.reason,
        })),
    }
}
