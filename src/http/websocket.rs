//! WebSocket endpoint for the real-time layer.
//!
//! # Data Flow
//! ```text
//! Client ──frames──→ reader loop ──→ ConnectionManager::handle_inbound
//! Client ←─frames─── writer task ←── bounded outbound queue ←── broadcasts
//! ```
//!
//! # Design Decisions
//! - The credential comes from `?token=` or `Authorization: Bearer`
//! - The handshake is validated after the upgrade so a rejected client gets
//!   an `error` frame and a policy close instead of a bare 401
//! - Closing the connection from the manager (supersede, shutdown, failed
//!   delivery) stops both loops

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::Response,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;

use crate::http::server::AppState;
use crate::realtime::{ClientMessage, ConnectionManager, ServerMessage};
use crate::security::identity::bearer_token;

#[derive(Debug, Default, Deserialize)]
pub struct WsParams {
    pub token: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    headers: HeaderMap,
) -> Response {
    let credential = params.token.or_else(|| bearer_token(&headers));
    let manager = state.realtime.clone();
    ws.on_upgrade(move |socket| serve_socket(socket, manager, credential))
}

async fn serve_socket(socket: WebSocket, manager: Arc<ConnectionManager>, credential: Option<String>) {
    let (mut sink, mut stream) = socket.split();
    let (tx, mut rx) = manager.channel();

    let conn = match manager.connect(credential.as_deref(), tx).await {
        Ok(conn) => conn,
        Err(e) => {
            let frame = ServerMessage::error(e.code(), e.to_string()).to_json();
            let _ = sink.send(Message::Text(frame.into())).await;
            let _ = sink
                .send(Message::Close(Some(CloseFrame {
                    code: close_code::POLICY,
                    reason: "unauthorized".into(),
                })))
                .await;
            return;
        }
    };

    let writer_conn = conn.clone();
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                message = rx.recv() => match message {
                    Some(message) => {
                        if sink.send(Message::Text(message.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = writer_conn.closed() => {
                    // Flush what was queued before the close, e.g. `superseded`.
                    while let Ok(message) = rx.try_recv() {
                        if sink.send(Message::Text(message.to_json().into())).await.is_err() {
                            break;
                        }
                    }
                    let _ = sink.send(Message::Close(None)).await;
                    break;
                }
            }
        }
        tracing::trace!(connection = %writer_conn.id(), "Writer finished");
    });

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => match ClientMessage::parse(text.as_str()) {
                    Ok(message) => {
                        if let Err(e) = manager.handle_inbound(&conn, message) {
                            tracing::debug!(connection = %conn.id(), error = %e, "Inbound message refused");
                        }
                    }
                    Err(e) => manager.send(&conn, ServerMessage::error("bad_message", e.to_string())),
                },
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(e)) => {
                    tracing::debug!(connection = %conn.id(), error = %e, "WebSocket read failed");
                    break;
                }
                // Pings are answered by axum; binary frames are ignored.
                Some(Ok(_)) => {}
            },
            _ = conn.closed() => break,
        }
    }

    manager.close(conn.id());
    let _ = writer.await;
}
