// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! The per-connection worker behind `GET /ws`.
//!
//! Each accepted socket goes through two phases. While connecting, exactly
//! one frame is read and it must be a `connect` handshake; anything else
//! drops the socket without a reply and nothing is registered. Once active,
//! the worker is the single writer of its socket: router pushes arrive
//! through the bounded outbound queue held by the registry, and replies to
//! the worker's own frames are written directly.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Query, State, WebSocketUpgrade};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::{mpsc, OwnedSemaphorePermit};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::ErrorCode;
use crate::model::UserId;
use crate::registry::ConnectionHandle;
use crate::state::RelayState;
use crate::transport::auth;
use crate::wire::{ClientFrame, ServerFrame};

type WsSink = SplitSink<WebSocket, Message>;
type WsStream = SplitStream<WebSocket>;

/// Query parameters for the WS upgrade.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChatWsQuery {
    pub token: Option<String>,
    /// Identity asserted by a fronting auth layer. When present the
    /// handshake must claim the same user.
    pub user: Option<UserId>,
}

/// `GET /ws`: WebSocket upgrade for a chat client.
pub async fn ws_handler(
    State(state): State<Arc<RelayState>>,
    Query(query): Query<ChatWsQuery>,
    ws: WebSocketUpgrade,
) -> Response {
    if let Err(code) = auth::validate_token(query.token.as_deref(), state.config.auth_token.as_deref())
    {
        return code.to_http_response("unauthorized").into_response();
    }

    let Ok(permit) = Arc::clone(&state.slots).try_acquire_owned() else {
        tracing::warn!(limit = state.config.max_connections, "connection limit reached");
        return ErrorCode::Overloaded.to_http_response("connection limit reached").into_response();
    };

    ws.on_upgrade(move |socket| run_connection(state, socket, query.user, permit)).into_response()
}

/// Drive one socket from handshake to close. The permit is held until return.
async fn run_connection(
    state: Arc<RelayState>,
    socket: WebSocket,
    asserted: Option<UserId>,
    _permit: OwnedSemaphorePermit,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let Some(user) = await_handshake(&mut ws_rx, state.config.handshake_timeout()).await else {
        tracing::debug!("handshake rejected");
        return;
    };
    if asserted.is_some_and(|asserted| asserted != user) {
        tracing::debug!(user = %user, "handshake identity does not match upgrade");
        return;
    }

    let (outbound_tx, mut outbound_rx) = mpsc::channel(state.config.outbound_buffer);
    let cancel = state.shutdown.child_token();
    let handle = ConnectionHandle::new(user, outbound_tx, cancel.clone());
    state.registry.register(handle.clone());
    tracing::debug!(user = %user, conn = %handle.id, "handshake accepted");

    let reason = serve(&state, &handle, &cancel, &mut ws_tx, &mut ws_rx, &mut outbound_rx).await;

    state.registry.unregister(handle.id);
    tracing::debug!(user = %user, conn = %handle.id, reason, "connection closed");
}

/// Read the first frame. Returns the claimed user for a valid `connect`.
async fn await_handshake(ws_rx: &mut WsStream, timeout: Duration) -> Option<UserId> {
    let msg = tokio::time::timeout(timeout, ws_rx.next()).await.ok()??.ok()?;
    let Message::Text(text) = msg else {
        return None;
    };
    match serde_json::from_str::<ClientFrame>(text.as_str()) {
        Ok(ClientFrame::Connect { from }) => Some(from),
        _ => None,
    }
}

/// The active loop. Returns why the connection ended.
async fn serve(
    state: &RelayState,
    handle: &ConnectionHandle,
    cancel: &CancellationToken,
    ws_tx: &mut WsSink,
    ws_rx: &mut WsStream,
    outbound_rx: &mut mpsc::Receiver<ServerFrame>,
) -> &'static str {
    let initial = match state.router.conversation_list(handle.user).await {
        Ok(frame) => frame,
        Err(e) => {
            tracing::warn!(user = %handle.user, err = %e, "initial conversation list failed");
            ServerFrame::error(e.code(), e.to_string())
        }
    };
    if send_json(ws_tx, &initial).await.is_err() {
        return "write failed";
    }

    let idle = state.config.idle_timeout();
    let mut deadline = idle.map(|d| Instant::now() + d);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return "cancelled",

            Some(frame) = outbound_rx.recv() => {
                if send_json(ws_tx, &frame).await.is_err() {
                    return "write failed";
                }
            }

            msg = ws_rx.next() => {
                let msg = match msg {
                    Some(Ok(m)) => m,
                    Some(Err(_)) => return "receive error",
                    None => return "stream ended",
                };
                deadline = idle.map(|d| Instant::now() + d);

                match msg {
                    Message::Text(text) => {
                        let Ok(frame) = serde_json::from_str::<ClientFrame>(text.as_str()) else {
                            return "undecodable frame";
                        };
                        if frame == ClientFrame::Disconnect {
                            return "client disconnect";
                        }
                        if let Some(reply) = state.router.dispatch(handle, frame).await {
                            if send_json(ws_tx, &reply).await.is_err() {
                                return "write failed";
                            }
                        }
                    }
                    Message::Close(_) => return "close frame",
                    _ => {}
                }
            }

            _ = idle_expiry(deadline) => return "idle timeout",
        }
    }
}

async fn idle_expiry(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn send_json<S>(tx: &mut S, frame: &ServerFrame) -> Result<(), ()>
where
    S: SinkExt<Message> + Unpin,
{
    let text = match frame.to_json() {
        Ok(t) => t,
        Err(_) => return Err(()),
    };
    tx.send(Message::Text(text.into())).await.map_err(|_| ())
}
