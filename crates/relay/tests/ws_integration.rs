// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! WebSocket integration tests using real connections against an in-process
//! axum server.

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::json;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use chatrelay::model::{ConversationId, MessageKind, UserId};
use chatrelay::state::RelayState;
use chatrelay::store::Store;
use chatrelay::test_support::{spawn_http_server, StateBuilder};

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;
type WsTx = futures_util::stream::SplitSink<WsStream, WsMessage>;
type WsRx = futures_util::stream::SplitStream<WsStream>;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);

/// Send a JSON message over the WebSocket.
async fn ws_send(stream: &mut WsTx, value: &serde_json::Value) -> anyhow::Result<()> {
    let text = serde_json::to_string(value)?;
    stream.send(WsMessage::Text(text.into())).await.map_err(|e| anyhow::anyhow!("ws send: {e}"))?;
    Ok(())
}

/// Receive a JSON message from the WebSocket with timeout.
async fn ws_recv(stream: &mut WsRx) -> anyhow::Result<serde_json::Value> {
    let msg = tokio::time::timeout(RECV_TIMEOUT, stream.next())
        .await
        .map_err(|_| anyhow::anyhow!("ws recv timeout"))?
        .ok_or_else(|| anyhow::anyhow!("ws stream closed"))?
        .map_err(|e| anyhow::anyhow!("ws recv: {e}"))?;

    match msg {
        WsMessage::Text(text) => Ok(serde_json::from_str(&text)?),
        other => anyhow::bail!("expected Text message, got {other:?}"),
    }
}

/// Wait until the server closes the socket. Fails if a text frame arrives.
async fn ws_expect_closed(stream: &mut WsRx) -> anyhow::Result<()> {
    loop {
        let next = tokio::time::timeout(RECV_TIMEOUT, stream.next())
            .await
            .map_err(|_| anyhow::anyhow!("socket still open"))?;
        match next {
            None | Some(Err(_)) | Some(Ok(WsMessage::Close(_))) => return Ok(()),
            Some(Ok(WsMessage::Text(text))) => anyhow::bail!("unexpected frame: {text}"),
            Some(Ok(_)) => continue,
        }
    }
}

/// Connect a WebSocket to the given server address with optional query params.
async fn ws_connect(addr: &std::net::SocketAddr, query: &str) -> anyhow::Result<(WsTx, WsRx)> {
    let url = if query.is_empty() {
        format!("ws://{addr}/ws")
    } else {
        format!("ws://{addr}/ws?{query}")
    };
    let (stream, _) = tokio_tungstenite::connect_async(&url)
        .await
        .map_err(|e| anyhow::anyhow!("ws connect: {e}"))?;
    Ok(stream.split())
}

/// Connect and complete the handshake as `user`, consuming the initial
/// conversation list.
async fn ws_login(addr: &std::net::SocketAddr, user: i64) -> anyhow::Result<(WsTx, WsRx)> {
    let (mut tx, mut rx) = ws_connect(addr, "").await?;
    ws_send(&mut tx, &json!({ "type": "connect", "from": user })).await?;
    let first = ws_recv(&mut rx).await?;
    anyhow::ensure!(first["type"] == "conversation_list", "expected conversation_list, got {first}");
    Ok((tx, rx))
}

/// Poll until the registry holds exactly `n` connections.
async fn wait_for_connections(state: &RelayState, n: usize) -> anyhow::Result<()> {
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while state.registry.connection_count() != n {
        anyhow::ensure!(
            tokio::time::Instant::now() < deadline,
            "expected {n} connections, have {}",
            state.registry.connection_count()
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    Ok(())
}

#[tokio::test]
async fn first_message_creates_conversation_and_reaches_recipient() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx1, mut rx1) = ws_connect(&addr, "").await?;
    ws_send(&mut tx1, &json!({ "type": "connect", "from": 1 })).await?;
    let initial = ws_recv(&mut rx1).await?;
    assert_eq!(initial, json!({ "type": "conversation_list", "conversation": [] }));

    let (_tx2, mut rx2) = ws_login(&addr, 2).await?;
    let (mut tx3, mut rx3) = ws_login(&addr, 3).await?;

    ws_send(&mut tx1, &json!({ "type": "message", "from": 1, "to": 2, "content": "hi" })).await?;

    let ack = ws_recv(&mut rx1).await?;
    assert_eq!(ack["type"], "message_status", "ack: {ack}");
    assert_eq!(ack["status"], "delivered");

    let pushed = ws_recv(&mut rx2).await?;
    assert_eq!(pushed["type"], "message", "push: {pushed}");
    assert_eq!(pushed["content"], "hi");
    assert_eq!(pushed["sender"], 1);
    assert_eq!(pushed["conversationId"], ack["conversationId"]);

    // The sender renders its own line from the echo.
    let echo = ws_recv(&mut rx1).await?;
    assert_eq!(echo, pushed);
    let conversation =
        ConversationId(pushed["conversationId"].as_i64().ok_or_else(|| anyhow::anyhow!("no id"))?);

    let history = state.store.messages_in(conversation).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].sender, Some(UserId(1)));
    assert_eq!(history[0].content.as_deref(), Some("hi"));
    assert_eq!(history[0].kind, MessageKind::Text);
    assert_eq!(state.store.conversations_for_user(UserId(1)).await?.len(), 1);

    // An unrelated user sees nothing; the next frame C gets is its own reply.
    ws_send(&mut tx3, &json!({ "type": "get_conversations", "from": 3 })).await?;
    let reply = ws_recv(&mut rx3).await?;
    assert_eq!(reply, json!({ "type": "conversation_list", "conversation": [] }));
    Ok(())
}

#[tokio::test]
async fn non_connect_first_frame_is_never_registered() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_connect(&addr, "").await?;
    ws_send(&mut tx, &json!({ "type": "get_conversations", "from": 9 })).await?;
    ws_expect_closed(&mut rx).await?;
    assert!(!state.registry.is_online(UserId(9)));

    let (mut tx1, mut rx1) = ws_login(&addr, 1).await?;
    ws_send(&mut tx1, &json!({ "type": "message", "from": 1, "to": 9, "content": "anyone?" }))
        .await?;
    let ack = ws_recv(&mut rx1).await?;
    assert_eq!(ack["status"], "stored", "ack: {ack}");
    Ok(())
}

#[tokio::test]
async fn handshake_timeout_drops_socket() -> anyhow::Result<()> {
    let state = StateBuilder::new().handshake_timeout_ms(100).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (_tx, mut rx) = ws_connect(&addr, "").await?;
    ws_expect_closed(&mut rx).await?;
    assert_eq!(state.registry.connection_count(), 0);
    Ok(())
}

#[tokio::test]
async fn asserted_identity_must_match_handshake() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_connect(&addr, "user=5").await?;
    ws_send(&mut tx, &json!({ "type": "connect", "from": 6 })).await?;
    ws_expect_closed(&mut rx).await?;
    assert!(!state.registry.is_online(UserId(6)));

    let (mut tx, mut rx) = ws_connect(&addr, "user=5").await?;
    ws_send(&mut tx, &json!({ "type": "connect", "from": 5 })).await?;
    assert_eq!(ws_recv(&mut rx).await?["type"], "conversation_list");
    assert!(state.registry.is_online(UserId(5)));
    Ok(())
}

#[tokio::test]
async fn every_tab_of_recipient_receives() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx1, mut rx1) = ws_login(&addr, 1).await?;
    let (_tab_a, mut rx_a) = ws_login(&addr, 2).await?;
    let (_tab_b, mut rx_b) = ws_login(&addr, 2).await?;
    assert_eq!(state.registry.lookup_by_user(UserId(2)).len(), 2);

    ws_send(&mut tx1, &json!({ "type": "message", "from": 1, "to": 2, "content": "both" })).await?;
    assert_eq!(ws_recv(&mut rx1).await?["status"], "delivered");
    assert_eq!(ws_recv(&mut rx_a).await?["content"], "both");
    assert_eq!(ws_recv(&mut rx_b).await?["content"], "both");
    Ok(())
}

#[tokio::test]
async fn unknown_frame_is_ignored() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_login(&addr, 1).await?;
    ws_send(&mut tx, &json!({ "type": "typing", "from": 1 })).await?;
    ws_send(&mut tx, &json!({ "type": "get_conversations", "from": 1 })).await?;
    assert_eq!(ws_recv(&mut rx).await?["type"], "conversation_list");
    Ok(())
}

#[tokio::test]
async fn rejected_frame_gets_error_and_connection_survives() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_login(&addr, 1).await?;
    ws_send(&mut tx, &json!({ "type": "create_conversation", "from": 1, "users": [2, 3] })).await?;
    let err = ws_recv(&mut rx).await?;
    assert_eq!(err["type"], "error");
    assert_eq!(err["code"], "UNSUPPORTED");

    ws_send(&mut tx, &json!({ "type": "create_conversation", "from": 1, "users": [2] })).await?;
    let list = ws_recv(&mut rx).await?;
    assert_eq!(list["type"], "conversation_list");
    assert_eq!(list["conversation"].as_array().map(Vec::len), Some(1));
    Ok(())
}

#[tokio::test]
async fn undecodable_frame_closes_connection() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_login(&addr, 1).await?;
    wait_for_connections(&state, 1).await?;
    tx.send(WsMessage::Text("{not json".into())).await?;
    ws_expect_closed(&mut rx).await?;
    wait_for_connections(&state, 0).await
}

#[tokio::test]
async fn disconnect_frame_unregisters() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (mut tx, mut rx) = ws_login(&addr, 4).await?;
    ws_send(&mut tx, &json!({ "type": "disconnect" })).await?;
    ws_expect_closed(&mut rx).await?;
    wait_for_connections(&state, 0).await
}

#[tokio::test]
async fn idle_connection_is_reaped() -> anyhow::Result<()> {
    let state = StateBuilder::new().idle_timeout_ms(150).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (_tx, mut rx) = ws_login(&addr, 1).await?;
    ws_expect_closed(&mut rx).await?;
    wait_for_connections(&state, 0).await
}

#[tokio::test]
async fn ws_requires_query_token_when_configured() -> anyhow::Result<()> {
    let state = StateBuilder::new().auth_token("secret").build();
    let (addr, _handle) = spawn_http_server(state).await?;

    assert!(ws_connect(&addr, "").await.is_err());
    assert!(ws_connect(&addr, "token=wrong").await.is_err());

    let (mut tx, mut rx) = ws_connect(&addr, "token=secret").await?;
    ws_send(&mut tx, &json!({ "type": "connect", "from": 1 })).await?;
    assert_eq!(ws_recv(&mut rx).await?["type"], "conversation_list");
    Ok(())
}

#[tokio::test]
async fn connection_limit_rejects_upgrade() -> anyhow::Result<()> {
    let state = StateBuilder::new().max_connections(1).build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (tx, rx) = ws_login(&addr, 1).await?;
    assert!(ws_connect(&addr, "").await.is_err());

    drop((tx, rx));
    wait_for_connections(&state, 0).await?;
    let deadline = tokio::time::Instant::now() + RECV_TIMEOUT;
    while state.slots.available_permits() == 0 {
        anyhow::ensure!(tokio::time::Instant::now() < deadline, "permit never released");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    ws_login(&addr, 2).await?;
    Ok(())
}

#[tokio::test]
async fn shutdown_closes_connections() -> anyhow::Result<()> {
    let state = StateBuilder::new().build();
    let (addr, _handle) = spawn_http_server(Arc::clone(&state)).await?;

    let (_tx, mut rx) = ws_login(&addr, 1).await?;
    state.shutdown.cancel();
    ws_expect_closed(&mut rx).await?;
    wait_for_connections(&state, 0).await
}
