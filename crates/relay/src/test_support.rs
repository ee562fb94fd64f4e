// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Shared test infrastructure: builders and assertion helpers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::model::UserId;
use crate::registry::{ConnectionHandle, Registry};
use crate::state::RelayState;
use crate::store::memory::MemoryStore;
use crate::store::Store;
use crate::wire::ServerFrame;

/// Builder for constructing `RelayState` in tests with sensible defaults.
pub struct StateBuilder {
    config: RelayConfig,
    store: Option<Arc<dyn Store>>,
}

impl Default for StateBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBuilder {
    pub fn new() -> Self {
        Self { config: RelayConfig::test(), store: None }
    }

    pub fn auth_token(mut self, t: impl Into<String>) -> Self {
        self.config.auth_token = Some(t.into());
        self
    }

    pub fn max_connections(mut self, n: usize) -> Self {
        self.config.max_connections = n;
        self
    }

    pub fn outbound_buffer(mut self, n: usize) -> Self {
        self.config.outbound_buffer = n;
        self
    }

    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.config.handshake_timeout_ms = ms;
        self
    }

    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.config.idle_timeout_ms = ms;
        self
    }

    pub fn store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn build(self) -> Arc<RelayState> {
        let store = self.store.unwrap_or_else(|| Arc::new(MemoryStore::new()));
        Arc::new(RelayState::new(self.config, store, CancellationToken::new()))
    }
}

/// Register a fake connection for `user` and return its outbound receiver.
pub fn connect(
    registry: &Registry,
    user: UserId,
    capacity: usize,
) -> (ConnectionHandle, mpsc::Receiver<ServerFrame>) {
    let (tx, rx) = mpsc::channel(capacity);
    let handle = ConnectionHandle::new(user, tx, CancellationToken::new());
    registry.register(handle.clone());
    (handle, rx)
}

/// Drain every frame currently queued on `rx`.
pub fn drain(rx: &mut mpsc::Receiver<ServerFrame>) -> Vec<ServerFrame> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

/// Convert any `Result<T, E: Display>` into `anyhow::Result<T>`.
pub trait AnyhowExt<T> {
    fn anyhow(self) -> anyhow::Result<T>;
}

impl<T, E: std::fmt::Display> AnyhowExt<T> for Result<T, E> {
    fn anyhow(self) -> anyhow::Result<T> {
        self.map_err(|e| anyhow::anyhow!("{e}"))
    }
}

/// Assert that an expression evaluates to `Err` whose Display output
/// contains the given substring.
#[macro_export]
macro_rules! assert_err_contains {
    ($expr:expr, $substr:expr) => {{
        let result = $expr;
        let err = result.expect_err(concat!("expected Err for: ", stringify!($expr)));
        let msg = err.to_string();
        assert!(msg.contains($substr), "expected error containing {:?}, got: {msg:?}", $substr);
    }};
}

/// Spawn the HTTP/WS server on a random port for integration testing.
pub async fn spawn_http_server(
    state: Arc<RelayState>,
) -> anyhow::Result<(std::net::SocketAddr, tokio::task::JoinHandle<()>)> {
    let router = crate::transport::build_router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    let handle = tokio::spawn(async move {
        let _ = axum::serve(listener, router).await;
    });
    Ok((addr, handle))
}
