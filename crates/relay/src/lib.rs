// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Chatrelay: real-time chat routing between WebSocket clients.

pub mod config;
pub mod error;
pub mod locks;
pub mod model;
pub mod registry;
pub mod router;
pub mod state;
pub mod store;
pub mod test_support;
pub mod transport;
pub mod wire;

use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::state::RelayState;
use crate::store::memory::MemoryStore;
use crate::store::sqlite::SqliteStore;
use crate::store::Store;
use crate::transport::build_router;

/// Open the configured conversation store.
pub async fn open_store(config: &RelayConfig) -> anyhow::Result<Arc<dyn Store>> {
    Ok(match config.database {
        Some(ref path) => {
            tracing::info!(path = %path.display(), "using sqlite store");
            Arc::new(SqliteStore::open(path).await?)
        }
        None => {
            tracing::info!("using in-memory store");
            Arc::new(MemoryStore::new())
        }
    })
}

/// Run the relay server until Ctrl-C.
pub async fn run(config: RelayConfig) -> anyhow::Result<()> {
    let addr = config.bind_addr();
    let shutdown = CancellationToken::new();
    let store = open_store(&config).await?;
    let state = Arc::new(RelayState::new(config, store, shutdown.clone()));

    {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::info!("shutdown requested");
            }
            shutdown.cancel();
        });
    }

    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("chatrelay listening on {addr}");
    let router = build_router(Arc::clone(&state));
    axum::serve(listener, router).with_graceful_shutdown(shutdown.cancelled_owned()).await?;

    state.registry.close_all();
    Ok(())
}
