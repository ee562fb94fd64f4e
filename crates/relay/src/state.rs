// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::config::RelayConfig;
use crate::registry::Registry;
use crate::router::Router;
use crate::store::Store;

/// Shared relay state handed to every handler.
pub struct RelayState {
    pub config: RelayConfig,
    pub store: Arc<dyn Store>,
    pub registry: Arc<Registry>,
    pub router: Router,
    /// One permit per live WebSocket connection.
    pub slots: Arc<Semaphore>,
    pub shutdown: CancellationToken,
}

impl RelayState {
    pub fn new(config: RelayConfig, store: Arc<dyn Store>, shutdown: CancellationToken) -> Self {
        let registry = Arc::new(Registry::new());
        let router = Router::new(Arc::clone(&store), Arc::clone(&registry));
        let slots = Arc::new(Semaphore::new(config.max_connections));
        Self { config, store, registry, router, slots, shutdown }
    }
}
