// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Live connection bookkeeping, keyed by user.
//!
//! The registry only holds [`ConnectionHandle`]s: the outbound queue and
//! cancellation token of each connection. The socket itself stays with its
//! worker task, so nothing here ever blocks on network I/O.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;

use crate::model::UserId;
use crate::wire::ServerFrame;

/// Process-unique identifier of one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Sending half of a live connection.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    pub id: ConnectionId,
    pub user: UserId,
    outbound: mpsc::Sender<ServerFrame>,
    cancel: CancellationToken,
}

impl ConnectionHandle {
    pub fn new(
        user: UserId,
        outbound: mpsc::Sender<ServerFrame>,
        cancel: CancellationToken,
    ) -> Self {
        Self { id: ConnectionId::next(), user, outbound, cancel }
    }

    /// Queue a frame without waiting.
    pub fn try_send(&self, frame: ServerFrame) -> Result<(), TrySendError<ServerFrame>> {
        self.outbound.try_send(frame)
    }

    /// Cancelled when the connection must close.
    pub fn cancelled(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled() || self.outbound.is_closed()
    }
}

/// The authoritative set of live connections.
#[derive(Default)]
pub struct Registry {
    by_user: RwLock<HashMap<UserId, Vec<ConnectionHandle>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection. A user may hold any number of connections.
    pub fn register(&self, handle: ConnectionHandle) {
        tracing::debug!(user = %handle.user, conn = %handle.id, "connection registered");
        self.by_user.write().entry(handle.user).or_default().push(handle);
    }

    /// Remove a connection and signal its worker to close. Returns `false`
    /// when the connection was not registered.
    pub fn unregister(&self, id: ConnectionId) -> bool {
        let removed = {
            let mut by_user = self.by_user.write();
            let mut removed = None;
            by_user.retain(|_, handles| {
                if let Some(pos) = handles.iter().position(|h| h.id == id) {
                    removed = Some(handles.swap_remove(pos));
                }
                !handles.is_empty()
            });
            removed
        };
        match removed {
            Some(handle) => {
                handle.cancel.cancel();
                tracing::debug!(user = %handle.user, conn = %id, "connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Every live connection of `user`.
    pub fn lookup_by_user(&self, user: UserId) -> Vec<ConnectionHandle> {
        self.by_user.read().get(&user).cloned().unwrap_or_default()
    }

    pub fn is_online(&self, user: UserId) -> bool {
        self.by_user.read().contains_key(&user)
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.by_user.read().values().flatten().any(|h| h.id == id)
    }

    pub fn connection_count(&self) -> usize {
        self.by_user.read().values().map(Vec::len).sum()
    }

    pub fn online_users(&self) -> Vec<UserId> {
        let mut users: Vec<UserId> = self.by_user.read().keys().copied().collect();
        users.sort();
        users
    }

    /// Queue `frame` on every live connection of `user`.
    ///
    /// A connection whose queue is full or closed counts as dead and is
    /// unregistered. Returns how many connections accepted the frame.
    pub fn push(&self, user: UserId, frame: &ServerFrame) -> usize {
        let mut delivered = 0;
        for handle in self.lookup_by_user(user) {
            match handle.try_send(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::warn!(user = %user, conn = %handle.id, "outbound queue full, evicting");
                    self.unregister(handle.id);
                }
                Err(TrySendError::Closed(_)) => {
                    tracing::debug!(user = %user, conn = %handle.id, "outbound queue closed");
                    self.unregister(handle.id);
                }
            }
        }
        delivered
    }

    /// Cancel and drop every connection.
    pub fn close_all(&self) {
        let drained: Vec<ConnectionHandle> =
            self.by_user.write().drain().flat_map(|(_, handles)| handles).collect();
        for handle in drained {
            handle.cancel.cancel();
        }
    }
}

#[cfg(test)]
#[path = "registry_tests.rs"]
mod tests;
