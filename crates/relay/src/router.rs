// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Dispatch of inbound chat frames.
//!
//! The router is the only component that writes conversation state. It
//! resolves conversations through the [`Store`], persists messages, and fans
//! them out through the [`Registry`]. Two families of keyed locks replace a
//! single global lock:
//!
//! - find-or-create of a direct conversation is serialized per unordered
//!   user pair, so concurrent first messages between the same two users
//!   create exactly one conversation;
//! - persist + fan-out is serialized per conversation, so every recipient
//!   observes messages of one conversation in persistence order.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::ErrorCode;
use crate::locks::KeyedLocks;
use crate::model::{ConversationId, ConversationKind, MessageKind, MessageStatus, UserId};
use crate::registry::{ConnectionHandle, Registry};
use crate::store::{Store, StoreError};
use crate::wire::{ClientFrame, DeliveryOutcome, ServerFrame};

/// An unordered pair of distinct users, stored low id first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DirectPair {
    low: UserId,
    high: UserId,
}

impl DirectPair {
    pub fn new(a: UserId, b: UserId) -> Self {
        if a <= b {
            Self { low: a, high: b }
        } else {
            Self { low: b, high: a }
        }
    }

    pub fn members(&self) -> [UserId; 2] {
        [self.low, self.high]
    }
}

/// Why a frame was refused.
#[derive(Debug, thiserror::Error)]
pub enum RouteError {
    #[error("frame claims user {claimed} on a connection of user {actual}")]
    IdentityMismatch { claimed: UserId, actual: UserId },
    #[error("message content is empty")]
    EmptyContent,
    #[error("message needs a recipient or a conversation id")]
    NoTarget,
    #[error("user {user} is not a participant of conversation {conversation}")]
    NotParticipant { user: UserId, conversation: ConversationId },
    #[error("conversation needs another participant")]
    NoParticipants,
    #[error("group conversations are not supported")]
    GroupUnsupported,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl RouteError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::IdentityMismatch { .. } | Self::NotParticipant { .. } => ErrorCode::Forbidden,
            Self::EmptyContent | Self::NoTarget | Self::NoParticipants => ErrorCode::BadRequest,
            Self::Store(StoreError::SelfConversation(_)) => ErrorCode::BadRequest,
            Self::GroupUnsupported => ErrorCode::Unsupported,
            Self::Store(_) => ErrorCode::StoreFailed,
        }
    }
}

pub struct Router {
    store: Arc<dyn Store>,
    registry: Arc<Registry>,
    pair_locks: KeyedLocks<DirectPair>,
    conversation_locks: KeyedLocks<ConversationId>,
}

impl Router {
    pub fn new(store: Arc<dyn Store>, registry: Arc<Registry>) -> Self {
        Self {
            store,
            registry,
            pair_locks: KeyedLocks::new(),
            conversation_locks: KeyedLocks::new(),
        }
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Handle one frame received on `origin`. Returns the reply meant for
    /// the originating connection only, if any.
    pub async fn dispatch(&self, origin: &ConnectionHandle, frame: ClientFrame) -> Option<ServerFrame> {
        if let Some(claimed) = frame.claimed_sender() {
            if claimed != origin.user {
                return Some(self.reject(
                    origin,
                    RouteError::IdentityMismatch { claimed, actual: origin.user },
                ));
            }
        }

        let result = match frame {
            ClientFrame::Message { to, content, conversation_id, .. } => {
                self.route_message(origin.user, to, content, conversation_id).await.map(Some)
            }
            ClientFrame::CreateConversation { users, .. } => {
                self.create_conversation(origin.user, &users).await.map(|()| None)
            }
            ClientFrame::GetConversations { .. } => self.conversation_list(origin.user).await.map(Some),
            ClientFrame::GetMessages { conversation_id, .. } => {
                self.message_history(origin.user, conversation_id).await.map(Some)
            }
            ClientFrame::MarkRead { conversation_id, .. } => {
                self.mark_read(origin.user, conversation_id).await.map(Some)
            }
            // Repeated handshakes, disconnects and unknown tags carry nothing to route.
            ClientFrame::Connect { .. } | ClientFrame::Disconnect | ClientFrame::Unknown => Ok(None),
        };

        result.unwrap_or_else(|err| Some(self.reject(origin, err)))
    }

    fn reject(&self, origin: &ConnectionHandle, err: RouteError) -> ServerFrame {
        let code = err.code();
        if code == ErrorCode::StoreFailed {
            tracing::warn!(user = %origin.user, conn = %origin.id, err = %err, "persistence failure");
        } else {
            tracing::debug!(user = %origin.user, conn = %origin.id, code = %code, err = %err, "frame rejected");
        }
        ServerFrame::error(code, err.to_string())
    }

    /// Return the direct conversation between `a` and `b`, creating it when
    /// none exists yet. Idempotent per unordered pair.
    pub async fn find_or_create_direct(&self, a: UserId, b: UserId) -> Result<ConversationId, RouteError> {
        if a == b {
            return Err(StoreError::SelfConversation(a).into());
        }
        let pair = DirectPair::new(a, b);
        let _guard = self.pair_locks.lock(&pair).await;

        for summary in self.store.conversations_for_user(a).await? {
            if summary.kind != ConversationKind::Direct {
                continue;
            }
            match self.store.participants_of(summary.id).await {
                Ok(participants) if participants == pair.members() => return Ok(summary.id),
                Ok(_) => {}
                Err(err) => {
                    tracing::warn!(conversation = %summary.id, err = %err, "skipping unreadable conversation");
                }
            }
        }

        let id = self.store.create_direct_conversation(a, b).await?;
        tracing::info!(conversation = %id, a = %a, b = %b, "direct conversation created");
        Ok(id)
    }

    /// Push a fresh conversation list to every live connection of `user`.
    pub async fn push_conversation_list(&self, user: UserId) -> Result<usize, RouteError> {
        let frame = self.conversation_list(user).await?;
        Ok(self.registry.push(user, &frame))
    }

    /// Push fresh conversation lists to every online user who shares a
    /// conversation with `user`. Used after a nickname change.
    pub async fn refresh_contacts(&self, user: UserId) -> Result<usize, RouteError> {
        let mut contacts = BTreeSet::new();
        for summary in self.store.conversations_for_user(user).await? {
            let participants = self.store.participants_of(summary.id).await?;
            contacts.extend(participants.into_iter().filter(|p| *p != user));
        }
        let mut pushed = 0;
        for contact in contacts {
            if self.registry.is_online(contact) {
                pushed += self.push_conversation_list(contact).await?;
            }
        }
        Ok(pushed)
    }

    pub async fn conversation_list(&self, user: UserId) -> Result<ServerFrame, RouteError> {
        let list = self.store.conversations_for_user(user).await?;
        Ok(ServerFrame::conversation_list(list))
    }

    async fn route_message(
        &self,
        sender: UserId,
        to: Option<UserId>,
        content: Option<String>,
        conversation_id: Option<ConversationId>,
    ) -> Result<ServerFrame, RouteError> {
        let content = content.filter(|c| !c.trim().is_empty()).ok_or(RouteError::EmptyContent)?;
        // Zero ids mean "absent" to legacy clients.
        let conversation_id = conversation_id.filter(|id| id.0 != 0);
        let to = to.filter(|user| user.0 != 0);
        let conversation = match (conversation_id, to) {
            (Some(id), _) => id,
            (None, Some(to)) => self.find_or_create_direct(sender, to).await?,
            (None, None) => return Err(RouteError::NoTarget),
        };

        let _guard = self.conversation_locks.lock(&conversation).await;
        let participants = self.participants_including(sender, conversation).await?;

        let stored = self
            .store
            .create_message(conversation, Some(sender), Some(content.clone()), MessageKind::Text)
            .await?;

        let push = ServerFrame::Message {
            from: sender,
            sender,
            content,
            time: stored.sent_at.clone(),
            conversation_id: conversation,
            message_id: stored.id,
        };
        let mut reached_recipient = false;
        for participant in participants {
            let accepted = self.registry.push(participant, &push);
            if participant != sender && accepted > 0 {
                reached_recipient = true;
            }
        }

        let status = if reached_recipient {
            // The message is persisted and pushed; a failed status bump only
            // leaves it at `sent`.
            if let Err(err) = self.store.advance_status(stored.id, MessageStatus::Delivered).await {
                tracing::warn!(message = %stored.id, err = %err, "status update failed");
            }
            DeliveryOutcome::Delivered
        } else {
            DeliveryOutcome::Stored
        };
        tracing::debug!(message = %stored.id, conversation = %conversation, ?status, "message routed");

        Ok(ServerFrame::MessageStatus {
            message_id: stored.id,
            conversation_id: conversation,
            time: stored.sent_at,
            status,
        })
    }

    async fn create_conversation(&self, user: UserId, users: &[UserId]) -> Result<(), RouteError> {
        let other = match users {
            [] => return Err(RouteError::NoParticipants),
            [other] => *other,
            _ => return Err(RouteError::GroupUnsupported),
        };
        self.find_or_create_direct(user, other).await?;
        for member in [user, other] {
            self.push_conversation_list(member).await?;
        }
        Ok(())
    }

    async fn message_history(
        &self,
        user: UserId,
        conversation: ConversationId,
    ) -> Result<ServerFrame, RouteError> {
        self.participants_including(user, conversation).await?;
        let messages = self.store.messages_in(conversation).await?;
        Ok(ServerFrame::MessageHistory { conversation_id: conversation, messages })
    }

    async fn mark_read(
        &self,
        user: UserId,
        conversation: ConversationId,
    ) -> Result<ServerFrame, RouteError> {
        self.participants_including(user, conversation).await?;
        let changed = self.store.mark_read(conversation, user).await?;
        tracing::debug!(user = %user, conversation = %conversation, changed, "marked read");
        self.conversation_list(user).await
    }

    /// Participants of `conversation`, failing unless `user` is one of them.
    async fn participants_including(
        &self,
        user: UserId,
        conversation: ConversationId,
    ) -> Result<Vec<UserId>, RouteError> {
        let participants = self.store.participants_of(conversation).await?;
        if participants.contains(&user) {
            Ok(participants)
        } else {
            Err(RouteError::NotParticipant { user, conversation })
        }
    }
}

#[cfg(test)]
#[path = "router_tests.rs"]
mod tests;
