// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Durable conversation storage consumed by the router.

pub mod memory;
pub mod sqlite;

use std::future::Future;
use std::pin::Pin;

use crate::model::{
    ConversationId, ConversationSummary, MessageId, MessageKind, MessageStatus, StoredMessage,
    UserId,
};

/// Boxed future returned by [`Store`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("cannot create a direct conversation with oneself (user {0})")]
    SelfConversation(UserId),
    #[error("conversation {0} not found")]
    ConversationNotFound(ConversationId),
    #[error("message {0} not found")]
    MessageNotFound(MessageId),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Persistence collaborator for conversations and messages.
///
/// Implementations provide their own internal concurrency safety; callers
/// only serialize their own decision logic. Object-safe for use as
/// `Arc<dyn Store>`.
pub trait Store: Send + Sync + 'static {
    /// Create or rename a user record. Nicknames feed direct-conversation
    /// display names.
    fn upsert_user(&self, user: UserId, nickname: &str) -> StoreFuture<'_, ()>;

    /// Create a new direct conversation between two distinct users.
    fn create_direct_conversation(&self, a: UserId, b: UserId)
        -> StoreFuture<'_, ConversationId>;

    /// Every conversation `user` takes part in, most recently active first.
    fn conversations_for_user(&self, user: UserId) -> StoreFuture<'_, Vec<ConversationSummary>>;

    /// Participant ids of a conversation in ascending order. Empty when the
    /// conversation does not exist.
    fn participants_of(&self, conversation: ConversationId) -> StoreFuture<'_, Vec<UserId>>;

    /// Persist a message with status `sent`. Bumps the conversation's
    /// last-activity timestamp.
    fn create_message(
        &self,
        conversation: ConversationId,
        sender: Option<UserId>,
        content: Option<String>,
        kind: MessageKind,
    ) -> StoreFuture<'_, StoredMessage>;

    /// Messages of a conversation, oldest first.
    fn messages_in(&self, conversation: ConversationId) -> StoreFuture<'_, Vec<StoredMessage>>;

    /// Move a message's status forward. Returns `false` when `status` would
    /// not advance it.
    fn advance_status(&self, message: MessageId, status: MessageStatus) -> StoreFuture<'_, bool>;

    /// Mark every message in `conversation` sent by someone other than
    /// `reader` as read. Returns how many changed.
    fn mark_read(&self, conversation: ConversationId, reader: UserId) -> StoreFuture<'_, u64>;
}
