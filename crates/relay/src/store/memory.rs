// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Process-local [`Store`] used when no database is configured and in tests.

use std::collections::{BTreeMap, HashMap};

use parking_lot::RwLock;

use crate::model::{
    now_timestamp, ConversationId, ConversationKind, ConversationSummary, MessageId, MessageKind,
    MessageStatus, StoredMessage, UserId,
};
use crate::store::{Store, StoreError, StoreFuture};

#[derive(Debug)]
struct ConversationRow {
    kind: ConversationKind,
    name: Option<String>,
    participants: Vec<UserId>,
    last_message_at: String,
    /// Monotonic activity counter; breaks timestamp ties.
    activity: u64,
}

#[derive(Debug, Default)]
struct Inner {
    users: HashMap<UserId, String>,
    conversations: BTreeMap<ConversationId, ConversationRow>,
    messages: BTreeMap<MessageId, StoredMessage>,
    next_conversation: i64,
    next_message: i64,
    activity: u64,
}

impl Inner {
    fn bump_activity(&mut self) -> u64 {
        self.activity += 1;
        self.activity
    }

    fn display_name(&self, row: &ConversationRow, viewer: UserId) -> String {
        if let Some(ref name) = row.name {
            return name.clone();
        }
        row.participants
            .iter()
            .find(|p| **p != viewer)
            .and_then(|p| self.users.get(p))
            .cloned()
            .unwrap_or_default()
    }

    fn unread_for(&self, conversation: ConversationId, viewer: UserId) -> u64 {
        self.messages
            .values()
            .filter(|m| m.conversation == conversation)
            .filter(|m| m.sender.is_some_and(|s| s != viewer))
            .filter(|m| m.status != MessageStatus::Read)
            .count() as u64
    }
}

/// In-memory conversation store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of direct conversations whose participants are exactly `{a, b}`.
    pub fn direct_conversations_between(&self, a: UserId, b: UserId) -> usize {
        let mut pair = vec![a, b];
        pair.sort();
        self.inner
            .read()
            .conversations
            .values()
            .filter(|c| c.kind == ConversationKind::Direct && c.participants == pair)
            .count()
    }

    /// Total number of conversations of any kind.
    pub fn conversation_count(&self) -> usize {
        self.inner.read().conversations.len()
    }
}

impl Store for MemoryStore {
    fn upsert_user(&self, user: UserId, nickname: &str) -> StoreFuture<'_, ()> {
        self.inner.write().users.insert(user, nickname.to_owned());
        Box::pin(std::future::ready(Ok(())))
    }

    fn create_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> StoreFuture<'_, ConversationId> {
        let result = if a == b {
            Err(StoreError::SelfConversation(a))
        } else {
            let mut inner = self.inner.write();
            inner.next_conversation += 1;
            let id = ConversationId(inner.next_conversation);
            let activity = inner.bump_activity();
            let mut participants = vec![a, b];
            participants.sort();
            inner.conversations.insert(
                id,
                ConversationRow {
                    kind: ConversationKind::Direct,
                    name: None,
                    participants,
                    last_message_at: now_timestamp(),
                    activity,
                },
            );
            Ok(id)
        };
        Box::pin(std::future::ready(result))
    }

    fn conversations_for_user(&self, user: UserId) -> StoreFuture<'_, Vec<ConversationSummary>> {
        let inner = self.inner.read();
        let mut rows: Vec<(&ConversationId, &ConversationRow)> =
            inner.conversations.iter().filter(|(_, c)| c.participants.contains(&user)).collect();
        rows.sort_by(|(_, x), (_, y)| y.activity.cmp(&x.activity));
        let summaries = rows
            .into_iter()
            .map(|(id, row)| ConversationSummary {
                id: *id,
                kind: row.kind,
                name: inner.display_name(row, user),
                last_message_at: row.last_message_at.clone(),
                unread_message_count: inner.unread_for(*id, user),
            })
            .collect();
        Box::pin(std::future::ready(Ok(summaries)))
    }

    fn participants_of(&self, conversation: ConversationId) -> StoreFuture<'_, Vec<UserId>> {
        let participants = self
            .inner
            .read()
            .conversations
            .get(&conversation)
            .map(|c| c.participants.clone())
            .unwrap_or_default();
        Box::pin(std::future::ready(Ok(participants)))
    }

    fn create_message(
        &self,
        conversation: ConversationId,
        sender: Option<UserId>,
        content: Option<String>,
        kind: MessageKind,
    ) -> StoreFuture<'_, StoredMessage> {
        let mut guard = self.inner.write();
        let inner = &mut *guard;
        let sent_at = now_timestamp();
        let activity = inner.bump_activity();
        let result = match inner.conversations.get_mut(&conversation) {
            None => Err(StoreError::ConversationNotFound(conversation)),
            Some(row) => {
                row.last_message_at = sent_at.clone();
                row.activity = activity;
                inner.next_message += 1;
                let msg = StoredMessage {
                    id: MessageId(inner.next_message),
                    conversation,
                    sender,
                    content,
                    kind,
                    sent_at,
                    status: MessageStatus::Sent,
                };
                inner.messages.insert(msg.id, msg.clone());
                Ok(msg)
            }
        };
        drop(guard);
        Box::pin(std::future::ready(result))
    }

    fn messages_in(&self, conversation: ConversationId) -> StoreFuture<'_, Vec<StoredMessage>> {
        let messages = self
            .inner
            .read()
            .messages
            .values()
            .filter(|m| m.conversation == conversation)
            .cloned()
            .collect();
        Box::pin(std::future::ready(Ok(messages)))
    }

    fn advance_status(&self, message: MessageId, status: MessageStatus) -> StoreFuture<'_, bool> {
        let result = match self.inner.write().messages.get_mut(&message) {
            None => Err(StoreError::MessageNotFound(message)),
            Some(m) if m.status.advances_to(status) => {
                m.status = status;
                Ok(true)
            }
            Some(_) => Ok(false),
        };
        Box::pin(std::future::ready(result))
    }

    fn mark_read(&self, conversation: ConversationId, reader: UserId) -> StoreFuture<'_, u64> {
        let mut changed = 0;
        for m in self.inner.write().messages.values_mut() {
            if m.conversation == conversation
                && m.sender.is_some_and(|s| s != reader)
                && m.status != MessageStatus::Read
            {
                m.status = MessageStatus::Read;
                changed += 1;
            }
        }
        Box::pin(std::future::ready(Ok(changed)))
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
