// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! SQLite-backed [`Store`].

use std::path::Path;
use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};

use crate::model::{
    now_timestamp, ConversationId, ConversationKind, ConversationSummary, MessageId, MessageKind,
    MessageStatus, StoredMessage, UserId,
};
use crate::store::{Store, StoreError, StoreFuture};

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        nickname TEXT NOT NULL
    )",
    "CREATE TABLE IF NOT EXISTS conversation (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        kind TEXT NOT NULL CHECK (kind IN ('direct', 'group')),
        name TEXT,
        created_at TEXT NOT NULL,
        last_message_at TEXT NOT NULL,
        activity INTEGER NOT NULL DEFAULT 0
    )",
    "CREATE TABLE IF NOT EXISTS conversation_participant (
        conversation_id INTEGER NOT NULL REFERENCES conversation(id) ON DELETE CASCADE,
        user_id INTEGER NOT NULL,
        PRIMARY KEY (conversation_id, user_id)
    )",
    "CREATE INDEX IF NOT EXISTS idx_participant_user ON conversation_participant(user_id)",
    "CREATE TABLE IF NOT EXISTS message (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        conversation_id INTEGER NOT NULL REFERENCES conversation(id) ON DELETE CASCADE,
        sender_id INTEGER,
        content TEXT,
        kind TEXT NOT NULL CHECK (kind IN ('text', 'image', 'file', 'system')),
        sent_at TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'sent' CHECK (status IN ('sent', 'delivered', 'read'))
    )",
    "CREATE INDEX IF NOT EXISTS idx_message_conversation ON message(conversation_id, sent_at)",
    "CREATE TRIGGER IF NOT EXISTS bump_conversation_activity
        AFTER INSERT ON message
        BEGIN
            UPDATE conversation
            SET last_message_at = NEW.sent_at,
                activity = (SELECT MAX(activity) FROM conversation) + 1
            WHERE id = NEW.conversation_id;
        END",
];

const STATUS_RANK: &str =
    "CASE status WHEN 'sent' THEN 0 WHEN 'delivered' THEN 1 WHEN 'read' THEN 2 END";

/// Conversation store over a SQLite connection pool.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path` and apply the schema.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true);
        let pool = SqlitePoolOptions::new().max_connections(8).connect_with(options).await?;
        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StoreError> {
        for stmt in SCHEMA {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn parse_column<T: FromStr>(row: &SqliteRow, column: &str) -> Result<T, StoreError>
where
    T::Err: std::fmt::Display,
{
    let raw: String = row.try_get(column)?;
    raw.parse::<T>().map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn row_to_message(row: &SqliteRow) -> Result<StoredMessage, StoreError> {
    Ok(StoredMessage {
        id: MessageId(row.try_get("id")?),
        conversation: ConversationId(row.try_get("conversation_id")?),
        sender: row.try_get::<Option<i64>, _>("sender_id")?.map(UserId),
        content: row.try_get("content")?,
        kind: parse_column::<MessageKind>(row, "kind")?,
        sent_at: row.try_get("sent_at")?,
        status: parse_column::<MessageStatus>(row, "status")?,
    })
}

impl SqliteStore {
    async fn save_user(&self, user: UserId, nickname: String) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO users (id, nickname) VALUES (?, ?)
             ON CONFLICT(id) DO UPDATE SET nickname = excluded.nickname",
        )
        .bind(user.0)
        .bind(nickname)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_direct(&self, a: UserId, b: UserId) -> Result<ConversationId, StoreError> {
        if a == b {
            return Err(StoreError::SelfConversation(a));
        }
        let now = now_timestamp();
        let mut tx = self.pool.begin().await?;
        let id = sqlx::query(
            "INSERT INTO conversation (kind, created_at, last_message_at, activity)
             VALUES ('direct', ?, ?, (SELECT COALESCE(MAX(activity), 0) + 1 FROM conversation))",
        )
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?
        .last_insert_rowid();
        for user in [a, b] {
            sqlx::query(
                "INSERT INTO conversation_participant (conversation_id, user_id) VALUES (?, ?)",
            )
            .bind(id)
            .bind(user.0)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(ConversationId(id))
    }

    async fn load_conversations(
        &self,
        user: UserId,
    ) -> Result<Vec<ConversationSummary>, StoreError> {
        let rows = sqlx::query(
            "SELECT
                c.id,
                c.kind,
                COALESCE(
                    c.name,
                    (SELECT u.nickname
                     FROM conversation_participant AS other
                     JOIN users AS u ON u.id = other.user_id
                     WHERE other.conversation_id = c.id AND other.user_id != ?1
                     LIMIT 1),
                    ''
                ) AS name,
                c.last_message_at,
                (SELECT COUNT(*)
                 FROM message AS m
                 WHERE m.conversation_id = c.id
                   AND m.sender_id IS NOT NULL
                   AND m.sender_id != ?1
                   AND m.status != 'read') AS unread
             FROM conversation AS c
             JOIN conversation_participant AS cp ON cp.conversation_id = c.id
             WHERE cp.user_id = ?1
             ORDER BY c.activity DESC",
        )
        .bind(user.0)
        .fetch_all(&self.pool)
        .await?;

        let mut summaries = Vec::with_capacity(rows.len());
        for row in &rows {
            summaries.push(ConversationSummary {
                id: ConversationId(row.try_get("id")?),
                kind: parse_column::<ConversationKind>(row, "kind")?,
                name: row.try_get("name")?,
                last_message_at: row.try_get("last_message_at")?,
                unread_message_count: row.try_get::<i64, _>("unread")?.max(0) as u64,
            });
        }
        Ok(summaries)
    }

    async fn load_participants(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<UserId>, StoreError> {
        let ids: Vec<i64> = sqlx::query_scalar(
            "SELECT user_id FROM conversation_participant
             WHERE conversation_id = ? ORDER BY user_id",
        )
        .bind(conversation.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids.into_iter().map(UserId).collect())
    }

    async fn insert_message(
        &self,
        conversation: ConversationId,
        sender: Option<UserId>,
        content: Option<String>,
        kind: MessageKind,
    ) -> Result<StoredMessage, StoreError> {
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM conversation WHERE id = ?")
            .bind(conversation.0)
            .fetch_optional(&self.pool)
            .await?;
        if exists.is_none() {
            return Err(StoreError::ConversationNotFound(conversation));
        }

        let sent_at = now_timestamp();
        let id = sqlx::query(
            "INSERT INTO message (conversation_id, sender_id, content, kind, sent_at)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(conversation.0)
        .bind(sender.map(|s| s.0))
        .bind(content.clone())
        .bind(kind.as_str())
        .bind(&sent_at)
        .execute(&self.pool)
        .await?
        .last_insert_rowid();

        Ok(StoredMessage {
            id: MessageId(id),
            conversation,
            sender,
            content,
            kind,
            sent_at,
            status: MessageStatus::Sent,
        })
    }

    async fn load_messages(
        &self,
        conversation: ConversationId,
    ) -> Result<Vec<StoredMessage>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, conversation_id, sender_id, content, kind, sent_at, status
             FROM message WHERE conversation_id = ?
             ORDER BY sent_at ASC, id ASC",
        )
        .bind(conversation.0)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_message).collect()
    }

    async fn update_status(
        &self,
        message: MessageId,
        status: MessageStatus,
    ) -> Result<bool, StoreError> {
        let sql = format!("UPDATE message SET status = ? WHERE id = ? AND {STATUS_RANK} < ?");
        let result = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(message.0)
            .bind(status.rank())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() > 0 {
            return Ok(true);
        }
        let exists: Option<i64> = sqlx::query_scalar("SELECT id FROM message WHERE id = ?")
            .bind(message.0)
            .fetch_optional(&self.pool)
            .await?;
        match exists {
            Some(_) => Ok(false),
            None => Err(StoreError::MessageNotFound(message)),
        }
    }

    async fn update_read(
        &self,
        conversation: ConversationId,
        reader: UserId,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "UPDATE message SET status = 'read'
             WHERE conversation_id = ?
               AND sender_id IS NOT NULL
               AND sender_id != ?
               AND status != 'read'",
        )
        .bind(conversation.0)
        .bind(reader.0)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

impl Store for SqliteStore {
    fn upsert_user(&self, user: UserId, nickname: &str) -> StoreFuture<'_, ()> {
        Box::pin(self.save_user(user, nickname.to_owned()))
    }

    fn create_direct_conversation(
        &self,
        a: UserId,
        b: UserId,
    ) -> StoreFuture<'_, ConversationId> {
        Box::pin(self.insert_direct(a, b))
    }

    fn conversations_for_user(&self, user: UserId) -> StoreFuture<'_, Vec<ConversationSummary>> {
        Box::pin(self.load_conversations(user))
    }

    fn participants_of(&self, conversation: ConversationId) -> StoreFuture<'_, Vec<UserId>> {
        Box::pin(self.load_participants(conversation))
    }

    fn create_message(
        &self,
        conversation: ConversationId,
        sender: Option<UserId>,
        content: Option<String>,
        kind: MessageKind,
    ) -> StoreFuture<'_, StoredMessage> {
        Box::pin(self.insert_message(conversation, sender, content, kind))
    }

    fn messages_in(&self, conversation: ConversationId) -> StoreFuture<'_, Vec<StoredMessage>> {
        Box::pin(self.load_messages(conversation))
    }

    fn advance_status(&self, message: MessageId, status: MessageStatus) -> StoreFuture<'_, bool> {
        Box::pin(self.update_status(message, status))
    }

    fn mark_read(&self, conversation: ConversationId, reader: UserId) -> StoreFuture<'_, u64> {
        Box::pin(self.update_read(conversation, reader))
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
