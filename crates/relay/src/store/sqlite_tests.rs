// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use crate::model::{ConversationId, ConversationKind, MessageKind, MessageStatus, UserId};
use crate::store::sqlite::SqliteStore;
use crate::store::{Store, StoreError};

const ALICE: UserId = UserId(1);
const BOB: UserId = UserId(2);
const CAROL: UserId = UserId(3);

async fn open_store() -> anyhow::Result<(tempfile::TempDir, SqliteStore)> {
    let dir = tempfile::tempdir()?;
    let store = SqliteStore::open(&dir.path().join("chat.db")).await?;
    Ok((dir, store))
}

async fn direct_rows(store: &SqliteStore, a: UserId, b: UserId) -> anyhow::Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM conversation AS c
         WHERE c.kind = 'direct'
           AND (SELECT COUNT(*) FROM conversation_participant p WHERE p.conversation_id = c.id) = 2
           AND EXISTS (SELECT 1 FROM conversation_participant p
                       WHERE p.conversation_id = c.id AND p.user_id = ?)
           AND EXISTS (SELECT 1 FROM conversation_participant p
                       WHERE p.conversation_id = c.id AND p.user_id = ?)",
    )
    .bind(a.0)
    .bind(b.0)
    .fetch_one(store.pool())
    .await?;
    Ok(count)
}

#[tokio::test]
async fn self_conversation_writes_nothing() -> anyhow::Result<()> {
    let (_dir, store) = open_store().await?;
    let result = store.create_direct_conversation(BOB, BOB).await;
    assert!(matches!(result, Err(StoreError::SelfConversation(_))));

    let total: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM conversation").fetch_one(store.pool()).await?;
    assert_eq!(total, 0);
    Ok(())
}

#[tokio::test]
async fn direct_conversation_round_trip() -> anyhow::Result<()> {
    let (_dir, store) = open_store().await?;
    store.upsert_user(ALICE, "alice").await?;
    store.upsert_user(BOB, "bobby").await?;
    store.upsert_user(BOB, "bob").await?;

    let id = store.create_direct_conversation(ALICE, BOB).await?;
    assert_eq!(direct_rows(&store, ALICE, BOB).await?, 1);
    assert_eq!(store.participants_of(id).await?, vec![ALICE, BOB]);

    let list = store.conversations_for_user(ALICE).await?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].kind, ConversationKind::Direct);
    assert_eq!(list[0].name, "bob");
    assert_eq!(store.conversations_for_user(BOB).await?[0].name, "alice");
    assert!(store.conversations_for_user(CAROL).await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn message_insert_bumps_activity_and_unread() -> anyhow::Result<()> {
    let (_dir, store) = open_store().await?;
    let with_bob = store.create_direct_conversation(ALICE, BOB).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let with_carol = store.create_direct_conversation(ALICE, CAROL).await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;

    let msg =
        store.create_message(with_bob, Some(BOB), Some("hey".into()), MessageKind::Text).await?;
    store.create_message(with_bob, None, None, MessageKind::System).await?;

    let list = store.conversations_for_user(ALICE).await?;
    assert_eq!(list.iter().map(|c| c.id).collect::<Vec<_>>(), vec![with_bob, with_carol]);
    assert_eq!(list[0].unread_message_count, 1);
    assert!(list[0].last_message_at.as_str() >= msg.sent_at.as_str());
    assert_eq!(store.conversations_for_user(BOB).await?[0].unread_message_count, 0);

    let history = store.messages_in(with_bob).await?;
    assert_eq!(history.len(), 2);
    assert_eq!(history[0], msg);
    assert_eq!(history[1].sender, None);
    assert_eq!(history[1].kind, MessageKind::System);
    Ok(())
}

#[tokio::test]
async fn ordering_holds_within_one_millisecond() -> anyhow::Result<()> {
    let (_dir, store) = open_store().await?;
    let ids = |list: Vec<crate::model::ConversationSummary>| -> Vec<ConversationId> {
        list.into_iter().map(|c| c.id).collect()
    };
    let with_bob = store.create_direct_conversation(ALICE, BOB).await?;
    let with_carol = store.create_direct_conversation(ALICE, CAROL).await?;
    store.create_message(with_bob, Some(BOB), Some("first".into()), MessageKind::Text).await?;
    assert_eq!(ids(store.conversations_for_user(ALICE).await?), vec![with_bob, with_carol]);

    let with_dave = store.create_direct_conversation(ALICE, UserId(4)).await?;
    assert_eq!(
        ids(store.conversations_for_user(ALICE).await?),
        vec![with_dave, with_bob, with_carol]
    );

    store.create_message(with_carol, Some(CAROL), Some("late".into()), MessageKind::Text).await?;
    assert_eq!(
        ids(store.conversations_for_user(ALICE).await?),
        vec![with_carol, with_dave, with_bob]
    );
    Ok(())
}

#[tokio::test]
async fn status_moves_forward_only() -> anyhow::Result<()> {
    let (_dir, store) = open_store().await?;
    let id = store.create_direct_conversation(ALICE, BOB).await?;
    let msg = store.create_message(id, Some(ALICE), Some("hi".into()), MessageKind::Text).await?;

    assert!(store.advance_status(msg.id, MessageStatus::Delivered).await?);
    assert!(!store.advance_status(msg.id, MessageStatus::Sent).await?);
    assert_eq!(store.mark_read(id, BOB).await?, 1);
    assert!(!store.advance_status(msg.id, MessageStatus::Delivered).await?);
    assert_eq!(store.messages_in(id).await?[0].status, MessageStatus::Read);
    Ok(())
}

#[tokio::test]
async fn unknown_conversation_rejects_message() -> anyhow::Result<()> {
    let (_dir, store) = open_store().await?;
    let result =
        store.create_message(ConversationId(7), Some(ALICE), Some("x".into()), MessageKind::Text).await;
    assert!(matches!(result, Err(StoreError::ConversationNotFound(ConversationId(7)))));
    Ok(())
}

#[tokio::test]
async fn reopening_keeps_data() -> anyhow::Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("chat.db");
    let id = {
        let store = SqliteStore::open(&path).await?;
        let id = store.create_direct_conversation(ALICE, BOB).await?;
        store.create_message(id, Some(ALICE), Some("persisted".into()), MessageKind::Text).await?;
        store.pool().close().await;
        id
    };

    let store = SqliteStore::open(&path).await?;
    let history = store.messages_in(id).await?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].content.as_deref(), Some("persisted"));
    Ok(())
}
