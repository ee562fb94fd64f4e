// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! JSON frames exchanged with chat clients over the WebSocket.
//!
//! Frames are internally tagged on `type`. Inbound and outbound directions
//! are separate enums so that fields meant for one side (a conversation
//! snapshot, a recipient id) cannot leak into the other. Field names keep
//! the camel-cased `conversationId`/`messageId` keys existing web clients
//! already send.

use serde::{Deserialize, Serialize};

use crate::error::ErrorCode;
use crate::model::{ConversationId, ConversationSummary, MessageId, StoredMessage, UserId};

// ---------------------------------------------------------------------------
// Client -> Server
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Mandatory first frame on every connection.
    Connect { from: UserId },
    Message {
        #[serde(default)]
        from: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        to: Option<UserId>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
        #[serde(
            default,
            rename = "conversationId",
            skip_serializing_if = "Option::is_none"
        )]
        conversation_id: Option<ConversationId>,
    },
    CreateConversation {
        #[serde(default)]
        from: Option<UserId>,
        #[serde(default)]
        users: Vec<UserId>,
    },
    GetConversations {
        #[serde(default)]
        from: Option<UserId>,
    },
    GetMessages {
        #[serde(default)]
        from: Option<UserId>,
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    MarkRead {
        #[serde(default)]
        from: Option<UserId>,
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
    },
    Disconnect,
    /// Any type tag this server does not know. Ignored.
    #[serde(other)]
    Unknown,
}

impl ClientFrame {
    /// The `from` field the client claimed, if any.
    pub fn claimed_sender(&self) -> Option<UserId> {
        match self {
            Self::Connect { from } => Some(*from),
            Self::Message { from, .. }
            | Self::CreateConversation { from, .. }
            | Self::GetConversations { from }
            | Self::GetMessages { from, .. }
            | Self::MarkRead { from, .. } => *from,
            Self::Disconnect | Self::Unknown => None,
        }
    }
}

// ---------------------------------------------------------------------------
// Server -> Client
// ---------------------------------------------------------------------------

/// Whether a sent chat message reached another participant live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryOutcome {
    /// Pushed to at least one live connection of another participant.
    Delivered,
    /// Persisted only; recipients will see it on their next fetch.
    Stored,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    /// A chat line pushed to a participant.
    Message {
        from: UserId,
        sender: UserId,
        content: String,
        time: String,
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        #[serde(rename = "messageId")]
        message_id: MessageId,
    },
    ConversationList {
        conversation: Vec<ConversationSummary>,
    },
    MessageHistory {
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        messages: Vec<StoredMessage>,
    },
    /// Acknowledgement for the connection that sent a chat message.
    MessageStatus {
        #[serde(rename = "messageId")]
        message_id: MessageId,
        #[serde(rename = "conversationId")]
        conversation_id: ConversationId,
        time: String,
        status: DeliveryOutcome,
    },
    Error {
        code: String,
        message: String,
    },
}

impl ServerFrame {
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error { code: code.as_str().to_owned(), message: message.into() }
    }

    pub fn conversation_list(conversation: Vec<ConversationSummary>) -> Self {
        Self::ConversationList { conversation }
    }

    /// Serialize to the text payload of a WebSocket frame.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
