use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A stored direct message. Everything except `is_read` is fixed at creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub message_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub conversation_id: String,
    /// Client-side ciphertext. Never inspected by the server.
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub is_read: bool,
}

/// Input to a send. Missing fields deserialize as empty strings so that the
/// validation layer, not serde, decides what is rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessage {
    #[serde(default)]
    pub sender_id: String,
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub content: String,
    /// Client-chosen id for idempotent retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl NewMessage {
    pub fn new(
        sender_id: impl Into<String>,
        receiver_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            sender_id: sender_id.into(),
            receiver_id: receiver_id.into(),
            content: content.into(),
            message_id: None,
        }
    }
}

/// Inbox entry: a conversation and its newest message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationSummary {
    pub conversation_id: String,
    pub last_message: Message,
}
