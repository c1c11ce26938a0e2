use serde::{Deserialize, Serialize};

use crate::message::{Message, NewMessage};

// Client -> Server events
pub const EVENT_JOIN: &str = "join";
pub const EVENT_SEND_MESSAGE: &str = "send_message";
pub const EVENT_MARK_READ: &str = "mark_read";
pub const EVENT_TYPING: &str = "typing";

// Server -> Client events
pub const EVENT_JOINED: &str = "joined";
pub const EVENT_NEW_MESSAGE: &str = "new_message";
pub const EVENT_MESSAGE_SENT: &str = "message_sent";
pub const EVENT_MARKED_READ: &str = "marked_read";
pub const EVENT_USER_TYPING: &str = "user_typing";
pub const EVENT_ERROR: &str = "error";

/// Frame sent by a client: `{"event": "...", "data": ...}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    Join(JoinPayload),
    SendMessage(NewMessage),
    MarkRead(MarkReadRequest),
    Typing(TypingRequest),
}

impl ClientEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Join(_) => EVENT_JOIN,
            Self::SendMessage(_) => EVENT_SEND_MESSAGE,
            Self::MarkRead(_) => EVENT_MARK_READ,
            Self::Typing(_) => EVENT_TYPING,
        }
    }
}

/// `join` takes either a bare user id string or `{"userId": "..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum JoinPayload {
    Bare(String),
    Object {
        #[serde(rename = "userId", default)]
        user_id: String,
    },
}

impl JoinPayload {
    pub fn user_id(&self) -> &str {
        match self {
            Self::Bare(id) => id,
            Self::Object { user_id } => user_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkReadRequest {
    #[serde(default)]
    pub conversation_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypingRequest {
    #[serde(default)]
    pub receiver_id: String,
    #[serde(default)]
    pub is_typing: bool,
}

/// Frame pushed to a client channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Joined(JoinedPayload),
    NewMessage(Message),
    MessageSent(Message),
    MarkedRead(MarkedReadPayload),
    UserTyping(UserTypingPayload),
    Error(ErrorPayload),
}

impl ServerEvent {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Joined(_) => EVENT_JOINED,
            Self::NewMessage(_) => EVENT_NEW_MESSAGE,
            Self::MessageSent(_) => EVENT_MESSAGE_SENT,
            Self::MarkedRead(_) => EVENT_MARKED_READ,
            Self::UserTyping(_) => EVENT_USER_TYPING,
            Self::Error(_) => EVENT_ERROR,
        }
    }

    pub fn error(message: impl Into<String>, retryable: bool) -> Self {
        Self::Error(ErrorPayload {
            message: message.into(),
            retryable,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinedPayload {
    pub user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MarkedReadPayload {
    pub conversation_id: String,
    pub updated: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTypingPayload {
    pub sender_id: String,
    pub is_typing: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorPayload {
    pub message: String,
    pub retryable: bool,
}
