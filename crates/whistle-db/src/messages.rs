use crate::{
    bool_from_any_row, datetime_from_db_text, datetime_to_db_text, is_unique_violation, DbError,
    DbPool,
};
use chrono::{DateTime, Utc};
use sqlx::Row;
use whistle_models::message::Message;

const MESSAGE_COLUMNS: &str =
    "message_id, conversation_id, sender_id, receiver_id, content, is_read, created_at";

#[derive(Debug, Clone)]
pub struct MessageRow {
    pub message_id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    pub is_read: bool,
    pub created_at: DateTime<Utc>,
}

impl<'r> sqlx::FromRow<'r, sqlx::any::AnyRow> for MessageRow {
    fn from_row(row: &'r sqlx::any::AnyRow) -> Result<Self, sqlx::Error> {
        let created_at_raw: String = row.try_get("created_at")?;
        Ok(Self {
            message_id: row.try_get("message_id")?,
            conversation_id: row.try_get("conversation_id")?,
            sender_id: row.try_get("sender_id")?,
            receiver_id: row.try_get("receiver_id")?,
            content: row.try_get("content")?,
            is_read: bool_from_any_row(row, "is_read")?,
            created_at: datetime_from_db_text(&created_at_raw)?,
        })
    }
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            message_id: row.message_id,
            sender_id: row.sender_id,
            receiver_id: row.receiver_id,
            conversation_id: row.conversation_id,
            content: row.content,
            timestamp: row.created_at,
            is_read: row.is_read,
        }
    }
}

/// Inserts a message. The flag is false when an existing `message_id` from
/// the same sender in the same conversation was found instead; that row is
/// returned as it was appended, so `is_read` is always false.
pub async fn create_message(
    pool: &DbPool,
    message_id: &str,
    conversation_id: &str,
    sender_id: &str,
    receiver_id: &str,
    content: &str,
    created_at: DateTime<Utc>,
) -> Result<(MessageRow, bool), DbError> {
    let sql = format!(
        "INSERT INTO messages (message_id, conversation_id, sender_id, receiver_id, content, is_read, created_at)
         VALUES ($1, $2, $3, $4, $5, 0, $6)
         RETURNING {MESSAGE_COLUMNS}"
    );
    let inserted = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(message_id)
        .bind(conversation_id)
        .bind(sender_id)
        .bind(receiver_id)
        .bind(content)
        .bind(datetime_to_db_text(created_at))
        .fetch_one(pool)
        .await;

    match inserted {
        Ok(row) => Ok((row, true)),
        Err(err) if is_unique_violation(&err) => {
            let existing = get_message(pool, message_id).await?;
            match existing {
                Some(mut existing)
                    if existing.sender_id == sender_id
                        && existing.conversation_id == conversation_id =>
                {
                    tracing::debug!(message_id, "duplicate send collapsed onto stored message");
                    existing.is_read = false;
                    Ok((existing, false))
                }
                _ => Err(DbError::MessageIdConflict(message_id.to_string())),
            }
        }
        Err(err) => Err(DbError::Sqlx(err)),
    }
}

pub async fn get_message(pool: &DbPool, message_id: &str) -> Result<Option<MessageRow>, DbError> {
    let sql = format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE message_id = $1");
    let row = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(message_id)
        .fetch_optional(pool)
        .await?;
    Ok(row)
}

/// The newest `limit` messages of a conversation, returned oldest first.
pub async fn get_conversation_messages(
    pool: &DbPool,
    conversation_id: &str,
    limit: i64,
) -> Result<Vec<MessageRow>, DbError> {
    let sql = format!(
        "SELECT {MESSAGE_COLUMNS}
         FROM messages
         WHERE conversation_id = $1
         ORDER BY created_at DESC, seq DESC
         LIMIT $2"
    );
    let mut rows = sqlx::query_as::<_, MessageRow>(&sql)
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(pool)
        .await?;
    rows.reverse();
    Ok(rows)
}

/// Flips every unread message in the conversation. Returns how many changed.
pub async fn mark_conversation_read(pool: &DbPool, conversation_id: &str) -> Result<u64, DbError> {
    let result =
        sqlx::query("UPDATE messages SET is_read = 1 WHERE conversation_id = $1 AND is_read = 0")
            .bind(conversation_id)
            .execute(pool)
            .await?;
    Ok(result.rows_affected())
}

/// Newest message of every conversation the user takes part in, newest first.
pub async fn latest_message_per_conversation(
    pool: &DbPool,
    user_id: &str,
) -> Result<Vec<MessageRow>, DbError> {
    let rows = sqlx::query_as::<_, MessageRow>(
        "SELECT m.message_id, m.conversation_id, m.sender_id, m.receiver_id, m.content, m.is_read, m.created_at
         FROM messages m
         WHERE (m.sender_id = $1 OR m.receiver_id = $1)
           AND NOT EXISTS (
               SELECT 1 FROM messages newer
               WHERE newer.conversation_id = m.conversation_id
                 AND (newer.created_at > m.created_at
                      OR (newer.created_at = m.created_at AND newer.seq > m.seq))
           )
         ORDER BY m.created_at DESC, m.seq DESC",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(rows)
}

pub async fn delete_conversation_messages(
    pool: &DbPool,
    conversation_id: &str,
) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM messages WHERE conversation_id = $1")
        .bind(conversation_id)
        .execute(pool)
        .await?;
    Ok(result.rows_affected())
}
