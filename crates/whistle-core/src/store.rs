use std::future::Future;
use std::time::Duration;

use chrono::Utc;
use whistle_db::{messages, DbError, DbPool};
use whistle_models::message::{ConversationSummary, Message, NewMessage};

use crate::conversation;
use crate::error::CoreError;
use crate::observability;

pub const DEFAULT_STORAGE_TIMEOUT: Duration = Duration::from_secs(5);

/// Result of [`MessageStore::append`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Appended {
    pub message: Message,
    /// False when a retried client `messageId` collapsed onto an existing row.
    pub created: bool,
}

/// Durable message log. Every call is bounded by `timeout`.
#[derive(Clone)]
pub struct MessageStore {
    pool: DbPool,
    timeout: Duration,
}

impl MessageStore {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    async fn bounded<T, F>(&self, operation: &'static str, fut: F) -> Result<T, CoreError>
    where
        F: Future<Output = Result<T, DbError>>,
    {
        let err = match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => return Ok(value),
            Ok(Err(err)) => CoreError::from(err),
            Err(_) => CoreError::Storage(DbError::Timeout(self.timeout)),
        };
        if let CoreError::Storage(inner) = &err {
            observability::record_storage_error();
            tracing::warn!(operation, error = %inner, "message store operation failed");
        }
        Err(err)
    }

    /// Persists a new message and returns the stored record. Assumes the
    /// input has already been validated.
    pub async fn append(&self, new: &NewMessage) -> Result<Appended, CoreError> {
        let message_id = new
            .message_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let conversation_id = conversation::resolve(&new.sender_id, &new.receiver_id);

        // Stamped before the insert waits on the pool, so concurrent appends to one
        // conversation may land with timestamps out of `seq` order. History orders
        // by timestamp first.
        let (row, created) = self
            .bounded(
                "append",
                messages::create_message(
                    &self.pool,
                    &message_id,
                    &conversation_id,
                    &new.sender_id,
                    &new.receiver_id,
                    &new.content,
                    Utc::now(),
                ),
            )
            .await?;
        if created {
            observability::record_message_appended();
        }
        Ok(Appended {
            message: row.into(),
            created,
        })
    }

    pub async fn get(&self, message_id: &str) -> Result<Message, CoreError> {
        self.bounded("get", messages::get_message(&self.pool, message_id))
            .await?
            .map(Message::from)
            .ok_or(CoreError::NotFound)
    }

    /// The newest `limit` messages, oldest first. Callers clamp `limit`.
    pub async fn history(&self, conversation_id: &str, limit: u32) -> Result<Vec<Message>, CoreError> {
        let rows = self
            .bounded(
                "history",
                messages::get_conversation_messages(&self.pool, conversation_id, i64::from(limit)),
            )
            .await?;
        Ok(rows.into_iter().map(Message::from).collect())
    }

    pub async fn mark_read(&self, conversation_id: &str) -> Result<u64, CoreError> {
        self.bounded(
            "mark_read",
            messages::mark_conversation_read(&self.pool, conversation_id),
        )
        .await
    }

    pub async fn latest_per_conversation(
        &self,
        user_id: &str,
    ) -> Result<Vec<ConversationSummary>, CoreError> {
        let rows = self
            .bounded(
                "latest_per_conversation",
                messages::latest_message_per_conversation(&self.pool, user_id),
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|row| ConversationSummary {
                conversation_id: row.conversation_id.clone(),
                last_message: row.into(),
            })
            .collect())
    }

    pub async fn purge(&self, conversation_id: &str) -> Result<u64, CoreError> {
        self.bounded(
            "purge",
            messages::delete_conversation_messages(&self.pool, conversation_id),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_pool;

    #[tokio::test]
    async fn append_assigns_id_and_conversation() {
        let store = MessageStore::new(test_pool().await, DEFAULT_STORAGE_TIMEOUT);
        let appended = store
            .append(&NewMessage::new("bob", "alice", "hi"))
            .await
            .unwrap();
        assert!(appended.created);
        let stored = appended.message;
        assert_eq!(stored.conversation_id, "alice_bob");
        assert!(uuid::Uuid::parse_str(&stored.message_id).is_ok());
        assert!(!stored.is_read);
        assert_eq!(store.get(&stored.message_id).await.unwrap(), stored);
    }

    #[tokio::test]
    async fn get_unknown_id_is_not_found() {
        let store = MessageStore::new(test_pool().await, DEFAULT_STORAGE_TIMEOUT);
        assert!(matches!(store.get("nope").await, Err(CoreError::NotFound)));
    }

    #[tokio::test]
    async fn client_supplied_id_is_idempotent() {
        let store = MessageStore::new(test_pool().await, DEFAULT_STORAGE_TIMEOUT);
        let mut new = NewMessage::new("alice", "bob", "hi");
        new.message_id = Some("client-1".into());
        let first = store.append(&new).await.unwrap();
        let second = store.append(&new).await.unwrap();
        assert!(first.created);
        assert!(!second.created);
        assert_eq!(first.message, second.message);
        assert_eq!(store.history("alice_bob", 50).await.unwrap().len(), 1);

        let mut hijack = NewMessage::new("mallory", "bob", "hi");
        hijack.message_id = Some("client-1".into());
        assert!(matches!(
            store.append(&hijack).await,
            Err(CoreError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn history_is_oldest_first_and_bounded() {
        let store = MessageStore::new(test_pool().await, DEFAULT_STORAGE_TIMEOUT);
        for i in 0..4 {
            store
                .append(&NewMessage::new("alice", "bob", format!("msg {i}")))
                .await
                .unwrap();
        }
        let window = store.history("alice_bob", 2).await.unwrap();
        let contents: Vec<_> = window.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["msg 2", "msg 3"]);
    }

    #[tokio::test]
    async fn mark_read_and_purge_report_counts() {
        let store = MessageStore::new(test_pool().await, DEFAULT_STORAGE_TIMEOUT);
        store.append(&NewMessage::new("alice", "bob", "a")).await.unwrap();
        store.append(&NewMessage::new("bob", "alice", "b")).await.unwrap();

        assert_eq!(store.mark_read("alice_bob").await.unwrap(), 2);
        assert_eq!(store.mark_read("alice_bob").await.unwrap(), 0);
        assert!(store
            .history("alice_bob", 50)
            .await
            .unwrap()
            .iter()
            .all(|m| m.is_read));

        assert_eq!(store.purge("alice_bob").await.unwrap(), 2);
        assert_eq!(store.purge("alice_bob").await.unwrap(), 0);
        assert!(store.history("alice_bob", 50).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn latest_per_conversation_summarizes_inbox() {
        let store = MessageStore::new(test_pool().await, DEFAULT_STORAGE_TIMEOUT);
        store.append(&NewMessage::new("alice", "bob", "old")).await.unwrap();
        store.append(&NewMessage::new("carol", "alice", "hey")).await.unwrap();
        store.append(&NewMessage::new("bob", "alice", "new")).await.unwrap();

        let inbox = store.latest_per_conversation("alice").await.unwrap();
        assert_eq!(inbox.len(), 2);
        assert_eq!(inbox[0].conversation_id, "alice_bob");
        assert_eq!(inbox[0].last_message.content, "new");
        assert_eq!(inbox[1].conversation_id, "alice_carol");
    }

    #[tokio::test]
    async fn closed_pool_surfaces_retryable_storage_error() {
        let pool = test_pool().await;
        let store = MessageStore::new(pool.clone(), DEFAULT_STORAGE_TIMEOUT);
        pool.close().await;
        let err = store
            .append(&NewMessage::new("alice", "bob", "hi"))
            .await
            .expect_err("closed pool must fail");
        assert!(err.is_retryable());
    }
}
