use whistle_models::message::{ConversationSummary, Message};
use whistle_util::pagination::HistoryWindow;
use whistle_util::validation;

use crate::error::CoreError;
use crate::store::MessageStore;

/// Inbox view: one entry per conversation, newest first.
pub async fn list_conversations(
    store: &MessageStore,
    user_id: &str,
) -> Result<Vec<ConversationSummary>, CoreError> {
    validation::validate_user_id("userId", user_id)?;
    store.latest_per_conversation(user_id).await
}

pub async fn list_messages(
    store: &MessageStore,
    window: &HistoryWindow,
    conversation_id: &str,
    limit: Option<u32>,
) -> Result<Vec<Message>, CoreError> {
    validation::validate_conversation_id(conversation_id)?;
    store.history(conversation_id, window.clamp(limit)).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;
    use whistle_models::message::NewMessage;

    #[tokio::test]
    async fn limit_zero_still_returns_one_message() {
        let state = test_state().await;
        for i in 0..3 {
            state
                .store
                .append(&NewMessage::new("alice", "bob", format!("m{i}")))
                .await
                .unwrap();
        }
        let window = HistoryWindow::default();
        let one = list_messages(&state.store, &window, "alice_bob", Some(0))
            .await
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].content, "m2");

        let all = list_messages(&state.store, &window, "alice_bob", None)
            .await
            .unwrap();
        assert_eq!(all.len(), 3);
    }

    #[tokio::test]
    async fn unknown_user_has_empty_inbox() {
        let state = test_state().await;
        assert!(list_conversations(&state.store, "nobody").await.unwrap().is_empty());
    }
}
