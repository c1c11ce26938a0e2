use whistle_models::message::{Message, NewMessage};
use whistle_util::validation;

use crate::delivery::DeliveryRouter;
use crate::error::CoreError;
use crate::registry::ChannelHandle;
use crate::store::MessageStore;

/// Rejects a send before it reaches the store.
pub fn validate_new_message(new: &NewMessage) -> Result<(), CoreError> {
    validation::validate_user_id("senderId", &new.sender_id)?;
    validation::validate_user_id("receiverId", &new.receiver_id)?;
    validation::validate_message_content(&new.content)?;
    if let Some(message_id) = new.message_id.as_deref() {
        validation::validate_message_id(message_id)?;
    }
    Ok(())
}

/// Shared by the channel and REST paths.
pub async fn send_message(
    delivery: &DeliveryRouter,
    new: &NewMessage,
    origin: Option<&ChannelHandle>,
) -> Result<Message, CoreError> {
    validate_new_message(new)?;
    delivery.deliver(new, origin).await
}

pub async fn get_message(store: &MessageStore, message_id: &str) -> Result<Message, CoreError> {
    validation::validate_message_id(message_id)?;
    store.get(message_id).await
}

pub async fn mark_read(store: &MessageStore, conversation_id: &str) -> Result<u64, CoreError> {
    validation::validate_conversation_id(conversation_id)?;
    let updated = store.mark_read(conversation_id).await?;
    tracing::debug!(conversation_id, updated, "conversation marked read");
    Ok(updated)
}

/// Deletes every message of a conversation. Burning an empty conversation
/// succeeds with zero rows.
pub async fn burn_conversation(
    store: &MessageStore,
    conversation_id: &str,
) -> Result<u64, CoreError> {
    validation::validate_conversation_id(conversation_id)?;
    let deleted = store.purge(conversation_id).await?;
    tracing::info!(conversation_id, deleted, "conversation burned");
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::test_state;

    #[tokio::test]
    async fn empty_fields_are_rejected_before_storage() {
        let state = test_state().await;
        for new in [
            NewMessage::new("", "bob", "hi"),
            NewMessage::new("alice", "", "hi"),
            NewMessage::new("alice", "bob", ""),
        ] {
            let err = send_message(&state.delivery, &new, None)
                .await
                .expect_err("must fail validation");
            assert!(matches!(err, CoreError::Validation(_)));
        }
        assert!(state.store.history("alice_bob", 100).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn send_then_burn() {
        let state = test_state().await;
        let stored = send_message(&state.delivery, &NewMessage::new("alice", "bob", "hi"), None)
            .await
            .unwrap();
        assert_eq!(
            get_message(&state.store, &stored.message_id).await.unwrap(),
            stored
        );
        assert_eq!(mark_read(&state.store, "alice_bob").await.unwrap(), 1);
        assert_eq!(burn_conversation(&state.store, "alice_bob").await.unwrap(), 1);
        assert!(matches!(
            get_message(&state.store, &stored.message_id).await,
            Err(CoreError::NotFound)
        ));
    }

    #[tokio::test]
    async fn blank_conversation_id_is_rejected() {
        let state = test_state().await;
        assert!(matches!(
            mark_read(&state.store, " ").await,
            Err(CoreError::Validation(_))
        ));
        assert!(matches!(
            burn_conversation(&state.store, "").await,
            Err(CoreError::Validation(_))
        ));
    }
}
