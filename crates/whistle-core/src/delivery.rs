use std::sync::Arc;

use whistle_models::gateway::ServerEvent;
use whistle_models::message::{Message, NewMessage};

use crate::error::CoreError;
use crate::observability;
use crate::registry::{ChannelHandle, ConnectionRegistry, PushError};
use crate::store::{Appended, MessageStore};

/// Persist-then-push fan-out for durable messages, plus a best-effort path
/// for ephemeral signals.
#[derive(Clone)]
pub struct DeliveryRouter {
    store: MessageStore,
    registry: Arc<ConnectionRegistry>,
}

impl DeliveryRouter {
    pub fn new(store: MessageStore, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Appends the message, pushes `new_message` to the receiver and
    /// `message_sent` to the sender. With `origin` set only that channel is
    /// acknowledged; otherwise every channel of the sender is. A retried
    /// `messageId` that was already stored is only acknowledged.
    pub async fn deliver(
        &self,
        new: &NewMessage,
        origin: Option<&ChannelHandle>,
    ) -> Result<Message, CoreError> {
        let Appended { message, created } = self.store.append(new).await?;

        if created {
            let delivered = self.push_to_user(
                &message.receiver_id,
                ServerEvent::NewMessage(message.clone()),
            );
            tracing::debug!(
                message_id = %message.message_id,
                conversation_id = %message.conversation_id,
                delivered,
                "message routed to receiver"
            );
        }

        let ack = ServerEvent::MessageSent(message.clone());
        match origin {
            Some(channel) => {
                self.push(&message.sender_id, channel, ack);
            }
            None => {
                self.push_to_user(&message.sender_id, ack);
            }
        }

        Ok(message)
    }

    /// Pushes a transient event to whatever channels the receiver has right
    /// now. Nothing is stored or retried and no error is reported.
    pub fn route_ephemeral(&self, receiver_id: &str, event: ServerEvent) -> usize {
        self.push_to_user(receiver_id, event)
    }

    fn push_to_user(&self, user_id: &str, event: ServerEvent) -> usize {
        self.registry
            .channels_for(user_id)
            .iter()
            .filter(|channel| self.push(user_id, channel, event.clone()))
            .count()
    }

    fn push(&self, user_id: &str, channel: &ChannelHandle, event: ServerEvent) -> bool {
        match channel.try_push(event) {
            Ok(()) => {
                observability::record_push_delivered();
                true
            }
            Err(PushError::Full) => {
                observability::record_push_dropped();
                tracing::warn!(user_id, channel_id = channel.id(), "outbound buffer full, event dropped");
                false
            }
            Err(PushError::Closed) => {
                observability::record_push_dropped();
                self.registry.unregister(channel.id());
                tracing::debug!(user_id, channel_id = channel.id(), "pruned closed channel");
                false
            }
        }
    }
}
