use whistle_core::message;
use whistle_core::registry::ChannelHandle;
use whistle_core::AppState;
use whistle_models::gateway::{
    ClientEvent, JoinPayload, JoinedPayload, MarkReadRequest, MarkedReadPayload, ServerEvent,
    TypingRequest, UserTypingPayload,
};
use whistle_models::message::NewMessage;
use whistle_util::validation;

const JOIN_REQUIRED: &str = "join required";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Connected,
    Joined { user_id: String },
    Disconnected,
}

/// Protocol state for one client channel. Replies go out through the
/// channel's own handle, so nothing here touches the socket.
pub struct Session {
    app: AppState,
    handle: ChannelHandle,
    state: SessionState,
}

impl Session {
    pub fn new(app: AppState, handle: ChannelHandle) -> Self {
        Self {
            app,
            handle,
            state: SessionState::Connected,
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn user_id(&self) -> Option<&str> {
        match &self.state {
            SessionState::Joined { user_id } => Some(user_id),
            _ => None,
        }
    }

    pub fn channel_id(&self) -> u64 {
        self.handle.id()
    }

    fn reply(&self, event: ServerEvent) {
        if self.handle.try_push(event).is_err() {
            tracing::debug!(channel_id = self.handle.id(), "reply dropped");
        }
    }

    /// Answers a frame that never made it to a typed event.
    pub fn reject_frame(&self, reason: &str) {
        self.reply(ServerEvent::error(format!("invalid frame: {reason}"), false));
    }

    pub fn reject_rate_limited(&self, retry_after_ms: u64) {
        self.reply(ServerEvent::error(
            format!("rate limited, retry after {retry_after_ms}ms"),
            true,
        ));
    }

    pub async fn handle_event(&mut self, event: ClientEvent) {
        if self.state == SessionState::Disconnected {
            return;
        }
        match event {
            ClientEvent::Join(payload) => self.join(payload),
            ClientEvent::SendMessage(new) => self.send_message(new).await,
            ClientEvent::MarkRead(request) => self.mark_read(request).await,
            ClientEvent::Typing(request) => self.typing(request),
        }
    }

    fn join(&mut self, payload: JoinPayload) {
        let user_id = payload.user_id();
        if let Err(err) = validation::validate_user_id("userId", user_id) {
            self.reply(ServerEvent::error(err.to_string(), false));
            return;
        }
        if !self.app.connections.register(user_id, self.handle.clone()) {
            self.reply(ServerEvent::error("server is shutting down", true));
            return;
        }
        tracing::info!(user_id, channel_id = self.handle.id(), "channel joined");
        self.state = SessionState::Joined {
            user_id: user_id.to_string(),
        };
        self.reply(ServerEvent::Joined(JoinedPayload {
            user_id: user_id.to_string(),
        }));
    }

    async fn send_message(&mut self, mut new: NewMessage) {
        let Some(joined) = self.user_id() else {
            self.reply(ServerEvent::error(JOIN_REQUIRED, false));
            return;
        };
        if new.sender_id.trim().is_empty() {
            new.sender_id = joined.to_string();
        } else if self.app.config.strict_sender_identity && new.sender_id != joined {
            self.reply(ServerEvent::error(
                "senderId does not match the joined user",
                false,
            ));
            return;
        }

        // The origin channel receives `message_sent` from the router.
        if let Err(err) =
            message::send_message(&self.app.delivery, &new, Some(&self.handle)).await
        {
            tracing::warn!(
                channel_id = self.handle.id(),
                sender_id = %new.sender_id,
                error = %err,
                "send_message failed"
            );
            self.reply(ServerEvent::error(err.client_message(), err.is_retryable()));
        }
    }

    async fn mark_read(&mut self, request: MarkReadRequest) {
        if self.user_id().is_none() {
            self.reply(ServerEvent::error(JOIN_REQUIRED, false));
            return;
        }
        match message::mark_read(&self.app.store, &request.conversation_id).await {
            Ok(updated) => self.reply(ServerEvent::MarkedRead(MarkedReadPayload {
                conversation_id: request.conversation_id,
                updated,
            })),
            Err(err) => {
                self.reply(ServerEvent::error(err.client_message(), err.is_retryable()));
            }
        }
    }

    fn typing(&self, request: TypingRequest) {
        let Some(sender_id) = self.user_id() else {
            return;
        };
        if request.receiver_id.trim().is_empty() {
            return;
        }
        self.app.delivery.route_ephemeral(
            &request.receiver_id,
            ServerEvent::UserTyping(UserTypingPayload {
                sender_id: sender_id.to_string(),
                is_typing: request.is_typing,
            }),
        );
    }

    /// Terminal. Removes the channel from the registry.
    pub fn close(&mut self) {
        if self.state == SessionState::Disconnected {
            return;
        }
        if let Some(user_id) = self.app.connections.unregister(self.handle.id()) {
            tracing::info!(user_id = %user_id, channel_id = self.handle.id(), "channel left");
        }
        self.state = SessionState::Disconnected;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.close();
    }
}
