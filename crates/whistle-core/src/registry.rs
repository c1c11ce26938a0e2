use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use whistle_models::gateway::ServerEvent;

pub type ChannelId = u64;

pub const DEFAULT_CHANNEL_BUFFER: usize = 256;

static NEXT_CHANNEL_ID: AtomicU64 = AtomicU64::new(1);

/// Outbound half of one live client channel.
#[derive(Debug, Clone)]
pub struct ChannelHandle {
    id: ChannelId,
    sender: mpsc::Sender<ServerEvent>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushError {
    /// The outbound buffer is full; the event was dropped.
    Full,
    /// The writer side is gone.
    Closed,
}

impl ChannelHandle {
    /// Allocates a fresh channel id with a bounded outbound queue.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<ServerEvent>) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let id = NEXT_CHANNEL_ID.fetch_add(1, Ordering::Relaxed);
        (Self { id, sender }, receiver)
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    /// Non-blocking push.
    pub fn try_push(&self, event: ServerEvent) -> Result<(), PushError> {
        self.sender.try_send(event).map_err(|err| match err {
            mpsc::error::TrySendError::Full(_) => PushError::Full,
            mpsc::error::TrySendError::Closed(_) => PushError::Closed,
        })
    }

    pub fn is_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

/// Live mapping from user id to the channels that user has joined from.
pub struct ConnectionRegistry {
    by_user: DashMap<String, HashMap<ChannelId, ChannelHandle>>,
    by_channel: DashMap<ChannelId, String>,
    shutdown: CancellationToken,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            by_user: DashMap::new(),
            by_channel: DashMap::new(),
            shutdown: CancellationToken::new(),
        }
    }

    /// Binds `handle` to `user_id`. A channel already bound to another user
    /// moves over. Returns false once the registry has shut down.
    pub fn register(&self, user_id: &str, handle: ChannelHandle) -> bool {
        if self.shutdown.is_cancelled() {
            return false;
        }
        let channel_id = handle.id();
        if let Some(previous) = self.by_channel.insert(channel_id, user_id.to_string()) {
            if previous != user_id {
                self.detach(&previous, channel_id);
            }
        }
        self.by_user
            .entry(user_id.to_string())
            .or_default()
            .insert(channel_id, handle);
        tracing::debug!(user_id, channel_id, "channel registered");
        true
    }

    /// Removes the channel wherever it is bound. Returns the user it belonged to.
    pub fn unregister(&self, channel_id: ChannelId) -> Option<String> {
        let (_, user_id) = self.by_channel.remove(&channel_id)?;
        self.detach(&user_id, channel_id);
        tracing::debug!(user_id = %user_id, channel_id, "channel unregistered");
        Some(user_id)
    }

    fn detach(&self, user_id: &str, channel_id: ChannelId) {
        if let Some(mut channels) = self.by_user.get_mut(user_id) {
            channels.remove(&channel_id);
        }
        self.by_user
            .remove_if(user_id, |_, channels| channels.is_empty());
    }

    /// Snapshot of the user's channels. Empty when the user is offline.
    pub fn channels_for(&self, user_id: &str) -> Vec<ChannelHandle> {
        self.by_user
            .get(user_id)
            .map(|channels| channels.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn user_of(&self, channel_id: ChannelId) -> Option<String> {
        self.by_channel.get(&channel_id).map(|user| user.clone())
    }

    pub fn is_online(&self, user_id: &str) -> bool {
        self.by_user.contains_key(user_id)
    }

    pub fn online_user_count(&self) -> usize {
        self.by_user.len()
    }

    pub fn channel_count(&self) -> usize {
        self.by_channel.len()
    }

    /// Drops every registration and wakes every session waiting on
    /// [`ConnectionRegistry::closed`].
    pub fn shutdown(&self) {
        self.shutdown.cancel();
        let channels = self.by_channel.len();
        self.by_channel.clear();
        self.by_user.clear();
        tracing::info!(channels, "connection registry shut down");
    }

    pub fn is_shut_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Resolves once [`ConnectionRegistry::shutdown`] has been called.
    pub async fn closed(&self) {
        self.shutdown.cancelled().await
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
