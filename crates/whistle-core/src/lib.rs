pub mod conversation;
pub mod delivery;
pub mod directory;
pub mod error;
pub mod message;
pub mod observability;
pub mod registry;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use whistle_db::DbPool;
use whistle_util::pagination::HistoryWindow;

use delivery::DeliveryRouter;
use registry::ConnectionRegistry;
use store::MessageStore;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub history: HistoryWindow,
    pub storage_timeout: Duration,
    /// Outbound queue depth per client channel.
    pub channel_buffer: usize,
    /// Reject channel sends whose `senderId` differs from the joined user.
    pub strict_sender_identity: bool,
    /// Allowed CORS origin. `None` allows any origin.
    pub cors_origin: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            history: HistoryWindow::default(),
            storage_timeout: store::DEFAULT_STORAGE_TIMEOUT,
            channel_buffer: registry::DEFAULT_CHANNEL_BUFFER,
            strict_sender_identity: false,
            cors_origin: None,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub store: MessageStore,
    pub connections: Arc<ConnectionRegistry>,
    pub delivery: DeliveryRouter,
    pub config: AppConfig,
}

impl AppState {
    pub fn new(db: DbPool, config: AppConfig) -> Self {
        let store = MessageStore::new(db.clone(), config.storage_timeout);
        let connections = Arc::new(ConnectionRegistry::new());
        let delivery = DeliveryRouter::new(store.clone(), connections.clone());
        Self {
            db,
            store,
            connections,
            delivery,
            config,
        }
    }
}
