use std::sync::Arc;

use crate::auth::JwtValidator;
use crate::config::Settings;
use crate::presence::PresenceBroadcaster;
use crate::relay::SignalRelay;
use crate::rooms::RoomManager;
use crate::router::MessageRouter;
use crate::session::SessionRegistry;
use crate::stores::{
    ChatStore, IdentityStore, MemoryChatStore, MemoryIdentityStore, MemoryMessageStore,
    MessageStore,
};

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub jwt_validator: Arc<JwtValidator>,
    pub registry: Arc<SessionRegistry>,
    pub rooms: Arc<RoomManager>,
    pub presence: Arc<PresenceBroadcaster>,
    pub router: Arc<MessageRouter>,
    pub relay: Arc<SignalRelay>,
    pub identity_store: Arc<dyn IdentityStore>,
    pub chat_store: Arc<dyn ChatStore>,
    pub message_store: Arc<dyn MessageStore>,
}

impl AppState {
    /// Default wiring with in-memory stores
    pub fn new(settings: Settings) -> Self {
        Self::with_stores(
            settings,
            Arc::new(MemoryIdentityStore::new()),
            Arc::new(MemoryChatStore::new()),
            Arc::new(MemoryMessageStore::new()),
        )
    }

    /// Wiring with caller-supplied store implementations
    pub fn with_stores(
        settings: Settings,
        identity_store: Arc<dyn IdentityStore>,
        chat_store: Arc<dyn ChatStore>,
        message_store: Arc<dyn MessageStore>,
    ) -> Self {
        let jwt_validator = Arc::new(JwtValidator::new(&settings.jwt));
        let registry = Arc::new(SessionRegistry::new());
        let rooms = Arc::new(RoomManager::new(registry.clone()));
        let presence = Arc::new(PresenceBroadcaster::new(registry.clone()));
        let router = Arc::new(MessageRouter::new(
            rooms.clone(),
            chat_store.clone(),
            message_store.clone(),
        ));
        let relay = Arc::new(SignalRelay::new(
            registry.clone(),
            rooms.clone(),
            chat_store.clone(),
            message_store.clone(),
        ));

        Self {
            settings: Arc::new(settings),
            jwt_validator,
            registry,
            rooms,
            presence,
            router,
            relay,
            identity_store,
            chat_store,
            message_store,
        }
    }
}
