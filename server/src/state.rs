use std::sync::Arc;
use tokio::sync::Mutex;

use crate::auth::sessions::SqliteSessions;
use crate::auth::{AccountStore, SessionStore};
use crate::chat::store::MessageStore;
use crate::config::{Config, WsConfig};
use crate::db::SqliteStore;
use crate::ws::ConnectionRegistry;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Online users and their live connections
    pub registry: ConnectionRegistry,
    pub sessions: Arc<dyn SessionStore>,
    pub accounts: Arc<dyn AccountStore>,
    pub messages: Arc<dyn MessageStore>,
    /// Page size for history requests that do not name one
    pub history_page_size: u32,
    pub ws: WsConfig,
    /// Held for the length of a presence broadcast so rosters go out in order
    pub presence_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// State backed by a single SQLite store.
    pub fn new(store: SqliteStore, config: &Config) -> Self {
        let sessions = SqliteSessions::new(store.clone(), config.session_ttl_hours);
        let store = Arc::new(store);

        Self {
            registry: ConnectionRegistry::new(),
            sessions: Arc::new(sessions),
            accounts: store.clone(),
            messages: store,
            history_page_size: config.history_page_size,
            ws: config.ws.clone(),
            presence_lock: Arc::new(Mutex::new(())),
        }
    }

    /// State over arbitrary collaborators, with default settings.
    pub fn with_stores(
        sessions: Arc<dyn SessionStore>,
        accounts: Arc<dyn AccountStore>,
        messages: Arc<dyn MessageStore>,
    ) -> Self {
        let defaults = Config::default();
        Self {
            registry: ConnectionRegistry::new(),
            sessions,
            accounts,
            messages,
            history_page_size: defaults.history_page_size,
            ws: defaults.ws,
            presence_lock: Arc::new(Mutex::new(())),
        }
    }
}
