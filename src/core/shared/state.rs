use crate::auth::AuthService;
use crate::core::config::AppConfig;
use crate::import::ImportSessions;
use crate::llm::LLMProvider;
use crate::store::{DocumentStore, StoreErrorEvent};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Capacity of the background store error channel.
pub const STORE_ERROR_CAPACITY: usize = 256;

pub struct AppState {
    pub config: AppConfig,
    pub store: Arc<dyn DocumentStore>,
    pub auth: Arc<AuthService>,
    pub llm_provider: Arc<dyn LLMProvider>,
    pub import_sessions: Arc<ImportSessions>,
    pub store_errors: broadcast::Sender<StoreErrorEvent>,
}

impl AppState {
    /// Builds the state and hands back the receiving end of the store error
    /// channel so the caller can attach a listener.
    pub fn new(
        config: AppConfig,
        store: Arc<dyn DocumentStore>,
        llm_provider: Arc<dyn LLMProvider>,
    ) -> (Self, broadcast::Receiver<StoreErrorEvent>) {
        let (store_errors, rx) = broadcast::channel(STORE_ERROR_CAPACITY);
        let state = Self {
            config,
            auth: Arc::new(AuthService::new(Arc::clone(&store))),
            store,
            llm_provider,
            import_sessions: Arc::new(ImportSessions::new()),
            store_errors,
        };
        (state, rx)
    }
}

impl Clone for AppState {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            store: Arc::clone(&self.store),
            auth: Arc::clone(&self.auth),
            llm_provider: Arc::clone(&self.llm_provider),
            import_sessions: Arc::clone(&self.import_sessions),
            store_errors: self.store_errors.clone(),
        }
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("store", &"Arc<dyn DocumentStore>")
            .field("llm_provider", &"Arc<dyn LLMProvider>")
            .field("store_error_receivers", &self.store_errors.receiver_count())
            .finish_non_exhaustive()
    }
}
