//! Shared application state.

use hearth_config::Settings;
use hearth_engine::{InferenceFacade, LanguageModel};
use hearth_storage::Storage;
use std::sync::Arc;

use crate::registry::ConnectionRegistry;

/// Builds a language model engine from a model reference, used by the
/// hot-switch endpoint. Loading happens outside the inference guard;
/// only the swap itself is serialized.
pub type ModelFactory = Arc<dyn Fn(&str) -> Arc<dyn LanguageModel> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub storage: Arc<Storage>,
    pub facade: Arc<InferenceFacade>,
    pub registry: Arc<ConnectionRegistry>,
    pub model_factory: ModelFactory,
}

impl AppState {
    pub fn new(
        settings: Settings,
        storage: Arc<Storage>,
        facade: Arc<InferenceFacade>,
        model_factory: ModelFactory,
    ) -> Self {
        Self {
            settings: Arc::new(settings),
            storage,
            facade,
            registry: Arc::new(ConnectionRegistry::new()),
            model_factory,
        }
    }

    /// Readiness gate for the session endpoint: seed data present and
    /// inference engines installed.
    pub fn ready(&self) -> bool {
        self.storage.is_seeded() && self.facade.is_ready()
    }
}
