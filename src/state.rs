// src/state.rs
use std::sync::Arc;

use crate::config::Config;
use crate::import::ImportService;
use crate::middleware::rate_limit::UploadLimiter;
use crate::notify::Dispatcher;
use crate::store::{CatalogStore, WebhookStore};

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<dyn CatalogStore>,
    pub webhooks: Arc<dyn WebhookStore>,
    pub imports: ImportService,
    pub dispatcher: Dispatcher,
    pub upload_limiter: Option<UploadLimiter>,
    pub config: Arc<Config>,
}

impl AppState {
    /// Wires the dispatcher and import workers onto the given stores.
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        webhooks: Arc<dyn WebhookStore>,
        config: Config,
    ) -> Result<Self, reqwest::Error> {
        let dispatcher = Dispatcher::new(webhooks.clone(), config.delivery)?;
        let imports = ImportService::start(config.import.clone(), catalog.clone(), dispatcher.clone());
        Ok(Self {
            catalog,
            webhooks,
            imports,
            dispatcher,
            upload_limiter: UploadLimiter::per_minute(config.upload_rate_per_minute),
            config: Arc::new(config),
        })
    }
}
