//! Application state management

use std::sync::Arc;

use crate::catalog::ContentCatalog;
use crate::config::Config;
use crate::storage::ObjectStore;
use crate::upload::SessionTracker;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    config: Config,
    tracker: SessionTracker,
    object_store: Arc<dyn ObjectStore>,
    catalog: Arc<dyn ContentCatalog>,
}

impl AppState {
    pub fn new(
        config: Config,
        tracker: SessionTracker,
        object_store: Arc<dyn ObjectStore>,
        catalog: Arc<dyn ContentCatalog>,
    ) -> Self {
        Self {
            inner: Arc::new(AppStateInner {
                config,
                tracker,
                object_store,
                catalog,
            }),
        }
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Get the upload session tracker
    pub fn tracker(&self) -> &SessionTracker {
        &self.inner.tracker
    }

    pub fn object_store(&self) -> &Arc<dyn ObjectStore> {
        &self.inner.object_store
    }

    pub fn catalog(&self) -> &Arc<dyn ContentCatalog> {
        &self.inner.catalog
    }
}
