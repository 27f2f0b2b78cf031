//! Application State Management
//!
//! This module builds the catalog and its backends from configuration and
//! hands them to request handlers through actix-web's `Data`.

use std::sync::Arc;

use log::info;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::catalog::{Catalog, CatalogSettings};
use crate::config::{AppConfig, TlsMode};
use crate::metadata::{self, MetadataSource};
use crate::storage::{self, ObjectStore};

/// Application state shared by every request handler
#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<Catalog>,
    pub config: AppConfig,
    /// Process-wide shutdown token; cancels in-flight cache refreshes
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create application state with backends chosen by the configuration
    pub fn from_config(config: AppConfig, shutdown: CancellationToken) -> Result<Self, Box<dyn std::error::Error>> {
        info!("Initializing application state with configuration");

        let store = storage::create_store(&config.storage)?;
        info!("Using {} object store rooted at {}", store.backend_name(), config.storage.base_path);

        let source = metadata::create_source(&config.metadata)?;
        match &source {
            Some(source) => info!("Using {} metadata source at {}", source.source_name(), config.metadata.path),
            None => info!("No metadata source configured"),
        }

        let state = Self::with_backends(config, store, source, shutdown)?;
        info!("Application state initialized successfully");
        Ok(state)
    }

    /// Create application state around existing backends
    pub fn with_backends(
        config: AppConfig,
        store: Arc<dyn ObjectStore>,
        source: Option<Arc<dyn MetadataSource>>,
        shutdown: CancellationToken,
    ) -> Result<Self, url::ParseError> {
        let settings = CatalogSettings {
            staleness: config.metadata.staleness(),
            media_extensions: config.metadata.media_extensions.clone(),
            subdirs: config.server.subdirs,
            public_url: public_url(&config)?,
        };
        let catalog = Arc::new(Catalog::new(store, source, settings));
        Ok(Self { catalog, config, shutdown })
    }

    /// Application state for tests: default configuration, given backends
    pub fn new_for_testing(
        store: Arc<dyn ObjectStore>,
        source: Option<Arc<dyn MetadataSource>>,
    ) -> Result<Self, url::ParseError> {
        Self::with_backends(AppConfig::default(), store, source, CancellationToken::new())
    }
}

/// Externally visible base URL: the configured one, else derived from the bind address
pub fn public_url(config: &AppConfig) -> Result<Url, url::ParseError> {
    match &config.server.public_url {
        Some(url) => Url::parse(url),
        None => {
            let scheme = if config.tls.mode == TlsMode::None { "http" } else { "https" };
            Url::parse(&format!("{}://{}/", scheme, config.server.bind_address()))
        }
    }
}
