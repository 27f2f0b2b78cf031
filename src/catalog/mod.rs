//! Catalog: the resolution façade over the object store and metadata table.
//!
//! Both caches live behind a single `RwLock`. Refreshes rebuild a cache
//! wholesale under the write lock; lookups take the read lock for one
//! operation only. A failed refresh keeps the previous snapshot, and the
//! request paths keep serving from it until the backend recovers.

pub mod codec;

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use thiserror::Error;
use tokio::sync::RwLock;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::metadata::row::RowDecoder;
use crate::metadata::{MetadataError, MetadataRecord, MetadataSource};
use crate::storage::{ObjectStore, StorageError};

pub use codec::Resolution;

/// Default staleness window for both caches
pub const DEFAULT_STALENESS: Duration = Duration::from_secs(5 * 60);

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("object store unavailable: {0}")]
    BackendUnavailable(#[source] StorageError),

    #[error("metadata table unavailable: {0}")]
    MetadataUnavailable(#[source] MetadataError),

    #[error("cancelled while refreshing {0}")]
    Cancelled(&'static str),
}

/// Tunables of a catalog
#[derive(Debug, Clone)]
pub struct CatalogSettings {
    pub staleness: Duration,
    /// Extensions, with dot, of objects listed as media
    pub media_extensions: Vec<String>,
    /// Partition titles by their subdir label
    pub subdirs: bool,
    /// Externally visible root URL, used for proxied thumbnails
    pub public_url: Url,
}

impl CatalogSettings {
    pub fn new(public_url: Url) -> Self {
        Self {
            staleness: DEFAULT_STALENESS,
            media_extensions: [".iso", ".m2ts", ".m4v", ".mp4"].iter().map(|e| e.to_string()).collect(),
            subdirs: true,
            public_url,
        }
    }
}

/// One listed title: its media path and its NFO path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub object_name: String,
    pub media_path: String,
    pub nfo_path: String,
}

/// Result of `list_entries`
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Listing {
    pub entries: Vec<Entry>,
    /// Subdirectory labels; only filled at the top level
    pub subdirs: Vec<String>,
}

#[derive(Default)]
struct CatalogState {
    object_names: BTreeSet<String>,
    names_refreshed: Option<Instant>,
    table: BTreeMap<String, MetadataRecord>,
    table_refreshed: Option<Instant>,
}

pub struct Catalog {
    store: Arc<dyn ObjectStore>,
    source: Option<Arc<dyn MetadataSource>>,
    decoder: RowDecoder,
    settings: CatalogSettings,
    state: RwLock<CatalogState>,
}

impl Catalog {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        source: Option<Arc<dyn MetadataSource>>,
        settings: CatalogSettings,
    ) -> Self {
        Self {
            store,
            source,
            decoder: RowDecoder::new(settings.public_url.clone()),
            settings,
            state: RwLock::new(CatalogState::default()),
        }
    }

    pub fn settings(&self) -> &CatalogSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    fn is_stale(&self, refreshed: Option<Instant>) -> bool {
        match refreshed {
            Some(at) => at.elapsed() > self.settings.staleness,
            None => true,
        }
    }

    fn names_need_refresh(&self, state: &CatalogState) -> bool {
        state.object_names.is_empty() || self.is_stale(state.names_refreshed)
    }

    fn table_needs_refresh(&self, state: &CatalogState) -> bool {
        state.table.is_empty() || self.is_stale(state.table_refreshed)
    }

    /// Re-enumerate the object store if the name set is empty or stale.
    pub async fn ensure_object_names(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        if !self.names_need_refresh(&*self.state.read().await) {
            return Ok(());
        }

        let mut state = self.state.write().await;
        // Another caller may have refreshed while we waited for the lock.
        if !self.names_need_refresh(&state) {
            return Ok(());
        }

        info!("Loading object names from {} store", self.store.backend_name());
        let listing = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CatalogError::Cancelled("object names")),
            listing = self.store.list_names() => listing,
        };

        match listing {
            Ok(names) => {
                state.object_names = names.into_iter().collect();
                state.names_refreshed = Some(Instant::now());
                info!("Loaded {} object names", state.object_names.len());
                Ok(())
            }
            Err(e) => {
                warn!("Listing objects failed, keeping {} cached names: {}", state.object_names.len(), e);
                Err(CatalogError::BackendUnavailable(e))
            }
        }
    }

    /// Re-read the metadata table if it is empty or stale.
    ///
    /// A no-op when no metadata source is configured.
    pub async fn ensure_metadata_table(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        let source = match &self.source {
            Some(source) => source,
            None => return Ok(()),
        };
        if !self.table_needs_refresh(&*self.state.read().await) {
            return Ok(());
        }

        let mut state = self.state.write().await;
        if !self.table_needs_refresh(&state) {
            return Ok(());
        }

        info!("Loading metadata table from {} source", source.source_name());
        let read = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(CatalogError::Cancelled("metadata table")),
            read = source.read_table() => read,
        };

        let sheet = match read {
            Ok(sheet) => sheet,
            Err(e) => {
                warn!("Reading metadata failed, keeping {} cached records: {}", state.table.len(), e);
                return Err(CatalogError::MetadataUnavailable(e));
            }
        };

        let mut table = BTreeMap::new();
        for (row_number, row) in sheet.title_rows() {
            let (root_name, record) = self.decoder.decode_row(&sheet.headings, row);
            debug!("Row {}: {}", row_number, root_name);
            table.insert(root_name, record);
        }

        state.table = table;
        state.table_refreshed = Some(Instant::now());
        info!("Loaded {} metadata records", state.table.len());
        Ok(())
    }

    /// Like `ensure_object_names`, but a failed refresh is tolerated while a
    /// previous listing is still cached.
    pub async fn object_names_or_cached(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        let err = match self.ensure_object_names(cancel).await {
            Err(e @ CatalogError::BackendUnavailable(_)) => e,
            other => return other,
        };
        if self.state.read().await.object_names.is_empty() {
            return Err(err);
        }
        warn!("Serving cached object names: {}", err);
        Ok(())
    }

    /// Like `ensure_metadata_table`, but a failed refresh is tolerated while
    /// a previous table is still cached.
    pub async fn metadata_table_or_cached(&self, cancel: &CancellationToken) -> Result<(), CatalogError> {
        let err = match self.ensure_metadata_table(cancel).await {
            Err(e @ CatalogError::MetadataUnavailable(_)) => e,
            other => return other,
        };
        if self.state.read().await.table.is_empty() {
            return Err(err);
        }
        warn!("Serving cached metadata table: {}", err);
        Ok(())
    }

    /// Work out what a request path (without surrounding slashes) refers to.
    pub async fn resolve(&self, path: &str, cancel: &CancellationToken) -> Result<Resolution, CatalogError> {
        self.metadata_table_or_cached(cancel).await?;

        let state = self.state.read().await;
        let titles = state
            .table
            .iter()
            .map(|(root, record)| (root.as_str(), record.subdir.as_str()));
        Ok(codec::resolve_path(path, titles))
    }

    /// Every deliverable title in `subdir` ("" for the top level).
    ///
    /// Objects without a metadata record only appear at the top level. When
    /// subdirectories are disabled everything is listed regardless of `subdir`.
    pub async fn list_entries(&self, subdir: &str, cancel: &CancellationToken) -> Result<Listing, CatalogError> {
        self.object_names_or_cached(cancel).await?;
        self.metadata_table_or_cached(cancel).await?;

        let state = self.state.read().await;
        let subdirs_mode = self.settings.subdirs;
        let mut listing = Listing::default();

        for object_name in &state.object_names {
            let (root_name, ext) = codec::split_extension(object_name);
            if !self.settings.media_extensions.iter().any(|allowed| allowed == ext) {
                continue;
            }

            if subdirs_mode {
                let label = state.table.get(root_name).map(|r| r.subdir.as_str()).unwrap_or("");
                if label != subdir {
                    continue;
                }
            }

            listing.entries.push(Entry {
                object_name: object_name.clone(),
                media_path: codec::media_path(object_name),
                nfo_path: codec::nfo_path(root_name),
            });
        }

        if subdirs_mode && subdir.is_empty() {
            let labels: BTreeSet<&str> = state
                .table
                .values()
                .map(|r| r.subdir.as_str())
                .filter(|s| !s.is_empty())
                .collect();
            listing.subdirs = labels.into_iter().map(str::to_string).collect();
        }

        Ok(listing)
    }

    /// Cached record for a root name
    pub async fn record(&self, root_name: &str) -> Option<MetadataRecord> {
        self.state.read().await.table.get(root_name).cloned()
    }

    /// Whether the cached name set contains `name`
    pub async fn has_object(&self, name: &str) -> bool {
        self.state.read().await.object_names.contains(name)
    }

    /// Copy of the whole metadata table
    pub async fn table_snapshot(&self) -> BTreeMap<String, MetadataRecord> {
        self.state.read().await.table.clone()
    }

    /// Copy of the cached object names
    pub async fn object_names(&self) -> BTreeSet<String> {
        self.state.read().await.object_names.clone()
    }

    /// Source URL of a proxied thumbnail, looked up by its `/thumbs/` name
    pub async fn thumb_source(&self, thumb_name: &str) -> Option<String> {
        let (root_name, _) = codec::split_extension(thumb_name);
        let state = self.state.read().await;
        state
            .table
            .get(root_name)?
            .thumbs
            .iter()
            .find(|t| t.proxy_name.as_deref() == Some(thumb_name))
            .map(|t| t.source_url.clone())
    }
}
