//! Object Store Abstraction
//!
//! This module hides the bucket that holds the media files behind a small
//! async trait. The catalog only needs the full list of object names, an
//! object's attributes, and a byte stream over all or part of an object,
//! so that is all a backend has to provide.

pub mod local_store;
pub mod mock_store;

use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::Stream;
use log::info;
use thiserror::Error;

use crate::config::{StorageBackend, StorageConfig};
use crate::storage::local_store::LocalFsObjectStore;
use crate::storage::mock_store::MockObjectStore;

/// A boxed stream of object bytes.
pub type ByteStream = Pin<Box<dyn Stream<Item = StorageResult<Bytes>> + Send>>;

/// Object store errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object not found: {0}")]
    NotFound(String),

    #[error("invalid object name: {0}")]
    InvalidName(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("object store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for object store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;

/// Size and timestamps of a stored object.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectAttributes {
    pub size: u64,
    pub created: Option<DateTime<Utc>>,
    pub updated: Option<DateTime<Utc>>,
}

impl ObjectAttributes {
    /// The later of the creation and update times.
    pub fn last_modified(&self) -> Option<DateTime<Utc>> {
        match (self.created, self.updated) {
            (Some(c), Some(u)) => Some(c.max(u)),
            (c, u) => c.or(u),
        }
    }
}

/// An inclusive byte range within an object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ByteRange {
    pub start: u64,
    pub end: u64,
}

impl ByteRange {
    pub fn len(&self) -> u64 {
        self.end - self.start + 1
    }
}

/// Read-only view of the bucket backing the catalog.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Enumerate the name of every object currently in the store.
    async fn list_names(&self) -> StorageResult<Vec<String>>;

    /// Size and timestamps for one object.
    async fn attributes(&self, name: &str) -> StorageResult<ObjectAttributes>;

    /// Stream an object's content, or only `range` of it.
    async fn read(&self, name: &str, range: Option<ByteRange>) -> StorageResult<ByteStream>;

    /// Short backend identifier used in log lines.
    fn backend_name(&self) -> &'static str;
}

/// Create the object store selected by the configuration.
pub fn create_store(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStore>> {
    match config.backend {
        StorageBackend::LocalFs => {
            info!("Using local filesystem object store rooted at {}", config.base_path);
            Ok(Arc::new(LocalFsObjectStore::new(&config.base_path)?))
        }
        StorageBackend::Mock => {
            info!("Using mock object store");
            Ok(Arc::new(MockObjectStore::new()))
        }
    }
}
