//! Mock implementation of ObjectStore for testing

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream;
use log::info;

use crate::storage::{ByteRange, ByteStream, ObjectAttributes, ObjectStore, StorageError, StorageResult};

struct MockObject {
    data: Bytes,
    created: DateTime<Utc>,
    updated: DateTime<Utc>,
}

/// In-memory object store that counts listings and can be told to fail them
pub struct MockObjectStore {
    objects: Mutex<BTreeMap<String, MockObject>>,
    list_calls: AtomicUsize,
    fail_listing: AtomicBool,
}

impl MockObjectStore {
    pub fn new() -> Self {
        Self {
            objects: Mutex::new(BTreeMap::new()),
            list_calls: AtomicUsize::new(0),
            fail_listing: AtomicBool::new(false),
        }
    }

    /// Create a store holding the given objects, each containing its own name as data.
    pub fn with_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let store = Self::new();
        for name in names {
            let name = name.as_ref();
            store.insert(name, name.as_bytes().to_vec());
        }
        store
    }

    fn objects(&self) -> MutexGuard<'_, BTreeMap<String, MockObject>> {
        self.objects.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add or replace an object.
    pub fn insert(&self, name: &str, data: impl Into<Bytes>) {
        let now = Utc::now();
        self.objects().insert(
            name.to_string(),
            MockObject { data: data.into(), created: now, updated: now },
        );
    }

    /// Remove an object, returning whether it existed.
    pub fn remove(&self, name: &str) -> bool {
        self.objects().remove(name).is_some()
    }

    /// Number of times `list_names` has been called.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Make subsequent listings fail (or succeed again).
    pub fn set_fail_listing(&self, fail: bool) {
        self.fail_listing.store(fail, Ordering::SeqCst);
    }
}

impl Default for MockObjectStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ObjectStore for MockObjectStore {
    async fn list_names(&self) -> StorageResult<Vec<String>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_listing.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable("mock listing failure".to_string()));
        }
        let names: Vec<String> = self.objects().keys().cloned().collect();
        info!("Mock: listed {} objects", names.len());
        Ok(names)
    }

    async fn attributes(&self, name: &str) -> StorageResult<ObjectAttributes> {
        let objects = self.objects();
        let object = objects
            .get(name)
            .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
        Ok(ObjectAttributes {
            size: object.data.len() as u64,
            created: Some(object.created),
            updated: Some(object.updated),
        })
    }

    async fn read(&self, name: &str, range: Option<ByteRange>) -> StorageResult<ByteStream> {
        let data = {
            let objects = self.objects();
            let object = objects
                .get(name)
                .ok_or_else(|| StorageError::NotFound(name.to_string()))?;
            object.data.clone()
        };

        let data = match range {
            Some(range) => {
                let end = (range.end as usize + 1).min(data.len());
                let start = (range.start as usize).min(end);
                data.slice(start..end)
            }
            None => data,
        };
        Ok(Box::pin(stream::iter(vec![Ok(data)])))
    }

    fn backend_name(&self) -> &'static str {
        "mock"
    }
}
