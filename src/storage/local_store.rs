//! Local filesystem object store
//!
//! Every regular file below the root directory is an object; its name is
//! the `/`-separated path relative to the root.

use std::io::SeekFrom;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use log::{debug, warn};
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio_util::io::ReaderStream;
use walkdir::WalkDir;

use crate::storage::{ByteRange, ByteStream, ObjectAttributes, ObjectStore, StorageError, StorageResult};

/// Chunk size for streamed reads (64 KiB).
const STREAM_CHUNK_SIZE: usize = 64 * 1024;

/// Object store backed by a local directory tree
pub struct LocalFsObjectStore {
    root: PathBuf,
}

impl LocalFsObjectStore {
    /// Create a store rooted at `root`, creating the directory if needed.
    pub fn new(root: impl AsRef<Path>) -> StorageResult<Self> {
        let root = root.as_ref().to_path_buf();
        std::fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    /// Map an object name to its path, rejecting anything that could escape the root.
    fn object_path(&self, name: &str) -> StorageResult<PathBuf> {
        if name.is_empty() || name.starts_with('/') || name.starts_with('\\') {
            return Err(StorageError::InvalidName(name.to_string()));
        }
        for component in Path::new(name).components() {
            match component {
                Component::Normal(_) => {}
                _ => return Err(StorageError::InvalidName(name.to_string())),
            }
        }
        Ok(self.root.join(name))
    }

    fn not_found_or_io(name: &str, err: std::io::Error) -> StorageError {
        if err.kind() == std::io::ErrorKind::NotFound {
            StorageError::NotFound(name.to_string())
        } else {
            StorageError::Io(err)
        }
    }
}

/// Every regular file below `root`, as `/`-separated relative names.
fn walk_names(root: &Path) -> StorageResult<Vec<String>> {
    let mut names = Vec::new();
    for entry in WalkDir::new(root).min_depth(1) {
        let entry = entry.map_err(std::io::Error::from)?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = match entry.path().strip_prefix(root) {
            Ok(relative) => relative,
            Err(_) => continue,
        };
        let parts: Option<Vec<&str>> = relative
            .components()
            .map(|c| c.as_os_str().to_str())
            .collect();
        match parts {
            Some(parts) => names.push(parts.join("/")),
            None => warn!("Skipping non UTF-8 object path {}", entry.path().display()),
        }
    }
    Ok(names)
}

#[async_trait]
impl ObjectStore for LocalFsObjectStore {
    async fn list_names(&self) -> StorageResult<Vec<String>> {
        let root = self.root.clone();
        let names = tokio::task::spawn_blocking(move || walk_names(&root))
            .await
            .map_err(|e| StorageError::Io(std::io::Error::other(e)))??;
        debug!("Listed {} objects under {}", names.len(), self.root.display());
        Ok(names)
    }

    async fn attributes(&self, name: &str) -> StorageResult<ObjectAttributes> {
        let path = self.object_path(name)?;
        let metadata = fs::metadata(&path)
            .await
            .map_err(|e| Self::not_found_or_io(name, e))?;
        if !metadata.is_file() {
            return Err(StorageError::NotFound(name.to_string()));
        }

        Ok(ObjectAttributes {
            size: metadata.len(),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            updated: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    async fn read(&self, name: &str, range: Option<ByteRange>) -> StorageResult<ByteStream> {
        let path = self.object_path(name)?;
        let mut file = fs::File::open(&path)
            .await
            .map_err(|e| Self::not_found_or_io(name, e))?;

        let stream: ByteStream = match range {
            Some(range) => {
                file.seek(SeekFrom::Start(range.start)).await?;
                let reader = file.take(range.len());
                Box::pin(
                    ReaderStream::with_capacity(reader, STREAM_CHUNK_SIZE)
                        .map(|chunk| chunk.map_err(StorageError::Io)),
                )
            }
            None => Box::pin(
                ReaderStream::with_capacity(file, STREAM_CHUNK_SIZE)
                    .map(|chunk| chunk.map_err(StorageError::Io)),
            ),
        };
        Ok(stream)
    }

    fn backend_name(&self) -> &'static str {
        "localfs"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use tempfile::TempDir;

    async fn collect(stream: ByteStream) -> Vec<u8> {
        let chunks: Vec<bytes::Bytes> = stream.try_collect().await.unwrap();
        chunks.concat()
    }

    fn store_with_files(files: &[(&str, &[u8])]) -> (TempDir, LocalFsObjectStore) {
        let dir = TempDir::new().unwrap();
        for (name, data) in files {
            let path = dir.path().join(name);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, data).unwrap();
        }
        let store = LocalFsObjectStore::new(dir.path()).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_list_names_walks_subdirectories() {
        let (_dir, store) = store_with_files(&[
            ("Alien.iso", &b"alien"[..]),
            ("thumbs/Alien.jpg", &b"jpeg"[..]),
            ("deep/er/Heat.mp4", &b"heat"[..]),
        ]);

        let mut names = store.list_names().await.unwrap();
        names.sort();
        assert_eq!(names, vec!["Alien.iso", "deep/er/Heat.mp4", "thumbs/Alien.jpg"]);
    }

    #[tokio::test]
    async fn test_list_names_skips_empty_dirs_and_reports_missing_root() {
        let (dir, store) = store_with_files(&[("Heat.mp4", &b"heat"[..])]);
        std::fs::create_dir_all(dir.path().join("empty/nested")).unwrap();
        assert_eq!(store.list_names().await.unwrap(), vec!["Heat.mp4"]);

        std::fs::remove_dir_all(dir.path()).unwrap();
        assert!(matches!(store.list_names().await, Err(StorageError::Io(_))));
    }

    #[tokio::test]
    async fn test_attributes_and_full_read() {
        let (_dir, store) = store_with_files(&[("Alien.iso", &b"hello world"[..])]);

        let attrs = store.attributes("Alien.iso").await.unwrap();
        assert_eq!(attrs.size, 11);
        assert!(attrs.last_modified().is_some());

        let data = collect(store.read("Alien.iso", None).await.unwrap()).await;
        assert_eq!(data, b"hello world");
    }

    #[tokio::test]
    async fn test_ranged_read() {
        let (_dir, store) = store_with_files(&[("Alien.iso", &b"hello world"[..])]);

        let range = ByteRange { start: 6, end: 10 };
        let data = collect(store.read("Alien.iso", Some(range)).await.unwrap()).await;
        assert_eq!(data, b"world");
    }

    #[tokio::test]
    async fn test_missing_object_is_not_found() {
        let (_dir, store) = store_with_files(&[]);

        assert!(matches!(store.attributes("nope.iso").await, Err(StorageError::NotFound(_))));
        assert!(matches!(store.read("nope.iso", None).await, Err(StorageError::NotFound(_))));
    }

    #[tokio::test]
    async fn test_path_traversal_rejected() {
        let (_dir, store) = store_with_files(&[]);

        for name in ["../etc/passwd", "/etc/passwd", "a/../../b", ""] {
            assert!(
                matches!(store.attributes(name).await, Err(StorageError::InvalidName(_))),
                "{} should be rejected",
                name
            );
        }
    }
}
