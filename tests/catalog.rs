use std::sync::Arc;
use std::time::Duration;

use kodi_bucket::catalog::codec::{self, prefix_for};
use kodi_bucket::catalog::{Catalog, CatalogError, CatalogSettings};
use kodi_bucket::metadata::mock_source::MockMetadataSource;
use kodi_bucket::storage::mock_store::MockObjectStore;
use tokio_util::sync::CancellationToken;
use url::Url;

fn settings(staleness: Duration) -> CatalogSettings {
    let mut settings = CatalogSettings::new(Url::parse("http://localhost:1549/").unwrap());
    settings.staleness = staleness;
    settings
}

fn films() -> Arc<MockMetadataSource> {
    Arc::new(
        MockMetadataSource::from_rows(&[
            &["name", "title", "year", "subdir"],
            &["Alien.iso", "Alien", "1979", ""],
            &["Heat.mp4", "Heat", "1995", "Crime"],
        ])
        .unwrap(),
    )
}

#[tokio::test]
async fn test_listing_is_cached_within_window() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso", "Heat.mp4"]));
    let catalog = Catalog::new(store.clone(), None, settings(Duration::from_secs(300)));
    let cancel = CancellationToken::new();

    for _ in 0..5 {
        catalog.ensure_object_names(&cancel).await.unwrap();
    }
    assert_eq!(store.list_calls(), 1);
    assert_eq!(catalog.object_names().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_refresh_lists_once() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso"]));
    let catalog = Arc::new(Catalog::new(store.clone(), None, settings(Duration::from_secs(300))));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let catalog = catalog.clone();
        tasks.push(tokio::spawn(async move {
            catalog.ensure_object_names(&CancellationToken::new()).await
        }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    assert_eq!(store.list_calls(), 1);
}

#[tokio::test]
async fn test_stale_listing_is_refreshed() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso"]));
    let catalog = Catalog::new(store.clone(), None, settings(Duration::from_millis(50)));
    let cancel = CancellationToken::new();

    catalog.ensure_object_names(&cancel).await.unwrap();
    store.insert("Heat.mp4", b"heat".to_vec());
    tokio::time::sleep(Duration::from_millis(100)).await;

    catalog.ensure_object_names(&cancel).await.unwrap();
    assert_eq!(store.list_calls(), 2);
    assert!(catalog.has_object("Heat.mp4").await);
}

#[tokio::test]
async fn test_failed_refresh_keeps_previous_names() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso", "Heat.mp4"]));
    let catalog = Catalog::new(store.clone(), None, settings(Duration::from_millis(50)));
    let cancel = CancellationToken::new();

    catalog.ensure_object_names(&cancel).await.unwrap();
    let before = catalog.object_names().await;

    store.set_fail_listing(true);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(matches!(
        catalog.ensure_object_names(&cancel).await,
        Err(CatalogError::BackendUnavailable(_))
    ));
    assert_eq!(catalog.object_names().await, before);

    // Still stale, so the next request retries.
    store.set_fail_listing(false);
    catalog.ensure_object_names(&cancel).await.unwrap();
    assert_eq!(store.list_calls(), 3);
}

#[tokio::test]
async fn test_failed_metadata_refresh_keeps_previous_table() {
    let store = Arc::new(MockObjectStore::new());
    let source = films();
    let catalog = Catalog::new(store, Some(source.clone()), settings(Duration::from_millis(50)));
    let cancel = CancellationToken::new();

    catalog.ensure_metadata_table(&cancel).await.unwrap();
    source.set_fail_reads(true);
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(matches!(
        catalog.ensure_metadata_table(&cancel).await,
        Err(CatalogError::MetadataUnavailable(_))
    ));
    assert_eq!(catalog.record("Alien").await.unwrap().year, Some(1979));
}

#[tokio::test]
async fn test_listing_served_from_cache_while_backends_fail() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso", "Heat.mp4"]));
    let source = films();
    let catalog = Catalog::new(store.clone(), Some(source.clone()), settings(Duration::from_millis(20)));
    let cancel = CancellationToken::new();

    let fresh = catalog.list_entries("", &cancel).await.unwrap();
    store.set_fail_listing(true);
    source.set_fail_reads(true);
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(catalog.list_entries("", &cancel).await.unwrap(), fresh);
    assert!(catalog.resolve("Crime", &cancel).await.unwrap().is_directory());
    assert_eq!(store.list_calls(), 2);
    assert_eq!(source.read_calls(), 3);

    // Nothing cached yet: the failure surfaces.
    let empty = Catalog::new(store, None, settings(Duration::from_secs(300)));
    assert!(matches!(
        empty.list_entries("", &cancel).await,
        Err(CatalogError::BackendUnavailable(_))
    ));
}

#[tokio::test]
async fn test_alien_paths() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso"]));
    let catalog = Catalog::new(store, Some(films()), settings(Duration::from_secs(300)));
    let cancel = CancellationToken::new();

    let listing = catalog.list_entries("", &cancel).await.unwrap();
    let prefix = prefix_for("Alien");
    assert_eq!(prefix.len(), codec::PREFIX_LEN);
    assert_eq!(listing.entries.len(), 1);
    assert_eq!(listing.entries[0].media_path, format!("{}-Alien.iso", prefix));
    assert_eq!(listing.entries[0].nfo_path, format!("{}-Alien.nfo", prefix));

    let resolution = catalog.resolve(&listing.entries[0].media_path, &cancel).await.unwrap();
    assert_eq!(resolution.subdir, "");
    assert_eq!(codec::strip_prefix(&resolution.key), Some("Alien.iso"));
}

#[tokio::test]
async fn test_resolution_is_stable_across_listings() {
    let store = Arc::new(MockObjectStore::with_names(["Alien.iso", "Heat.mp4"]));
    let catalog = Catalog::new(store, Some(films()), settings(Duration::from_secs(300)));
    let cancel = CancellationToken::new();

    let crime = catalog.list_entries("Crime", &cancel).await.unwrap();
    let path = format!("Crime/{}", crime.entries[0].media_path);

    let first = catalog.resolve(&path, &cancel).await.unwrap();
    catalog.list_entries("", &cancel).await.unwrap();
    catalog.list_entries("Crime", &cancel).await.unwrap();
    let second = catalog.resolve(&path, &cancel).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(first.subdir, "Crime");
    assert_eq!(codec::strip_prefix(&first.key), Some("Heat.mp4"));

    let dir = catalog.resolve("Crime", &cancel).await.unwrap();
    assert!(dir.is_directory());
}

#[tokio::test]
async fn test_unparsable_year_keeps_other_fields() {
    let store = Arc::new(MockObjectStore::new());
    let source = Arc::new(
        MockMetadataSource::from_rows(&[
            &["name", "title", "year", "genre"],
            &["Brazil.mp4", "Brazil", "notanumber", "Satire"],
            &["Heat.mp4", "Heat", "1995", "Crime drama"],
        ])
        .unwrap(),
    );
    let catalog = Catalog::new(store, Some(source), settings(Duration::from_secs(300)));
    catalog.ensure_metadata_table(&CancellationToken::new()).await.unwrap();

    let record = catalog.record("Brazil").await.unwrap();
    assert_eq!(record.title, "Brazil");
    assert_eq!(record.year, None);
    assert_eq!(record.genre, "Satire");

    let heat = catalog.record("Heat").await.unwrap();
    assert_eq!(heat.year, Some(1995));
    assert_eq!(heat.genre, "Crime drama");
}

#[tokio::test]
async fn test_metadata_table_is_cached() {
    let store = Arc::new(MockObjectStore::new());
    let source = films();
    let catalog = Catalog::new(store, Some(source.clone()), settings(Duration::from_secs(300)));
    let cancel = CancellationToken::new();

    for _ in 0..3 {
        catalog.resolve("Crime", &cancel).await.unwrap();
    }
    assert_eq!(source.read_calls(), 1);
}
