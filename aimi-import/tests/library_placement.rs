//! End-to-end runs with the real library writer

mod helpers;

use aimi_import::models::{ImportStatus, TrackMetadata};
use aimi_import::services::library_writer::write_tags;
use aimi_import::services::tag_reader::read_hints;
use aimi_import::services::{FingerprintStore, LibraryWriter, MemoryStore, PlacementMode};
use helpers::*;
use std::sync::Arc;

#[tokio::test]
async fn test_copy_mode_tags_into_library_and_keeps_source() {
    let src = tempfile::tempdir().unwrap();
    let lib = tempfile::tempdir().unwrap();
    let source = src.path().join("01 - teardrop (official video).wav");
    write_wav(&source, 3);
    let id = identity_of(&source);

    let store = Arc::new(MemoryStore::new());
    let resolver = Arc::new(ScriptedResolver::new());
    let mut metadata = TrackMetadata::new("Massive Attack", "Teardrop");
    metadata.album = Some("Mezzanine".to_string());
    resolver.script("01 - teardrop (official video)", Outcome::Resolve(metadata));

    let driver = driver(
        store.clone(),
        resolver,
        Arc::new(LibraryWriter::new(lib.path())),
        options(3),
    );
    let summary = driver.run(src.path()).await.unwrap();
    assert_eq!(summary.resolved, 1);

    let placed = lib.path().join("Massive Attack/Teardrop.wav");
    assert_eq!(files_under(lib.path()), vec![placed.clone()]);
    assert!(source.exists());

    let hints = read_hints(&placed);
    assert_eq!(hints.artist.as_deref(), Some("Massive Attack"));
    assert_eq!(hints.album.as_deref(), Some("Mezzanine"));

    let record = store.get(&id).await.unwrap().unwrap();
    assert_eq!(record.storage_path, Some(placed));
}

#[tokio::test]
async fn test_move_mode_removes_source_only_after_commit() {
    let src = tempfile::tempdir().unwrap();
    let lib = tempfile::tempdir().unwrap();
    let good = src.path().join("good.wav");
    let bad = src.path().join("bad.wav");
    write_wav(&good, 1);
    write_wav(&bad, 2);

    let resolver = Arc::new(ScriptedResolver::new());
    resolver.script("bad", Outcome::Fail("model unavailable".to_string()));

    let mut opts = options(3);
    opts.placement = PlacementMode::Move;
    let driver = driver(
        Arc::new(MemoryStore::new()),
        resolver,
        Arc::new(LibraryWriter::new(lib.path())),
        opts,
    );

    let summary = driver.run(src.path()).await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.failed, 1);

    assert!(!good.exists(), "moved after the commit");
    assert!(bad.exists(), "failed files stay in the source");
    assert_eq!(
        files_under(lib.path()),
        vec![lib.path().join("Artist/good.wav")]
    );
}

#[tokio::test]
async fn test_move_mode_keeps_source_when_commit_fails() {
    let src = tempfile::tempdir().unwrap();
    let lib = tempfile::tempdir().unwrap();
    let source = src.path().join("fragile.wav");
    write_wav(&source, 4);

    let store = Arc::new(FlakyStore::new());
    store
        .fail_next_resolve
        .store(true, std::sync::atomic::Ordering::SeqCst);

    let mut opts = options(3);
    opts.placement = PlacementMode::Move;
    let driver = driver(
        store,
        Arc::new(ScriptedResolver::new()),
        Arc::new(LibraryWriter::new(lib.path())),
        opts,
    );

    let summary = driver.run(src.path()).await.unwrap();
    assert_eq!(summary.store_errors, 1);
    assert!(source.exists());
}

#[tokio::test]
async fn test_tagged_download_of_library_track_is_linked() {
    let src = tempfile::tempdir().unwrap();
    let lib = tempfile::tempdir().unwrap();

    let first = src.path().join("first.wav");
    write_wav(&first, 10);

    let store = Arc::new(MemoryStore::new());
    let resolver = Arc::new(ScriptedResolver::new());
    resolver.script(
        "first",
        Outcome::Resolve(TrackMetadata::new("Boards of Canada", "Roygbiv")),
    );

    let mut opts = options(3);
    opts.fuzzy_ratio = 0.9;
    let driver = driver(
        store.clone(),
        resolver.clone(),
        Arc::new(LibraryWriter::new(lib.path())),
        opts,
    );
    driver.run(src.path()).await.unwrap();
    assert_eq!(resolver.total_calls(), 1);

    // Different encode of the same track, tagged by the downloader
    let second = src.path().join("second.wav");
    write_wav(&second, 11);
    write_tags(&second, &TrackMetadata::new("Boards Of Canada", "ROYGBIV")).unwrap();
    let second_id = identity_of(&second);

    let summary = driver.run(src.path()).await.unwrap();
    assert_eq!(summary.linked, 1);
    assert_eq!(summary.skipped, 1);
    assert_eq!(resolver.calls_for(&second_id), 0);

    let record = store.get(&second_id).await.unwrap().unwrap();
    assert_eq!(record.status, ImportStatus::Resolved);
    assert_eq!(
        record.storage_path,
        Some(lib.path().join("Boards of Canada/Roygbiv.wav"))
    );
    assert_eq!(files_under(lib.path()).len(), 1);
}

#[tokio::test]
async fn test_linking_disabled_resolves_again() {
    let src = tempfile::tempdir().unwrap();
    let lib = tempfile::tempdir().unwrap();
    let tagged = src.path().join("tagged.wav");
    write_wav(&tagged, 20);
    write_tags(&tagged, &TrackMetadata::new("Artist", "tagged")).unwrap();

    let resolver = Arc::new(ScriptedResolver::new());
    let driver = driver(
        Arc::new(MemoryStore::new()),
        resolver.clone(),
        Arc::new(LibraryWriter::new(lib.path())),
        options(3),
    );

    let summary = driver.run(src.path()).await.unwrap();
    assert_eq!(summary.linked, 0);
    assert_eq!(summary.resolved, 1);
    assert_eq!(resolver.total_calls(), 1);
}
