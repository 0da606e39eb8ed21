//! Shared fixtures for aimi-import integration tests
//!
//! - [`ScriptedResolver`]: per-file answers, counts calls per identity
//! - [`FlakyStore`]: memory store with switchable backend failures
//! - [`FailingSink`]: tagging sink that always fails
//! - temp source trees with plain files or real WAVs

#![allow(dead_code)]

use aimi_import::models::{FileIdentity, ImportRecord, TrackMetadata, Transition};
use aimi_import::services::{
    DriverOptions, FileScanner, FingerprintStore, ImportDriver, MemoryStore, MetadataResolver,
    Placement, ResolveError, ResolveRequest, StoreError, TagError, TaggingSink,
};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

// ============================================================================
// Resolver
// ============================================================================

/// Scripted answer for one file stem
#[derive(Debug, Clone)]
pub enum Outcome {
    Resolve(TrackMetadata),
    Fail(String),
    /// Never answers; the driver's timeout fires
    Hang,
}

/// Resolver answering from a script keyed by file stem
///
/// Unscripted files resolve to artist "Artist" and their stem as title.
#[derive(Default)]
pub struct ScriptedResolver {
    script: Mutex<HashMap<String, Outcome>>,
    calls: Mutex<HashMap<FileIdentity, usize>>,
    total: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self, stem: &str, outcome: Outcome) {
        self.script.lock().unwrap().insert(stem.to_string(), outcome);
    }

    pub fn calls_for(&self, identity: &FileIdentity) -> usize {
        self.calls.lock().unwrap().get(identity).copied().unwrap_or(0)
    }

    pub fn total_calls(&self) -> usize {
        self.total.load(Ordering::SeqCst)
    }

    pub fn max_calls_per_identity(&self) -> usize {
        self.calls.lock().unwrap().values().copied().max().unwrap_or(0)
    }
}

#[async_trait]
impl MetadataResolver for ScriptedResolver {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<TrackMetadata, ResolveError> {
        self.total.fetch_add(1, Ordering::SeqCst);
        *self
            .calls
            .lock()
            .unwrap()
            .entry(request.identity.clone())
            .or_insert(0) += 1;

        let stem = request.display_name();
        let outcome = self.script.lock().unwrap().get(&stem).cloned();
        match outcome {
            None => Ok(TrackMetadata::new("Artist", stem)),
            Some(Outcome::Resolve(metadata)) => Ok(metadata),
            Some(Outcome::Fail(reason)) => Err(ResolveError::Network(reason)),
            Some(Outcome::Hang) => {
                tokio::time::sleep(Duration::from_secs(30)).await;
                Err(ResolveError::Network("hung".to_string()))
            }
        }
    }
}

// ============================================================================
// Store
// ============================================================================

/// Memory store whose backend can be made to fail
#[derive(Default)]
pub struct FlakyStore {
    pub inner: MemoryStore,
    /// Every operation fails
    pub down: AtomicBool,
    /// The next `Resolve` update fails (crash between placement and commit)
    pub fail_next_resolve: AtomicBool,
}

impl FlakyStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.down.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(aimi_common::Error::Internal(
                "disk I/O error".to_string(),
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl FingerprintStore for FlakyStore {
    async fn get(&self, identity: &FileIdentity) -> Result<Option<ImportRecord>, StoreError> {
        self.check()?;
        self.inner.get(identity).await
    }

    async fn put_if_absent(&self, record: &ImportRecord) -> Result<bool, StoreError> {
        self.check()?;
        self.inner.put_if_absent(record).await
    }

    async fn update(
        &self,
        identity: &FileIdentity,
        transition: Transition,
    ) -> Result<ImportRecord, StoreError> {
        self.check()?;
        if matches!(transition, Transition::Resolve { .. })
            && self.fail_next_resolve.swap(false, Ordering::SeqCst)
        {
            return Err(StoreError::Backend(aimi_common::Error::Internal(
                "crashed before commit".to_string(),
            )));
        }
        self.inner.update(identity, transition).await
    }

    async fn resolved(&self) -> Result<Vec<ImportRecord>, StoreError> {
        self.check()?;
        self.inner.resolved().await
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// Sink that always fails to tag
pub struct FailingSink;

impl TaggingSink for FailingSink {
    fn place(&self, source: &Path, _metadata: &TrackMetadata) -> Result<Placement, TagError> {
        Err(TagError::Tag {
            path: source.to_path_buf(),
            reason: "read-only filesystem".to_string(),
        })
    }
}

/// Sink that records placements without touching the filesystem
#[derive(Default)]
pub struct RecordingSink {
    pub placed: Mutex<Vec<(PathBuf, TrackMetadata)>>,
}

impl TaggingSink for RecordingSink {
    fn place(&self, source: &Path, metadata: &TrackMetadata) -> Result<Placement, TagError> {
        self.placed
            .lock()
            .unwrap()
            .push((source.to_path_buf(), metadata.clone()));
        Ok(Placement::Written(
            PathBuf::from("/library")
                .join(metadata.main_artist())
                .join(&metadata.title),
        ))
    }
}

// ============================================================================
// Drivers and trees
// ============================================================================

/// Options with a short timeout suitable for tests
pub fn options(max_attempts: u32) -> DriverOptions {
    DriverOptions {
        max_attempts,
        resolve_timeout: Duration::from_millis(200),
        fuzzy_ratio: 0.0,
        ..DriverOptions::default()
    }
}

pub fn driver(
    store: Arc<dyn FingerprintStore>,
    resolver: Arc<dyn MetadataResolver>,
    sink: Arc<dyn TaggingSink>,
    options: DriverOptions,
) -> ImportDriver {
    ImportDriver::new(store, resolver, sink, FileScanner::new(), options)
}

/// Write `files` (relative path, content) under `root`
pub fn write_tree(root: &Path, files: &[(&str, &[u8])]) {
    for (rel, content) in files {
        let path = root.join(rel);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).unwrap();
        }
        std::fs::write(path, content).unwrap();
    }
}

pub fn identity_of(path: &Path) -> FileIdentity {
    FileIdentity::of_file(path).unwrap()
}

/// Write a short mono WAV whose samples depend on `seed`
pub fn write_wav(path: &Path, seed: u16) {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate: 8000,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..4000u32 {
        let sample = ((i.wrapping_mul(seed as u32 + 7)) % 2048) as i16 - 1024;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

/// Every visible file under `root`, sorted
pub fn files_under(root: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter(|e| !e.file_name().to_string_lossy().starts_with('.'))
        .map(|e| e.into_path())
        .collect();
    files.sort();
    files
}
