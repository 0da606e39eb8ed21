//! Metadata Resolution Driver
//!
//! One pass over a source tree. For every file the gate reports as new, the
//! driver claims the identity in the store, resolves it with a bounded timeout,
//! places the tagged file through the [`TaggingSink`] and only then commits
//! `Resolved`. A crash between placement and commit leaves a `Pending` record
//! whose retry finds the placed file again.
//!
//! Files are processed one at a time; the store's atomic claim is the only
//! synchronisation with concurrent runs.

use crate::config::ImportConfig;
use crate::error::ImportError;
use crate::models::{
    ImportRecord, ImportStatus, RunSummary, TrackMetadata, Transition, TransitionError,
};
use crate::services::dedup_gate::{Decision, DedupGate};
use crate::services::duplicate_matcher::DuplicateMatcher;
use crate::services::file_scanner::{FileScanner, ScannedFile};
use crate::services::fingerprint_store::{FingerprintStore, StoreError};
use crate::services::library_writer::{Placement, PlacementMode, TaggingSink};
use crate::services::metadata_resolver::{
    resolution_budget, MetadataResolver, ResolveError, ResolveRequest,
};
use crate::services::tag_reader::{self, TagHints};
use chrono::Utc;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Scanned files buffered ahead of the driver
const SCAN_BUFFER: usize = 64;

/// Per-run driver settings
#[derive(Debug, Clone)]
pub struct DriverOptions {
    pub max_attempts: u32,
    /// Per-backend bound; the whole resolver gets one per backend
    pub resolve_timeout: Duration,
    pub pending_lease: chrono::Duration,
    pub max_consecutive_store_errors: u32,
    pub fuzzy_ratio: f64,
    pub placement: PlacementMode,
}

impl DriverOptions {
    pub fn from_config(config: &ImportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            resolve_timeout: config.resolve_timeout,
            pending_lease: config.pending_lease_chrono(),
            max_consecutive_store_errors: config.max_consecutive_store_errors,
            fuzzy_ratio: config.fuzzy_ratio,
            placement: config.placement,
        }
    }
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self::from_config(&ImportConfig::default())
    }
}

/// Aborts a run after too many store failures in a row
pub(crate) struct StoreErrorBudget {
    limit: u32,
    consecutive: u32,
}

impl StoreErrorBudget {
    pub(crate) fn new(limit: u32) -> Self {
        Self {
            limit: limit.max(1),
            consecutive: 0,
        }
    }

    pub(crate) fn success(&mut self) {
        self.consecutive = 0;
    }

    /// Count one failed file; `Err` once the budget is spent
    pub(crate) fn failure(
        &mut self,
        path: &Path,
        err: StoreError,
        summary: &mut RunSummary,
    ) -> Result<(), ImportError> {
        summary.store_errors += 1;
        self.consecutive += 1;
        error!(
            path = %path.display(),
            error = %err,
            consecutive = self.consecutive,
            "Store error, file left for the next pass"
        );

        if self.consecutive >= self.limit {
            return Err(ImportError::Aborted {
                consecutive: self.consecutive,
                summary: Box::new(summary.clone()),
                source: err,
            });
        }
        Ok(())
    }
}

/// Outcome of trying to claim an identity
enum Claim {
    Claimed(ImportRecord),
    /// Handled by someone else; the summary was updated
    Skipped,
}

/// Drives resolution for one source tree
pub struct ImportDriver {
    store: Arc<dyn FingerprintStore>,
    resolver: Arc<dyn MetadataResolver>,
    sink: Arc<dyn TaggingSink>,
    scanner: FileScanner,
    options: DriverOptions,
}

impl ImportDriver {
    pub fn new(
        store: Arc<dyn FingerprintStore>,
        resolver: Arc<dyn MetadataResolver>,
        sink: Arc<dyn TaggingSink>,
        scanner: FileScanner,
        options: DriverOptions,
    ) -> Self {
        Self {
            store,
            resolver,
            sink,
            scanner,
            options,
        }
    }

    /// Run one pass over `root`
    ///
    /// Per-file failures are counted in the summary. The run only fails when
    /// `root` is unusable or the store keeps failing.
    pub async fn run(&self, root: &Path) -> Result<RunSummary, ImportError> {
        info!(source = %root.display(), "Starting import pass");

        let mut rx = self.scanner.spawn(root, SCAN_BUFFER)?;
        let mut summary = RunSummary::default();
        let mut budget = StoreErrorBudget::new(self.options.max_consecutive_store_errors);
        let mut library: Option<Vec<ImportRecord>> = None;

        while let Some(item) = rx.recv().await {
            let file = match item {
                Ok(file) => file,
                Err(_) => {
                    // Already logged by the scanner
                    summary.scan_errors += 1;
                    continue;
                }
            };
            summary.scanned += 1;

            match self.process_file(&file, &mut summary, &mut library).await {
                Ok(()) => budget.success(),
                Err(e) => budget.failure(&file.path, e, &mut summary)?,
            }
        }

        summary.log();
        Ok(summary)
    }

    /// Gate, claim, resolve, place and commit one file
    ///
    /// `Err` is a store failure; the record is left as it was so the next pass
    /// retries the file.
    async fn process_file(
        &self,
        file: &ScannedFile,
        summary: &mut RunSummary,
        library: &mut Option<Vec<ImportRecord>>,
    ) -> Result<(), StoreError> {
        let gate = DedupGate::new(self.store.as_ref(), self.options.max_attempts);

        let existing = match gate.classify(&file.identity).await? {
            Decision::Skip(record) => {
                debug!(
                    path = %file.path.display(),
                    identity = %file.identity.short(),
                    status = %record.status,
                    "Skipping already handled file"
                );
                summary.skipped += 1;
                return Ok(());
            }
            Decision::New(existing) => existing,
        };

        let record = match self.claim(file, existing, summary).await? {
            Claim::Claimed(record) => record,
            Claim::Skipped => return Ok(()),
        };

        info!(
            path = %file.path.display(),
            identity = %file.identity.short(),
            attempt = record.attempt_count,
            max_attempts = self.options.max_attempts,
            "Processing"
        );

        let hints = self.read_hints(&file.path).await;

        if let Some((metadata, storage_path)) = self.find_library_match(&hints, library).await? {
            info!(
                path = %file.path.display(),
                storage_path = %storage_path.display(),
                "Linked to existing library track"
            );
            return self
                .commit(file, metadata, storage_path, summary, library, true)
                .await;
        }

        let request = ResolveRequest {
            identity: file.identity.clone(),
            path: file.path.clone(),
            hints,
        };

        let metadata = match self.resolve(&request).await {
            Ok(metadata) => metadata,
            Err(e) => return self.fail(file, &e.to_string(), summary).await,
        };

        let placement = match self.place(file, &metadata).await {
            Ok(placement) => placement,
            Err(reason) => return self.fail(file, &reason, summary).await,
        };

        self.commit(
            file,
            metadata,
            placement.path().to_path_buf(),
            summary,
            library,
            false,
        )
        .await
    }

    /// Insert a fresh `Pending` record or re-claim an existing one
    async fn claim(
        &self,
        file: &ScannedFile,
        existing: Option<ImportRecord>,
        summary: &mut RunSummary,
    ) -> Result<Claim, StoreError> {
        let now = Utc::now();

        let Some(existing) = existing else {
            let record = ImportRecord::pending(file.identity.clone(), &file.path, now);
            if self.store.put_if_absent(&record).await? {
                return Ok(Claim::Claimed(record));
            }
            debug!(
                identity = %file.identity.short(),
                "Claimed concurrently by another run"
            );
            summary.in_flight_elsewhere += 1;
            return Ok(Claim::Skipped);
        };

        let transition = Transition::Claim {
            now,
            lease: self.options.pending_lease,
            max_attempts: self.options.max_attempts,
        };

        match self.store.update(&file.identity, transition).await {
            Ok(record) if record.status == ImportStatus::Pending => {
                if existing.status == ImportStatus::Pending {
                    warn!(
                        identity = %file.identity.short(),
                        since = %existing.last_attempt_at,
                        "Reclaiming abandoned attempt"
                    );
                }
                Ok(Claim::Claimed(record))
            }
            Ok(record) => {
                warn!(
                    identity = %file.identity.short(),
                    attempts = record.attempt_count,
                    "Abandoned attempt exhausted the retry cap"
                );
                summary.permanently_failed += 1;
                Ok(Claim::Skipped)
            }
            Err(StoreError::Transition(TransitionError::InFlight { since })) => {
                debug!(identity = %file.identity.short(), since = %since, "Attempt in flight elsewhere");
                summary.in_flight_elsewhere += 1;
                Ok(Claim::Skipped)
            }
            Err(StoreError::Transition(e)) => {
                debug!(identity = %file.identity.short(), reason = %e, "Record settled concurrently");
                summary.skipped += 1;
                Ok(Claim::Skipped)
            }
            Err(e) if e.is_backend() => Err(e),
            Err(e) => {
                debug!(identity = %file.identity.short(), reason = %e, "Claim lost");
                summary.in_flight_elsewhere += 1;
                Ok(Claim::Skipped)
            }
        }
    }

    async fn read_hints(&self, path: &Path) -> TagHints {
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || tag_reader::read_hints(&path))
            .await
            .unwrap_or_default()
    }

    /// Resolved record whose metadata matches the embedded hints
    async fn find_library_match(
        &self,
        hints: &TagHints,
        library: &mut Option<Vec<ImportRecord>>,
    ) -> Result<Option<(TrackMetadata, PathBuf)>, StoreError> {
        let matcher = DuplicateMatcher::new(self.options.fuzzy_ratio);
        if !matcher.is_enabled() || !hints.is_complete() {
            return Ok(None);
        }

        if library.is_none() {
            *library = Some(self.store.resolved().await?);
        }
        let candidates = library.as_deref().unwrap_or_default();

        Ok(matcher.find(hints, candidates).and_then(|record| {
            Some((record.metadata.clone()?, record.storage_path.clone()?))
        }))
    }

    async fn resolve(&self, request: &ResolveRequest) -> Result<TrackMetadata, ResolveError> {
        let timeout = resolution_budget(self.options.resolve_timeout, self.resolver.backend_count());
        match tokio::time::timeout(timeout, self.resolver.resolve(request)).await {
            Ok(result) => result,
            Err(_) => Err(ResolveError::Timeout(timeout)),
        }
    }

    /// Tag and place on the blocking pool
    async fn place(&self, file: &ScannedFile, metadata: &TrackMetadata) -> Result<Placement, String> {
        let sink = Arc::clone(&self.sink);
        let source = file.path.clone();
        let metadata = metadata.clone();

        match tokio::task::spawn_blocking(move || sink.place(&source, &metadata)).await {
            Ok(Ok(placement)) => Ok(placement),
            Ok(Err(e)) => Err(e.to_string()),
            Err(e) => Err(format!("tagging task failed: {}", e)),
        }
    }

    /// Commit `Resolved`; the output file is already in place
    async fn commit(
        &self,
        file: &ScannedFile,
        metadata: TrackMetadata,
        storage_path: PathBuf,
        summary: &mut RunSummary,
        library: &mut Option<Vec<ImportRecord>>,
        linked: bool,
    ) -> Result<(), StoreError> {
        let transition = Transition::Resolve {
            metadata,
            storage_path,
            now: Utc::now(),
        };

        let record = match self.store.update(&file.identity, transition).await {
            Ok(record) => record,
            Err(e) if e.is_backend() => return Err(e),
            Err(e) => {
                warn!(identity = %file.identity.short(), error = %e, "Resolved result not committed");
                summary.in_flight_elsewhere += 1;
                return Ok(());
            }
        };

        info!(
            identity = %file.identity.short(),
            storage_path = %record.storage_path.as_deref().unwrap_or(Path::new("")).display(),
            "Resolved"
        );
        if linked {
            summary.linked += 1;
        } else {
            summary.resolved += 1;
        }

        if let Some(library) = library.as_mut() {
            library.push(record);
        }

        if self.options.placement == PlacementMode::Move {
            remove_source(&file.path).await;
        }
        Ok(())
    }

    /// Record a failed attempt
    async fn fail(&self, file: &ScannedFile, reason: &str, summary: &mut RunSummary) -> Result<(), StoreError> {
        let transition = Transition::Fail {
            error: reason.to_string(),
            now: Utc::now(),
        };

        match self.store.update(&file.identity, transition).await {
            Ok(record) if record.attempt_count >= self.options.max_attempts => {
                warn!(
                    path = %file.path.display(),
                    identity = %file.identity.short(),
                    attempts = record.attempt_count,
                    error = %reason,
                    "Resolution failed permanently"
                );
                summary.permanently_failed += 1;
                Ok(())
            }
            Ok(record) => {
                warn!(
                    path = %file.path.display(),
                    identity = %file.identity.short(),
                    attempts = record.attempt_count,
                    error = %reason,
                    "Resolution failed, will retry on a later run"
                );
                summary.failed += 1;
                Ok(())
            }
            Err(e) if e.is_backend() => Err(e),
            Err(e) => {
                warn!(identity = %file.identity.short(), error = %e, "Failure not recorded");
                summary.in_flight_elsewhere += 1;
                Ok(())
            }
        }
    }
}

async fn remove_source(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "Removed source"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "Cannot remove source"),
    }
}

/// Scan and classify without writing anything
pub async fn dry_run(
    store: &dyn FingerprintStore,
    scanner: &FileScanner,
    root: &Path,
    max_attempts: u32,
    max_consecutive_store_errors: u32,
) -> Result<RunSummary, ImportError> {
    info!(source = %root.display(), "Dry run: no store writes, no AI calls");

    let mut rx = scanner.spawn(root, SCAN_BUFFER)?;
    let gate = DedupGate::new(store, max_attempts);
    let mut summary = RunSummary::default();
    let mut budget = StoreErrorBudget::new(max_consecutive_store_errors);

    while let Some(item) = rx.recv().await {
        let Ok(file) = item else {
            summary.scan_errors += 1;
            continue;
        };
        summary.scanned += 1;

        match gate.classify(&file.identity).await {
            Ok(Decision::Skip(_)) => {
                budget.success();
                summary.skipped += 1;
            }
            Ok(Decision::New(existing)) => {
                budget.success();
                summary.would_process += 1;
                info!(
                    path = %file.path.display(),
                    identity = %file.identity.short(),
                    previous_attempts = existing.map(|r| r.attempt_count).unwrap_or(0),
                    "Would process"
                );
            }
            Err(e) => budget.failure(&file.path, e, &mut summary)?,
        }
    }

    summary.log();
    Ok(summary)
}
